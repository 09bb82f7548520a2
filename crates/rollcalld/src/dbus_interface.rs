use crate::engine::EngineHandle;
use crate::store::AttendanceStore;
use chrono::Utc;
use rollcall_core::MatchOutcome;
use zbus::interface;

/// Audio cue names for the kiosk front-end, one per recognition outcome.
const CUE_RECORDED: &str = "attendance_marked";
const CUE_ALREADY_MARKED: &str = "attendance_is_already_marked";
const CUE_NOT_RECOGNIZED: &str = "person_not_detected";

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceInterface {
    engine: EngineHandle,
    store: AttendanceStore,
}

impl AttendanceInterface {
    pub fn new(engine: EngineHandle, store: AttendanceStore) -> Self {
        Self { engine, store }
    }
}

fn failed(err: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceInterface {
    /// Recognize the face in an encoded snapshot and mark attendance.
    /// Returns outcome JSON with an audio cue hint.
    async fn recognize(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        let (outcome, timestamp) = self.engine.recognize(image).await.map_err(failed)?;

        let body = match outcome {
            MatchOutcome::Recorded { identity, confidence } => {
                // The gate accepted; hand the event to the persistence sink.
                self.store
                    .record(&identity, confidence, timestamp)
                    .await
                    .map_err(failed)?;
                serde_json::json!({
                    "recorded": true,
                    "identity": identity,
                    "confidence": confidence,
                    "cue": CUE_RECORDED,
                })
            }
            MatchOutcome::Suppressed { identity, remaining_seconds } => serde_json::json!({
                "recorded": false,
                "identity": identity,
                "remaining_seconds": remaining_seconds,
                "cue": CUE_ALREADY_MARKED,
            }),
            MatchOutcome::NotRecognized { best_score } => serde_json::json!({
                "recorded": false,
                "best_score": best_score,
                "cue": CUE_NOT_RECOGNIZED,
            }),
        };

        Ok(body.to_string())
    }

    /// Enroll (or replace) an identity from an encoded snapshot.
    async fn enroll(&self, name: String, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(name, "enroll requested");
        self.engine
            .enroll(name.clone(), image)
            .await
            .map_err(failed)?;
        Ok(serde_json::json!({ "enrolled": name }).to_string())
    }

    /// Remove an identity and its source image.
    async fn remove(&self, name: String) -> zbus::fdo::Result<bool> {
        tracing::info!(name, "remove requested");
        self.engine.remove(name).await.map_err(failed)?;
        Ok(true)
    }

    /// Rebuild the gallery from the enrollment source directory.
    async fn rebuild(&self) -> zbus::fdo::Result<String> {
        tracing::info!("rebuild requested");
        let report = self.engine.rebuild().await.map_err(failed)?;
        Ok(serde_json::json!({
            "enrolled": report.enrolled,
            "skipped": report.skipped,
        })
        .to_string())
    }

    /// Daemon status: trained state plus attendance statistics.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(failed)?;
        let summary = self.store.summary(Utc::now()).await.map_err(failed)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "trained": status.trained,
            "enrolled_count": status.entry_count,
            "names": status.names,
            "attendance": summary,
        })
        .to_string())
    }

    /// List enrolled identities with enrollment timestamps.
    async fn list_people(&self) -> zbus::fdo::Result<String> {
        let people = self.engine.list_people().await.map_err(failed)?;
        serde_json::to_string(&people).map_err(failed)
    }

    /// Most recent attendance records, newest first.
    async fn records(&self, limit: u32) -> zbus::fdo::Result<String> {
        let records = self.store.recent(limit).await.map_err(failed)?;
        serde_json::to_string(&records).map_err(failed)
    }
}
