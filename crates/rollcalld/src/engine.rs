//! Engine thread — single owner of the attendance service.
//!
//! All gallery and cooldown state lives on one dedicated OS thread; D-Bus
//! handlers talk to it through a bounded channel with oneshot replies.
//! Serializing requests through the owner thread is what makes gallery
//! swaps and the gate's check-then-write atomic under concurrent callers.

use crate::sources::{SourceDir, SourceDirError};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use rollcall_core::{
    AttendanceService, EnrollError, GalleryError, MatchOutcome, RebuildError, RebuildReport,
    RecognizeError, ServiceStatus,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid image data: {0}")]
    InvalidImage(String),
    #[error("no identities enrolled; add a person or rebuild first")]
    NotTrained,
    #[error("recognition: {0}")]
    Recognize(#[from] RecognizeError),
    #[error("enrollment: {0}")]
    Enroll(#[from] EnrollError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
    #[error("rebuild: {0}")]
    Rebuild(#[from] RebuildError),
    #[error("source directory: {0}")]
    Sources(#[from] SourceDirError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// One enrolled identity, for listing surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct PersonInfo {
    pub name: String,
    pub enrolled_at: DateTime<Utc>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Recognize {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<(MatchOutcome, DateTime<Utc>), EngineError>>,
    },
    Enroll {
        name: String,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Remove {
        name: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Rebuild {
        reply: oneshot::Sender<Result<RebuildReport, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<ServiceStatus>,
    },
    ListPeople {
        reply: oneshot::Sender<Vec<PersonInfo>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Identify the face in an encoded snapshot and gate the result.
    /// Returns the outcome together with the decision timestamp, for the
    /// persistence sink.
    pub async fn recognize(
        &self,
        image: Vec<u8>,
    ) -> Result<(MatchOutcome, DateTime<Utc>), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize { image, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Enroll (or replace) an identity from an encoded snapshot: validate,
    /// save the source image, rebuild the gallery from the directory.
    pub async fn enroll(&self, name: String, image: Vec<u8>) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll { name, image, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Remove an identity and its source image.
    pub async fn remove(&self, name: String) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Remove { name, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Rebuild the gallery from the source directory.
    pub async fn rebuild(&self) -> Result<RebuildReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Rebuild { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<ServiceStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn list_people(&self) -> Result<Vec<PersonInfo>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ListPeople { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Takes ownership of the service and source directory, attempts an initial
/// gallery build from whatever sources already exist, then enters the
/// request loop.
pub fn spawn_engine(mut service: AttendanceService, sources: SourceDir) -> EngineHandle {
    let initial = sources.load_sources();
    if initial.is_empty() {
        tracing::info!(dir = %sources.path().display(), "no enrollment sources yet");
    } else {
        match service.rebuild(&initial, Utc::now()) {
            Ok(report) => tracing::info!(
                enrolled = report.enrolled,
                skipped = report.skipped.len(),
                "initial gallery built"
            ),
            Err(err) => tracing::warn!(error = %err, "initial gallery build produced nothing"),
        }
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize { image, reply } => {
                        let _ = reply.send(run_recognize(&mut service, &image));
                    }
                    EngineRequest::Enroll { name, image, reply } => {
                        let _ = reply.send(run_enroll(&mut service, &sources, &name, &image));
                    }
                    EngineRequest::Remove { name, reply } => {
                        let _ = reply.send(run_remove(&mut service, &sources, &name));
                    }
                    EngineRequest::Rebuild { reply } => {
                        let _ = reply.send(run_rebuild(&mut service, &sources));
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(service.status());
                    }
                    EngineRequest::ListPeople { reply } => {
                        let people = service
                            .gallery()
                            .entries()
                            .iter()
                            .map(|e| PersonInfo {
                                name: e.name.clone(),
                                enrolled_at: e.enrolled_at,
                            })
                            .collect();
                        let _ = reply.send(people);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

fn decode_image(bytes: &[u8]) -> Result<DynamicImage, EngineError> {
    image::load_from_memory(bytes).map_err(|e| EngineError::InvalidImage(e.to_string()))
}

fn run_recognize(
    service: &mut AttendanceService,
    image: &[u8],
) -> Result<(MatchOutcome, DateTime<Utc>), EngineError> {
    if !service.status().trained {
        return Err(EngineError::NotTrained);
    }
    let image = decode_image(image)?;
    let now = Utc::now();
    let outcome = service.recognize(&image, now)?;
    Ok((outcome, now))
}

/// Validate and enroll in-memory first so a face-free image is rejected
/// before anything is written, then persist the source and rebuild the
/// gallery wholesale from the directory.
fn run_enroll(
    service: &mut AttendanceService,
    sources: &SourceDir,
    name: &str,
    image: &[u8],
) -> Result<(), EngineError> {
    let image = decode_image(image)?;
    service.enroll(name, &image, Utc::now())?;
    sources.save(name, &image)?;

    match service.rebuild(&sources.load_sources(), Utc::now()) {
        Ok(report) => {
            if !report.skipped.is_empty() {
                tracing::warn!(skipped = ?report.skipped, "sources skipped during rebuild");
            }
        }
        // The in-memory enrollment above already succeeded; a directory
        // rebuild that finds nothing must not wipe it.
        Err(err) => tracing::warn!(error = %err, "post-enroll rebuild failed"),
    }
    Ok(())
}

fn run_remove(
    service: &mut AttendanceService,
    sources: &SourceDir,
    name: &str,
) -> Result<(), EngineError> {
    service.remove(name)?;
    if let Err(err) = sources.delete(name) {
        // Gallery entry existed without a backing file; removal still
        // succeeded.
        tracing::warn!(name, error = %err, "no source image to delete");
    }

    match service.rebuild(&sources.load_sources(), Utc::now()) {
        Ok(_) => {}
        Err(RebuildError::EmptyGallery) => {
            tracing::debug!("last identity removed; gallery now empty");
        }
    }
    Ok(())
}

fn run_rebuild(
    service: &mut AttendanceService,
    sources: &SourceDir,
) -> Result<RebuildReport, EngineError> {
    let report = service.rebuild(&sources.load_sources(), Utc::now())?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use rollcall_core::{DetectError, DetectParams, FaceDetector, FaceRect};
    use std::io::Cursor;

    /// Detects one full-frame face in any image that is not all-black.
    struct BrightnessDetector;

    impl FaceDetector for BrightnessDetector {
        fn detect(
            &mut self,
            image: &image::GrayImage,
            _params: &DetectParams,
        ) -> Result<Vec<FaceRect>, DetectError> {
            if image.as_raw().iter().any(|&p| p > 0) {
                Ok(vec![FaceRect {
                    x: 0.0,
                    y: 0.0,
                    width: image.width() as f32,
                    height: image.height() as f32,
                }])
            } else {
                Ok(vec![])
            }
        }
    }

    fn spawn_test_engine(tag: &str) -> EngineHandle {
        let dir = std::env::temp_dir()
            .join("rollcall-tests")
            .join(format!("engine-{tag}-{}", uuid::Uuid::new_v4()));
        let sources = SourceDir::open(dir).unwrap();
        let service = AttendanceService::new(Box::new(BrightnessDetector));
        spawn_engine(service, sources)
    }

    fn encoded_face(seed: u8) -> Vec<u8> {
        let img = RgbImage::from_fn(96, 96, |x, _| {
            let v = if x < 48 { 30 + seed } else { 210 };
            image::Rgb([v, v, v])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_enroll_then_recognize_records_once() {
        let engine = spawn_test_engine("recognize");
        engine.enroll("ada".into(), encoded_face(0)).await.unwrap();

        let (outcome, _) = engine.recognize(encoded_face(0)).await.unwrap();
        match outcome {
            MatchOutcome::Recorded { identity, confidence } => {
                assert_eq!(identity, "ada");
                assert!(confidence >= 0.6);
            }
            other => panic!("expected Recorded, got {other:?}"),
        }

        let (outcome, _) = engine.recognize(encoded_face(0)).await.unwrap();
        assert!(matches!(outcome, MatchOutcome::Suppressed { .. }));
    }

    #[tokio::test]
    async fn test_recognize_untrained() {
        let engine = spawn_test_engine("untrained");
        assert!(matches!(
            engine.recognize(encoded_face(0)).await,
            Err(EngineError::NotTrained)
        ));
    }

    #[tokio::test]
    async fn test_recognize_rejects_garbage_bytes() {
        let engine = spawn_test_engine("garbage");
        engine.enroll("ada".into(), encoded_face(0)).await.unwrap();
        assert!(matches!(
            engine.recognize(vec![1, 2, 3]).await,
            Err(EngineError::InvalidImage(_))
        ));
    }

    #[tokio::test]
    async fn test_enroll_persists_source_and_status() {
        let engine = spawn_test_engine("status");
        engine.enroll("ada".into(), encoded_face(0)).await.unwrap();

        let status = engine.status().await.unwrap();
        assert!(status.trained);
        assert_eq!(status.names, vec!["ada"]);

        let people = engine.list_people().await.unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].name, "ada");
    }

    #[tokio::test]
    async fn test_remove_then_status_empty() {
        let engine = spawn_test_engine("remove");
        engine.enroll("ada".into(), encoded_face(0)).await.unwrap();
        engine.remove("ada".into()).await.unwrap();

        let status = engine.status().await.unwrap();
        assert!(!status.trained);

        assert!(matches!(
            engine.remove("ada".into()).await,
            Err(EngineError::Gallery(GalleryError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_rebuild_empty_directory() {
        let engine = spawn_test_engine("rebuild-empty");
        assert!(matches!(
            engine.rebuild().await,
            Err(EngineError::Rebuild(RebuildError::EmptyGallery))
        ));
    }

    #[tokio::test]
    async fn test_rebuild_after_enroll() {
        let engine = spawn_test_engine("rebuild");
        engine.enroll("ada".into(), encoded_face(0)).await.unwrap();
        engine.enroll("grace".into(), encoded_face(40)).await.unwrap();

        let report = engine.rebuild().await.unwrap();
        assert_eq!(report.enrolled, 2);
        assert!(report.skipped.is_empty());
    }
}
