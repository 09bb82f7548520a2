use anyhow::{Context, Result};
use rollcall_core::{AttendanceGate, AttendanceService, MatchEngine};
use rollcall_detect::OnnxFaceDetector;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod sources;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }

    let detector = OnnxFaceDetector::load(&config.detector_model_path())
        .context("loading face detection model")?;
    tracing::info!(path = %config.detector_model_path(), "detector loaded");

    let service = AttendanceService::with_parts(
        Box::new(detector),
        MatchEngine::with_threshold(config.accept_threshold),
        AttendanceGate::with_cooldown(chrono::Duration::seconds(config.cooldown_secs)),
    );

    let source_dir = sources::SourceDir::open(&config.faces_dir)
        .with_context(|| format!("opening source directory {}", config.faces_dir.display()))?;
    tracing::info!(dir = %config.faces_dir.display(), "source directory ready");

    let store = store::AttendanceStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening attendance database {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "attendance store ready");

    let engine = engine::spawn_engine(service, source_dir);

    let interface = dbus_interface::AttendanceInterface::new(engine, store);
    let _connection = zbus::connection::Builder::session()?
        .name("org.rollcall.Attendance1")?
        .serve_at("/org/rollcall/Attendance1", interface)?
        .build()
        .await
        .context("registering on the session bus")?;

    tracing::info!("rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
