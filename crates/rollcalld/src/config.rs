use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing the UltraFace ONNX model.
    pub model_dir: PathBuf,
    /// Directory of enrollment source images (one per identity, file stem
    /// is the identity name).
    pub faces_dir: PathBuf,
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    /// Combined similarity threshold for a positive identification.
    pub accept_threshold: f32,
    /// Seconds between two recorded events for the same identity.
    pub cooldown_secs: i64,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults under `$XDG_DATA_HOME/rollcall`.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let faces_dir = std::env::var("ROLLCALL_FACES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("known_faces"));

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        Self {
            model_dir,
            faces_dir,
            db_path,
            accept_threshold: env_f32("ROLLCALL_ACCEPT_THRESHOLD", rollcall_core::ACCEPT_THRESHOLD),
            cooldown_secs: env_i64("ROLLCALL_COOLDOWN_SECS", rollcall_core::DEFAULT_COOLDOWN_SECS),
        }
    }

    /// Path to the UltraFace detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("version-RFB-320.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
