//! Enrollment source directory — one image per identity.
//!
//! The file stem is the identity name: `known_faces/ada.jpg` enrolls "ada".
//! The directory is the durable source of truth for the gallery; the
//! in-memory gallery is rebuilt from it on startup and after every change.

use image::DynamicImage;
use rollcall_core::EnrollmentSource;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum SourceDirError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid identity name: {0:?}")]
    InvalidName(String),
    #[error("no source image for: {0}")]
    NotFound(String),
    #[error("image encode: {0}")]
    Image(#[from] image::ImageError),
}

pub struct SourceDir {
    dir: PathBuf,
}

impl SourceDir {
    /// Open (creating if needed) the source directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SourceDirError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Enumerate all enrollment sources, sorted by name for a stable
    /// gallery order. Unreadable or undecodable files are logged and
    /// skipped.
    pub fn load_sources(&self) -> Vec<EnrollmentSource> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(dir = %self.dir.display(), error = %err, "cannot list source directory");
                return Vec::new();
            }
        };

        let mut sources = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = identity_for(&path) else {
                continue;
            };
            match image::open(&path) {
                Ok(img) => sources.push(EnrollmentSource {
                    name,
                    image: img.to_luma8(),
                }),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable source image");
                }
            }
        }

        sources.sort_by(|a, b| a.name.cmp(&b.name));
        sources
    }

    /// Save an enrollment image as `<name>.jpg`, replacing any existing
    /// source for that identity.
    pub fn save(&self, name: &str, image: &DynamicImage) -> Result<PathBuf, SourceDirError> {
        validate_name(name)?;

        // Drop a stale source under another extension so the identity
        // cannot end up with two competing images.
        if let Some(existing) = self.find(name) {
            if existing.extension().and_then(|e| e.to_str()) != Some("jpg") {
                fs::remove_file(&existing)?;
            }
        }

        let path = self.dir.join(format!("{name}.jpg"));
        // JPEG cannot carry an alpha channel.
        DynamicImage::ImageRgb8(image.to_rgb8())
            .save_with_format(&path, image::ImageFormat::Jpeg)?;
        tracing::info!(name, path = %path.display(), "enrollment source saved");
        Ok(path)
    }

    /// Delete the source image for an identity.
    pub fn delete(&self, name: &str) -> Result<(), SourceDirError> {
        validate_name(name)?;
        let path = self
            .find(name)
            .ok_or_else(|| SourceDirError::NotFound(name.to_string()))?;
        fs::remove_file(&path)?;
        tracing::info!(name, "enrollment source deleted");
        Ok(())
    }

    fn find(&self, name: &str) -> Option<PathBuf> {
        IMAGE_EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{name}.{ext}")))
            .find(|p| p.exists())
    }
}

/// Identity name for a directory entry, if it is a recognized image file.
fn identity_for(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_string())
}

/// Identity names become file stems; reject anything that could escape the
/// directory or collide with extension handling.
fn validate_name(name: &str) -> Result<(), SourceDirError> {
    let ok = !name.is_empty()
        && !name.contains(['/', '\\', '.'])
        && name != ".."
        && name.chars().all(|c| !c.is_control());
    if ok {
        Ok(())
    } else {
        Err(SourceDirError::InvalidName(name.to_string()))
    }
}
