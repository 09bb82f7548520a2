//! Detector contract — the core consumes rectangles, it never detects.
//!
//! Implementations are stateful (model sessions), hence `&mut self`.

use crate::types::FaceRect;
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("detector backend: {0}")]
    Backend(String),
}

/// Detection tuning knobs, in the cascade-classifier vocabulary the
/// enrollment pipeline was calibrated with. Backends that do not literally
/// count neighbors map `min_neighbors` onto their own confidence scale;
/// `min_size` is the smallest accepted face side length in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    pub min_neighbors: u32,
    pub min_size: u32,
}

impl DetectParams {
    /// Default detection pass.
    pub fn primary() -> Self {
        Self { min_neighbors: 5, min_size: 50 }
    }

    /// Permissive retry pass for low-quality enrollment photos.
    pub fn relaxed() -> Self {
        Self { min_neighbors: 3, min_size: 30 }
    }
}

/// Face-locating capability, provided by a backend outside the core.
pub trait FaceDetector: Send {
    /// Returns zero or more face rectangles in source-image coordinates.
    /// An empty list is not an error; callers decide whether to retry.
    fn detect(&mut self, image: &GrayImage, params: &DetectParams)
        -> Result<Vec<FaceRect>, DetectError>;
}

/// Run the primary detection pass, then retry once with relaxed parameters
/// before giving up with [`DetectError::NoFaceDetected`].
pub fn detect_with_retry(
    detector: &mut dyn FaceDetector,
    image: &GrayImage,
) -> Result<Vec<FaceRect>, DetectError> {
    let faces = detector.detect(image, &DetectParams::primary())?;
    if !faces.is_empty() {
        return Ok(faces);
    }

    tracing::debug!("primary detection pass found nothing, retrying relaxed");
    let faces = detector.detect(image, &DetectParams::relaxed())?;
    if faces.is_empty() {
        return Err(DetectError::NoFaceDetected);
    }
    Ok(faces)
}

/// Pick the largest rectangle by area. Multiple faces in one image are
/// disambiguated by area, not detector confidence.
pub fn largest_face(faces: &[FaceRect]) -> Option<&FaceRect> {
    faces.iter().max_by(|a, b| {
        a.area()
            .partial_cmp(&b.area())
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}
