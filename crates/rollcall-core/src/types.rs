use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rectangle of a detected face, in source-image pixel coordinates.
///
/// Detector backends may report fractional or slightly out-of-bounds
/// coordinates; the canonicalizer clamps before cropping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceRect {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Canonical fixed-size grayscale representation of one face region.
///
/// Produced by the canonicalizer from both enrollment images and probe
/// snapshots, so the two are directly comparable. Square: `pixels` holds
/// `size * size` bytes in row-major order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceTemplate {
    size: u32,
    pixels: Vec<u8>,
}

impl FaceTemplate {
    pub fn new(size: u32, pixels: Vec<u8>) -> Self {
        Self { size, pixels }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// A template is well-formed when its buffer matches its declared
    /// dimensions. Malformed templates are skipped during matching, never
    /// scored.
    pub fn is_well_formed(&self) -> bool {
        self.size > 0 && self.pixels.len() == (self.size as usize) * (self.size as usize)
    }

    /// 256-bin intensity histogram.
    pub fn histogram(&self) -> [u32; 256] {
        let mut hist = [0u32; 256];
        for &p in &self.pixels {
            hist[p as usize] += 1;
        }
        hist
    }

    /// Resample to a different square size with bilinear interpolation.
    ///
    /// Matching resizes the stored template to the probe's dimensions,
    /// never the reverse.
    pub fn resized(&self, size: u32) -> FaceTemplate {
        if size == self.size {
            return self.clone();
        }
        let pixels = crate::canonical::resize_bilinear(
            &self.pixels,
            self.size,
            self.size,
            size,
            size,
        );
        FaceTemplate { size, pixels }
    }
}

/// One enrolled identity in the gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub name: String,
    pub template: FaceTemplate,
    pub enrolled_at: DateTime<Utc>,
}

/// Result of matching a probe template against the gallery. Transient:
/// never stored, never cached across gallery mutations.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Best-matching identity, present only when `accepted`.
    pub name: Option<String>,
    /// Combined similarity of the best match (kept for diagnostics even
    /// when below threshold).
    pub score: f32,
    pub accepted: bool,
}

/// A recordable attendance event, emitted by the gate and handed to the
/// persistence sink.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEvent {
    pub identity: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_area() {
        let r = FaceRect { x: 10.0, y: 20.0, width: 30.0, height: 40.0 };
        assert_eq!(r.area(), 1200.0);
    }

    #[test]
    fn test_template_well_formed() {
        let t = FaceTemplate::new(4, vec![0u8; 16]);
        assert!(t.is_well_formed());
    }

    #[test]
    fn test_template_malformed_short_buffer() {
        let t = FaceTemplate::new(4, vec![0u8; 15]);
        assert!(!t.is_well_formed());
    }

    #[test]
    fn test_template_malformed_zero_size() {
        let t = FaceTemplate::new(0, vec![]);
        assert!(!t.is_well_formed());
    }

    #[test]
    fn test_histogram_counts() {
        let t = FaceTemplate::new(2, vec![0, 0, 255, 7]);
        let hist = t.histogram();
        assert_eq!(hist[0], 2);
        assert_eq!(hist[7], 1);
        assert_eq!(hist[255], 1);
        assert_eq!(hist.iter().sum::<u32>(), 4);
    }

    #[test]
    fn test_resized_same_size_is_identity() {
        let t = FaceTemplate::new(2, vec![1, 2, 3, 4]);
        assert_eq!(t.resized(2), t);
    }

    #[test]
    fn test_resized_uniform_stays_uniform() {
        let t = FaceTemplate::new(10, vec![77u8; 100]);
        let r = t.resized(4);
        assert_eq!(r.size(), 4);
        assert!(r.pixels().iter().all(|&p| p == 77));
    }
}
