//! Training pipeline — rebuild the gallery from enrollment source images.

use crate::canonical::canonicalize;
use crate::detector::{detect_with_retry, largest_face, FaceDetector};
use crate::gallery::Gallery;
use chrono::{DateTime, Utc};
use image::GrayImage;
use thiserror::Error;

/// One enrollment source: identity name plus its grayscale photo.
pub struct EnrollmentSource {
    pub name: String,
    pub image: GrayImage,
}

/// What a rebuild produced. `skipped` names the sources that yielded no
/// usable face on either detection pass.
#[derive(Debug, Clone)]
pub struct RebuildReport {
    pub enrolled: usize,
    pub skipped: Vec<String>,
}

#[derive(Error, Debug)]
pub enum RebuildError {
    #[error("no source image yielded a detectable face")]
    EmptyGallery,
}

pub struct TrainingPipeline;

impl TrainingPipeline {
    /// Build a fresh gallery from `sources`.
    ///
    /// Each source gets the two-pass detection treatment; of multiple faces
    /// the largest by area is enrolled. Sources that fail detection or
    /// canonicalization are skipped and reported, never fatal to the batch.
    /// Duplicate names keep the last template seen.
    ///
    /// Returns [`RebuildError::EmptyGallery`] when zero entries were
    /// produced; the caller must keep its previous gallery in that case
    /// (replace-on-success only).
    pub fn rebuild(
        detector: &mut dyn FaceDetector,
        sources: &[EnrollmentSource],
        now: DateTime<Utc>,
    ) -> Result<(Gallery, RebuildReport), RebuildError> {
        let mut gallery = Gallery::new();
        let mut skipped = Vec::new();

        for source in sources {
            let faces = match detect_with_retry(detector, &source.image) {
                Ok(faces) => faces,
                Err(err) => {
                    tracing::warn!(name = %source.name, error = %err, "skipping enrollment source");
                    skipped.push(source.name.clone());
                    continue;
                }
            };

            // detect_with_retry never returns an empty list.
            let Some(face) = largest_face(&faces) else {
                skipped.push(source.name.clone());
                continue;
            };

            match canonicalize(&source.image, face) {
                Ok(template) => gallery.enroll(&source.name, template, now),
                Err(err) => {
                    tracing::warn!(name = %source.name, error = %err, "skipping enrollment source");
                    skipped.push(source.name.clone());
                }
            }
        }

        if gallery.is_empty() {
            return Err(RebuildError::EmptyGallery);
        }

        tracing::info!(
            enrolled = gallery.len(),
            skipped = skipped.len(),
            "gallery rebuilt"
        );
        let report = RebuildReport { enrolled: gallery.len(), skipped };
        Ok((gallery, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectError, DetectParams};
    use crate::types::FaceRect;
    use std::collections::HashMap;

    /// Detector stub keyed on image dimensions: images whose width appears
    /// in `faces_by_width` yield those rectangles, everything else yields
    /// nothing on both passes.
    struct StubDetector {
        faces_by_width: HashMap<u32, Vec<FaceRect>>,
    }

    impl FaceDetector for StubDetector {
        fn detect(
            &mut self,
            image: &GrayImage,
            _params: &DetectParams,
        ) -> Result<Vec<FaceRect>, DetectError> {
            Ok(self
                .faces_by_width
                .get(&image.width())
                .cloned()
                .unwrap_or_default())
        }
    }

    fn gradient_image(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| image::Luma([((x + 2 * y) % 256) as u8]))
    }

    fn full_rect() -> FaceRect {
        FaceRect { x: 20.0, y: 20.0, width: 80.0, height: 80.0 }
    }

    #[test]
    fn test_rebuild_skips_undetectable_source() {
        let mut detector = StubDetector {
            faces_by_width: HashMap::from([
                (200, vec![full_rect()]),
                (201, vec![full_rect()]),
            ]),
        };
        let sources = vec![
            EnrollmentSource { name: "alice".into(), image: gradient_image(200, 200) },
            EnrollmentSource { name: "bob".into(), image: gradient_image(201, 200) },
            EnrollmentSource { name: "carol".into(), image: gradient_image(202, 200) },
        ];

        let (gallery, report) =
            TrainingPipeline::rebuild(&mut detector, &sources, Utc::now()).unwrap();
        assert_eq!(gallery.len(), 2);
        assert_eq!(report.enrolled, 2);
        assert_eq!(report.skipped, vec!["carol".to_string()]);
        assert!(gallery.get("alice").is_some());
        assert!(gallery.get("bob").is_some());
    }

    #[test]
    fn test_rebuild_all_sources_fail() {
        let mut detector = StubDetector { faces_by_width: HashMap::new() };
        let sources = vec![EnrollmentSource {
            name: "alice".into(),
            image: gradient_image(100, 100),
        }];
        assert!(matches!(
            TrainingPipeline::rebuild(&mut detector, &sources, Utc::now()),
            Err(RebuildError::EmptyGallery)
        ));
    }

    #[test]
    fn test_rebuild_picks_largest_face() {
        let small = FaceRect { x: 0.0, y: 0.0, width: 30.0, height: 30.0 };
        let large = FaceRect { x: 60.0, y: 60.0, width: 90.0, height: 90.0 };
        let mut detector = StubDetector {
            faces_by_width: HashMap::from([(200, vec![small, large.clone()])]),
        };
        let image = gradient_image(200, 200);
        let sources = vec![EnrollmentSource { name: "alice".into(), image: image.clone() }];

        let (gallery, _) =
            TrainingPipeline::rebuild(&mut detector, &sources, Utc::now()).unwrap();
        let expected = canonicalize(&image, &large).unwrap();
        assert_eq!(gallery.get("alice").unwrap().template, expected);
    }

    #[test]
    fn test_rebuild_duplicate_names_keep_last() {
        let mut detector = StubDetector {
            faces_by_width: HashMap::from([
                (200, vec![full_rect()]),
                (150, vec![FaceRect { x: 10.0, y: 10.0, width: 60.0, height: 60.0 }]),
            ]),
        };
        let first = gradient_image(200, 200);
        let second = gradient_image(150, 150);
        let sources = vec![
            EnrollmentSource { name: "alice".into(), image: first },
            EnrollmentSource { name: "alice".into(), image: second.clone() },
        ];

        let (gallery, report) =
            TrainingPipeline::rebuild(&mut detector, &sources, Utc::now()).unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(report.enrolled, 1);
        let expected = canonicalize(
            &second,
            &FaceRect { x: 10.0, y: 10.0, width: 60.0, height: 60.0 },
        )
        .unwrap();
        assert_eq!(gallery.get("alice").unwrap().template, expected);
    }
}
