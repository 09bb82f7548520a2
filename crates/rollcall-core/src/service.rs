//! Attendance service facade — the produced interface of the core.
//!
//! Owns the gallery, match engine, gate, and detector behind a single
//! `&mut self` surface. The daemon drives one instance from a dedicated
//! engine thread, which is what makes the gate's check-then-write and the
//! gallery's rebuild swap atomic with respect to concurrent requests.

use crate::canonical::{canonicalize, CanonicalizeError};
use crate::detector::{detect_with_retry, largest_face, DetectError, FaceDetector};
use crate::gallery::{Gallery, GalleryError};
use crate::gate::{AttendanceGate, GateDecision};
use crate::matcher::MatchEngine;
use crate::pipeline::{EnrollmentSource, RebuildError, RebuildReport, TrainingPipeline};
use crate::types::FaceTemplate;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;

/// Outcome of one recognition request. Suppression and non-recognition are
/// ordinary outcomes, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Accepted match outside the cooldown window: an attendance event was
    /// emitted.
    Recorded { identity: String, confidence: f32 },
    /// Accepted match inside the cooldown window.
    Suppressed {
        identity: String,
        remaining_seconds: i64,
    },
    /// Best score fell below the acceptance threshold; the score is kept
    /// for diagnostics.
    NotRecognized { best_score: f32 },
}

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error("detection: {0}")]
    Detect(#[from] DetectError),
    #[error("canonicalization: {0}")]
    Canonicalize(#[from] CanonicalizeError),
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("detection: {0}")]
    Detect(#[from] DetectError),
    #[error("canonicalization: {0}")]
    Canonicalize(#[from] CanonicalizeError),
}

/// Snapshot of the trained state, for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub trained: bool,
    pub entry_count: usize,
    pub names: Vec<String>,
}

pub struct AttendanceService {
    detector: Box<dyn FaceDetector>,
    engine: MatchEngine,
    gate: AttendanceGate,
    gallery: Gallery,
}

impl AttendanceService {
    pub fn new(detector: Box<dyn FaceDetector>) -> Self {
        Self::with_parts(detector, MatchEngine::new(), AttendanceGate::new())
    }

    pub fn with_parts(
        detector: Box<dyn FaceDetector>,
        engine: MatchEngine,
        gate: AttendanceGate,
    ) -> Self {
        Self {
            detector,
            engine,
            gate,
            gallery: Gallery::new(),
        }
    }

    /// Detect, select the largest face, canonicalize.
    fn template_from(&mut self, image: &DynamicImage) -> Result<FaceTemplate, RecognizeError> {
        let gray = image.to_luma8();
        let faces = detect_with_retry(self.detector.as_mut(), &gray)?;
        let face = largest_face(&faces).ok_or(DetectError::NoFaceDetected)?;
        Ok(canonicalize(&gray, face)?)
    }

    /// Enroll (or replace) a single identity from one image.
    pub fn enroll(
        &mut self,
        name: &str,
        image: &DynamicImage,
        now: DateTime<Utc>,
    ) -> Result<(), EnrollError> {
        let template = self.template_from(image).map_err(|err| match err {
            RecognizeError::Detect(e) => EnrollError::Detect(e),
            RecognizeError::Canonicalize(e) => EnrollError::Canonicalize(e),
        })?;
        self.gallery.enroll(name, template, now);
        tracing::info!(name, "identity enrolled");
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<(), GalleryError> {
        self.gallery.remove(name)?;
        tracing::info!(name, "identity removed");
        Ok(())
    }

    /// Identify the face in `image` and gate the result through the
    /// cooldown state machine.
    pub fn recognize(
        &mut self,
        image: &DynamicImage,
        now: DateTime<Utc>,
    ) -> Result<MatchOutcome, RecognizeError> {
        let probe = self.template_from(image)?;
        let result = self.engine.find_best_match(&probe, &self.gallery);

        let identity = match (result.accepted, result.name) {
            (true, Some(name)) => name,
            _ => {
                tracing::debug!(best_score = result.score, "probe not recognized");
                return Ok(MatchOutcome::NotRecognized { best_score: result.score });
            }
        };

        match self.gate.check(&identity, result.score, now) {
            GateDecision::Record(event) => Ok(MatchOutcome::Recorded {
                identity: event.identity,
                confidence: event.confidence,
            }),
            GateDecision::Suppress {
                identity,
                remaining_seconds,
            } => Ok(MatchOutcome::Suppressed {
                identity,
                remaining_seconds,
            }),
        }
    }

    /// Rebuild the gallery from enrollment sources, replacing the current
    /// one ONLY if the rebuild produced at least one entry.
    pub fn rebuild(
        &mut self,
        sources: &[EnrollmentSource],
        now: DateTime<Utc>,
    ) -> Result<RebuildReport, RebuildError> {
        let (gallery, report) =
            TrainingPipeline::rebuild(self.detector.as_mut(), sources, now)?;
        self.gallery = gallery;
        Ok(report)
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            trained: !self.gallery.is_empty(),
            entry_count: self.gallery.len(),
            names: self.gallery.names(),
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }
}
