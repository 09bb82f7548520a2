//! rollcall-core — face matching and attendance gating.
//!
//! Canonicalizes detected face regions into fixed-size templates, scores
//! probes against an in-memory gallery with a blended similarity metric,
//! and gates accepted matches through a per-identity cooldown so attendance
//! records at most once per window. Face detection itself is consumed
//! through the [`FaceDetector`] trait, never implemented here.

pub mod canonical;
pub mod detector;
pub mod gallery;
pub mod gate;
pub mod matcher;
pub mod pipeline;
pub mod service;
pub mod types;

pub use canonical::{canonicalize, CanonicalizeError, CANONICAL_SIZE};
pub use detector::{detect_with_retry, largest_face, DetectError, DetectParams, FaceDetector};
pub use gallery::{Gallery, GalleryError};
pub use gate::{AttendanceGate, GateDecision, DEFAULT_COOLDOWN_SECS};
pub use matcher::{BlendedPolicy, MatchEngine, MatchPolicy, ScoreError, ACCEPT_THRESHOLD};
pub use pipeline::{EnrollmentSource, RebuildError, RebuildReport, TrainingPipeline};
pub use service::{AttendanceService, EnrollError, MatchOutcome, RecognizeError, ServiceStatus};
pub use types::{AttendanceEvent, FaceRect, FaceTemplate, GalleryEntry, MatchResult};
