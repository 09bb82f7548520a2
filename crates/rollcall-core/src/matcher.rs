//! Multi-metric similarity scoring and best-match selection.
//!
//! The active policy blends three independent sub-metrics over the canonical
//! pixel buffers: structural match (zero-mean normalized cross-correlation),
//! histogram correlation, and inverse mean-squared pixel error. The blend is
//! calibrated to roughly [0, 1] with a 0.6 acceptance threshold.

use crate::gallery::Gallery;
use crate::types::{FaceTemplate, MatchResult};
use thiserror::Error;

/// Minimum combined score for a best match to count as an identification.
pub const ACCEPT_THRESHOLD: f32 = 0.6;

const WEIGHT_STRUCTURAL: f32 = 0.5;
const WEIGHT_HISTOGRAM: f32 = 0.3;
const WEIGHT_PIXEL_ERROR: f32 = 0.2;
/// MSE at which the inverse pixel-error metric bottoms out at zero.
const MSE_NORMALIZER: f32 = 10_000.0;

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("template buffer does not match its declared dimensions")]
    MalformedTemplate,
}

/// Strategy for scoring a probe template against one gallery template.
///
/// Scores are similarities: higher is better, and the engine's threshold is
/// a lower bound. A distance-scored policy (such as the legacy trained
/// classifier with its "below 80" rule) is numerically incompatible and
/// would need to plug in here with its own threshold.
pub trait MatchPolicy: Send {
    fn score(&self, probe: &FaceTemplate, candidate: &FaceTemplate) -> Result<f32, ScoreError>;
}

/// The active scoring policy: 0.5·structural + 0.3·histogram + 0.2·inverse
/// pixel error.
pub struct BlendedPolicy;

impl MatchPolicy for BlendedPolicy {
    fn score(&self, probe: &FaceTemplate, candidate: &FaceTemplate) -> Result<f32, ScoreError> {
        if !probe.is_well_formed() || !candidate.is_well_formed() {
            return Err(ScoreError::MalformedTemplate);
        }

        // Bring the stored template to the probe's dimensions, never the
        // reverse.
        let resized;
        let candidate = if candidate.size() != probe.size() {
            resized = candidate.resized(probe.size());
            &resized
        } else {
            candidate
        };

        let structural = structural_score(probe.pixels(), candidate.pixels());
        let histogram = histogram_score(probe, candidate);
        let pixel_error = inverse_pixel_error(probe.pixels(), candidate.pixels());

        Ok(WEIGHT_STRUCTURAL * structural
            + WEIGHT_HISTOGRAM * histogram
            + WEIGHT_PIXEL_ERROR * pixel_error)
    }
}

/// Zero-mean normalized cross-correlation of two equal-length pixel buffers.
///
/// 1.0 for identical structure, 0.0 when either buffer is flat.
fn structural_score(a: &[u8], b: &[u8]) -> f32 {
    let n = a.len() as f32;
    let mean_a = a.iter().map(|&p| p as f32).sum::<f32>() / n;
    let mean_b = b.iter().map(|&p| p as f32).sum::<f32>() / n;

    let mut num = 0.0f32;
    let mut var_a = 0.0f32;
    let mut var_b = 0.0f32;
    for (&pa, &pb) in a.iter().zip(b.iter()) {
        let da = pa as f32 - mean_a;
        let db = pb as f32 - mean_b;
        num += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom > 0.0 {
        num / denom
    } else {
        0.0
    }
}

/// Pearson correlation of the two intensity histograms, each independently
/// normalized to unit mass.
fn histogram_score(a: &FaceTemplate, b: &FaceTemplate) -> f32 {
    let total_a = a.pixels().len() as f32;
    let total_b = b.pixels().len() as f32;
    let hist_a = a.histogram().map(|c| c as f32 / total_a);
    let hist_b = b.histogram().map(|c| c as f32 / total_b);
    correlation(&hist_a, &hist_b)
}

fn correlation(xs: &[f32; 256], ys: &[f32; 256]) -> f32 {
    let n = xs.len() as f32;
    let mean_x = xs.iter().sum::<f32>() / n;
    let mean_y = ys.iter().sum::<f32>() / n;

    let mut num = 0.0f32;
    let mut var_x = 0.0f32;
    let mut var_y = 0.0f32;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        num += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom > 0.0 {
        num / denom
    } else {
        0.0
    }
}

/// Mean squared pixel difference folded into a similarity:
/// `max(0, 1 − mse / 10000)`.
fn inverse_pixel_error(a: &[u8], b: &[u8]) -> f32 {
    let n = a.len() as f32;
    let mse = a
        .iter()
        .zip(b.iter())
        .map(|(&pa, &pb)| {
            let d = pa as f32 - pb as f32;
            d * d
        })
        .sum::<f32>()
        / n;
    (1.0 - mse / MSE_NORMALIZER).max(0.0)
}

/// Scans the gallery exhaustively and applies the acceptance threshold.
pub struct MatchEngine {
    policy: Box<dyn MatchPolicy>,
    threshold: f32,
}

impl MatchEngine {
    pub fn new() -> Self {
        Self::with_policy(Box::new(BlendedPolicy), ACCEPT_THRESHOLD)
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self::with_policy(Box::new(BlendedPolicy), threshold)
    }

    pub fn with_policy(policy: Box<dyn MatchPolicy>, threshold: f32) -> Self {
        Self { policy, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Score the probe against every gallery entry and pick the best.
    ///
    /// Full linear scan, no early termination; ties keep the entry
    /// encountered first. An entry that fails to score is logged and
    /// skipped, never fatal to the scan. An empty gallery yields a
    /// non-accepted result with score 0.
    pub fn find_best_match(&self, probe: &FaceTemplate, gallery: &Gallery) -> MatchResult {
        let mut best_score = f32::NEG_INFINITY;
        let mut best_name: Option<&str> = None;

        for entry in gallery.entries() {
            match self.policy.score(probe, &entry.template) {
                Ok(score) => {
                    if score > best_score {
                        best_score = score;
                        best_name = Some(&entry.name);
                    }
                }
                Err(err) => {
                    tracing::warn!(name = %entry.name, error = %err, "skipping unscorable gallery entry");
                }
            }
        }

        match best_name {
            Some(name) if best_score >= self.threshold => MatchResult {
                name: Some(name.to_string()),
                score: best_score,
                accepted: true,
            },
            Some(_) => MatchResult {
                name: None,
                score: best_score,
                accepted: false,
            },
            None => MatchResult {
                name: None,
                score: 0.0,
                accepted: false,
            },
        }
    }
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn textured_template(seed: u8) -> FaceTemplate {
        let pixels = (0..150 * 150)
            .map(|i| ((i as u32 * 31 + seed as u32 * 7) % 256) as u8)
            .collect();
        FaceTemplate::new(150, pixels)
    }

    fn gallery_of(entries: &[(&str, FaceTemplate)]) -> Gallery {
        let mut gallery = Gallery::new();
        for (name, template) in entries {
            gallery.enroll(name, template.clone(), Utc::now());
        }
        gallery
    }

    /// Fixed-score policy for exercising the engine independently of the
    /// pixel metrics.
    struct FixedPolicy(Vec<f32>);

    impl MatchPolicy for FixedPolicy {
        fn score(&self, _: &FaceTemplate, candidate: &FaceTemplate) -> Result<f32, ScoreError> {
            // Index scores by the candidate's first pixel.
            Ok(self.0[candidate.pixels()[0] as usize])
        }
    }

    fn tagged_template(tag: u8) -> FaceTemplate {
        let mut pixels = vec![0u8; 4];
        pixels[0] = tag;
        FaceTemplate::new(2, pixels)
    }

    #[test]
    fn test_identical_templates_score_one() {
        let t = textured_template(3);
        let score = BlendedPolicy.score(&t, &t).unwrap();
        assert!((score - 1.0).abs() < 1e-4, "score = {score}");
    }

    #[test]
    fn test_blend_deterministic() {
        let a = textured_template(1);
        let b = textured_template(9);
        let s1 = BlendedPolicy.score(&a, &b).unwrap();
        let s2 = BlendedPolicy.score(&a, &b).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_candidate_resized_to_probe() {
        // Stored template at a different resolution still scores high
        // against a probe of the same (smooth) pattern.
        let probe = FaceTemplate::new(
            150,
            (0..150 * 150)
                .map(|i| if i % 150 < 75 { 50u8 } else { 200u8 })
                .collect(),
        );
        let small = probe.resized(100);
        let score = BlendedPolicy.score(&probe, &small).unwrap();
        assert!(score > 0.8, "score = {score}");
    }

    #[test]
    fn test_malformed_candidate_rejected() {
        let probe = textured_template(0);
        let bad = FaceTemplate::new(150, vec![0u8; 7]);
        assert!(matches!(
            BlendedPolicy.score(&probe, &bad),
            Err(ScoreError::MalformedTemplate)
        ));
    }

    #[test]
    fn test_find_best_match_deterministic() {
        let probe = textured_template(2);
        let gallery = gallery_of(&[
            ("alice", textured_template(5)),
            ("bob", textured_template(2)),
        ]);
        let engine = MatchEngine::new();
        let a = engine.find_best_match(&probe, &gallery);
        let b = engine.find_best_match(&probe, &gallery);
        assert_eq!(a.name, b.name);
        assert_eq!(a.score, b.score);
        assert_eq!(a.accepted, b.accepted);
    }

    #[test]
    fn test_empty_gallery_not_accepted() {
        let engine = MatchEngine::new();
        let result = engine.find_best_match(&textured_template(0), &Gallery::new());
        assert!(!result.accepted);
        assert_eq!(result.score, 0.0);
        assert!(result.name.is_none());
    }

    #[test]
    fn test_best_entry_wins_across_full_scan() {
        // Best match placed last to prove there is no early exit.
        let probe = textured_template(4);
        let gallery = gallery_of(&[
            ("decoy1", textured_template(90)),
            ("decoy2", textured_template(171)),
            ("target", textured_template(4)),
        ]);
        let result = MatchEngine::new().find_best_match(&probe, &gallery);
        assert!(result.accepted);
        assert_eq!(result.name.as_deref(), Some("target"));
    }

    #[test]
    fn test_threshold_boundary_accepts_exact() {
        let mut scores = vec![0.0f32; 256];
        scores[1] = 0.6;
        let engine = MatchEngine::with_policy(Box::new(FixedPolicy(scores)), ACCEPT_THRESHOLD);
        let gallery = gallery_of(&[("edge", tagged_template(1))]);
        let result = engine.find_best_match(&tagged_template(0), &gallery);
        assert!(result.accepted, "score exactly at threshold must accept");
        assert_eq!(result.name.as_deref(), Some("edge"));
    }

    #[test]
    fn test_threshold_boundary_rejects_just_below() {
        let mut scores = vec![0.0f32; 256];
        scores[1] = 0.599_999;
        let engine = MatchEngine::with_policy(Box::new(FixedPolicy(scores)), ACCEPT_THRESHOLD);
        let gallery = gallery_of(&[("edge", tagged_template(1))]);
        let result = engine.find_best_match(&tagged_template(0), &gallery);
        assert!(!result.accepted);
        assert!(result.name.is_none());
        // Best score is still surfaced for diagnostics.
        assert!((result.score - 0.599_999).abs() < 1e-6);
    }

    #[test]
    fn test_tie_keeps_first_entry() {
        let scores = vec![0.7f32; 256];
        let engine = MatchEngine::with_policy(Box::new(FixedPolicy(scores)), ACCEPT_THRESHOLD);
        let gallery = gallery_of(&[
            ("first", tagged_template(1)),
            ("second", tagged_template(2)),
        ]);
        let result = engine.find_best_match(&tagged_template(0), &gallery);
        assert_eq!(result.name.as_deref(), Some("first"));
    }

    #[test]
    fn test_malformed_entry_skipped_not_fatal() {
        let probe = textured_template(6);
        let mut gallery = Gallery::new();
        gallery.enroll("broken", FaceTemplate::new(150, vec![1u8; 3]), Utc::now());
        gallery.enroll("good", textured_template(6), Utc::now());
        let result = MatchEngine::new().find_best_match(&probe, &gallery);
        assert!(result.accepted);
        assert_eq!(result.name.as_deref(), Some("good"));
    }

    #[test]
    fn test_all_entries_malformed_yields_empty_result() {
        let probe = textured_template(6);
        let mut gallery = Gallery::new();
        gallery.enroll("broken", FaceTemplate::new(10, vec![]), Utc::now());
        let result = MatchEngine::new().find_best_match(&probe, &gallery);
        assert!(!result.accepted);
        assert_eq!(result.score, 0.0);
    }
}
