//! UltraFace face detector via ONNX Runtime.
//!
//! Backend for [`rollcall_core::FaceDetector`] using the
//! version-RFB-320 UltraFace model: a single-pass SSD with pre-generated
//! priors, so the output is already a flat (scores, boxes) pair and needs
//! no per-stride anchor decoding.

use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{DetectError, DetectParams, FaceDetector, FaceRect};
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const ULTRAFACE_INPUT_WIDTH: usize = 320;
const ULTRAFACE_INPUT_HEIGHT: usize = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.4;
/// Score threshold contributed by each required "neighbor": the primary
/// pass (5 neighbors) demands 0.70 confidence, the relaxed pass (3) 0.42.
const CONFIDENCE_PER_NEIGHBOR: f32 = 0.14;
const ULTRAFACE_MODEL_NAME: &str = "version-RFB-320.onnx";

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download {ULTRAFACE_MODEL_NAME} and place in models/")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Decoded detection before NMS.
#[derive(Debug, Clone)]
struct Detection {
    rect: FaceRect,
    score: f32,
}

/// UltraFace-backed face detector.
pub struct OnnxFaceDetector {
    session: Session,
}

impl OnnxFaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded UltraFace model"
        );

        Ok(Self { session })
    }

    /// Detect faces, honoring the pass parameters: `min_neighbors` sets the
    /// score threshold (see [`CONFIDENCE_PER_NEIGHBOR`]) and `min_size`
    /// drops boxes smaller than that side length in source pixels.
    pub fn detect_faces(
        &mut self,
        image: &GrayImage,
        params: &DetectParams,
    ) -> Result<Vec<FaceRect>, DetectorError> {
        let (width, height) = image.dimensions();
        let input = preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // UltraFace emits exactly two tensors: scores [1, N, 2] then
        // boxes [1, N, 4] with corner coordinates normalized to [0, 1].
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let detections = decode(
            scores,
            boxes,
            width,
            height,
            confidence_threshold(params.min_neighbors),
            params.min_size,
        );

        let kept = nms(detections, ULTRAFACE_NMS_THRESHOLD);
        tracing::debug!(faces = kept.len(), ?params, "detection pass complete");

        Ok(kept.into_iter().map(|d| d.rect).collect())
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(
        &mut self,
        image: &GrayImage,
        params: &DetectParams,
    ) -> Result<Vec<FaceRect>, DetectError> {
        self.detect_faces(image, params)
            .map_err(|e| DetectError::Backend(e.to_string()))
    }
}

/// Map the cascade-style neighbor count onto the SSD score scale.
fn confidence_threshold(min_neighbors: u32) -> f32 {
    (min_neighbors as f32 * CONFIDENCE_PER_NEIGHBOR).clamp(0.1, 0.95)
}

/// Stretch-resize the grayscale frame to the model input and normalize to
/// a NCHW float tensor with the luma replicated over three channels.
///
/// UltraFace's normalized box output makes the non-uniform stretch exact to
/// invert: coordinates scale straight back by source width and height, no
/// letterbox bookkeeping.
fn preprocess(image: &GrayImage) -> Array4<f32> {
    let resized = image::imageops::resize(
        image,
        ULTRAFACE_INPUT_WIDTH as u32,
        ULTRAFACE_INPUT_HEIGHT as u32,
        image::imageops::FilterType::Triangle,
    );

    let mut tensor =
        Array4::<f32>::zeros((1, 3, ULTRAFACE_INPUT_HEIGHT, ULTRAFACE_INPUT_WIDTH));
    for y in 0..ULTRAFACE_INPUT_HEIGHT {
        for x in 0..ULTRAFACE_INPUT_WIDTH {
            let pixel = resized.get_pixel(x as u32, y as u32).0[0] as f32;
            let normalized = (pixel - ULTRAFACE_MEAN) / ULTRAFACE_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    tensor
}

/// Decode raw (scores, boxes) tensors into source-coordinate detections.
///
/// `scores` holds [background, face] pairs per prior; `boxes` holds
/// normalized [x1, y1, x2, y2] per prior.
fn decode(
    scores: &[f32],
    boxes: &[f32],
    img_w: u32,
    img_h: u32,
    threshold: f32,
    min_size: u32,
) -> Vec<Detection> {
    let num_priors = scores.len() / 2;
    let mut detections = Vec::new();

    for i in 0..num_priors {
        let score = scores[i * 2 + 1];
        if score < threshold {
            continue;
        }

        let off = i * 4;
        if off + 3 >= boxes.len() {
            break;
        }
        let x1 = boxes[off] * img_w as f32;
        let y1 = boxes[off + 1] * img_h as f32;
        let x2 = boxes[off + 2] * img_w as f32;
        let y2 = boxes[off + 3] * img_h as f32;

        let width = x2 - x1;
        let height = y2 - y1;
        if width.min(height) < min_size as f32 {
            continue;
        }

        detections.push(Detection {
            rect: FaceRect { x: x1, y: y1, width, height },
            score,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections, best score wins.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(&k.rect, &det.rect) <= iou_threshold) {
            keep.push(det);
        }
    }

    keep
}

/// Intersection-over-Union of two rectangles.
fn iou(a: &FaceRect, b: &FaceRect) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
