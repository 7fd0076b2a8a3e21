//! External recognition capabilities.
//!
//! Defines the [`TextDetector`] and [`SequenceScorer`] traits the pipeline is
//! written against, so the detector sidecar and the model runtime can be
//! swapped (or faked in tests) without touching the orchestrator.

#[cfg(feature = "onnx")]
pub mod onnx;
pub mod sidecar;

use crate::error::OcrError;
use crate::segment::DetectedBox;
use image::RgbImage;
use ndarray::{Array2, Array4, ArrayD};

/// Async text-region detector. Implementations must be pure with respect to
/// the image and safe to call from many workers at once.
#[async_trait::async_trait]
pub trait TextDetector: Send + Sync {
    fn name(&self) -> &str;
    async fn detect(&self, image: &RgbImage) -> anyhow::Result<Vec<DetectedBox>>;
}

/// Trained sequence-scoring function.
///
/// Takes the `(1, 3, H, W)` image tensor and the `(1, MAX_LEN)` padded token
/// buffer and returns logits shaped `(1, MAX_LEN, VOCAB)`. Handles are assumed
/// NOT safe for concurrent use, hence `&mut self`.
pub trait SequenceScorer: Send {
    fn score(&mut self, image: &Array4<f32>, tokens: &Array2<i64>)
        -> Result<ArrayD<f32>, OcrError>;
}

/// Detector used when no sidecar is configured: every page is recognized
/// as a single whole-image region.
pub struct NoDetector;

#[async_trait::async_trait]
impl TextDetector for NoDetector {
    fn name(&self) -> &str {
        "none"
    }

    async fn detect(&self, _image: &RgbImage) -> anyhow::Result<Vec<DetectedBox>> {
        Ok(Vec::new())
    }
}
