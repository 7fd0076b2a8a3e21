//! Typed failures of the recognition pipeline.
//!
//! Every variant is contained at the smallest unit it affects (line, image or
//! batch item); only [`OcrError::EmptyBatch`] ever reaches an HTTP caller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    /// Image bytes could not be decoded.
    #[error("Failed to decode image: {0}")]
    InvalidImage(String),

    /// The text detector failed or was unreachable.
    #[error("Text detection failed: {0}")]
    Detection(String),

    /// The scoring function raised during inference.
    #[error("Scoring function failed: {0}")]
    #[cfg_attr(not(any(test, feature = "onnx")), allow(dead_code))]
    Scoring(String),

    /// The scoring function returned logits of an unexpected shape.
    #[error("Unexpected scorer output: {0}")]
    InvalidOutput(String),

    /// A batch was submitted without any items.
    #[error("Batch contains no items")]
    EmptyBatch,

    /// Every engine in the pool was lost and none could be rebuilt.
    #[error("Engine pool unavailable")]
    Pool,
}

impl From<image::ImageError> for OcrError {
    fn from(err: image::ImageError) -> Self {
        OcrError::InvalidImage(err.to_string())
    }
}
