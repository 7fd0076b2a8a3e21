//! ONNX Runtime sequence scorer.
//!
//! The exported model takes two positional inputs, the image tensor and the
//! padded token buffer, and returns the logits as its first output.

use super::SequenceScorer;
use crate::error::OcrError;
use ndarray::{Array2, Array4, ArrayD};
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::path::Path;
use tracing::info;

pub struct OnnxScorer {
    session: Session,
}

impl OnnxScorer {
    /// Load one independent session. Call once per engine-pool slot.
    pub fn from_file(model_path: &Path, intra_threads: usize) -> anyhow::Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level1)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)
            .map_err(|e| anyhow::anyhow!("Failed to load model {:?}: {e}", model_path))?;

        info!(
            "OnnxScorer: loaded {:?} ({} intra-op threads)",
            model_path, intra_threads
        );
        Ok(Self { session })
    }
}

impl SequenceScorer for OnnxScorer {
    fn score(
        &mut self,
        image: &Array4<f32>,
        tokens: &Array2<i64>,
    ) -> Result<ArrayD<f32>, OcrError> {
        let image_ref: TensorRef<f32> = TensorRef::from_array_view(image)
            .map_err(|e| OcrError::Scoring(format!("image tensor: {e}")))?;
        let tokens_ref: TensorRef<i64> = TensorRef::from_array_view(tokens)
            .map_err(|e| OcrError::Scoring(format!("token tensor: {e}")))?;

        let outputs = self
            .session
            .run(inputs![image_ref, tokens_ref])
            .map_err(|e| OcrError::Scoring(format!("inference failed: {e}")))?;

        let logits = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| OcrError::InvalidOutput(e.to_string()))?;
        Ok(logits.into_owned())
    }
}
