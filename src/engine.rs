//! Greedy autoregressive decoding over a sequence-scoring model.

use crate::error::OcrError;
use crate::normalize::Normalizer;
use crate::ocr::SequenceScorer;
use crate::vocab::{Token, Vocabulary, END_TOKEN, PAD_TOKEN, START_TOKEN};
use image::RgbImage;
use ndarray::{Array2, Array4, ArrayView1, Axis, Ix3};
use std::sync::Arc;
use tracing::{debug, warn};

/// One recognition engine: a scorer handle plus the tables it was trained
/// against. Not shared across workers; see [`crate::orchestrator::EnginePool`].
pub struct RecognitionEngine {
    scorer: Box<dyn SequenceScorer>,
    vocab: Arc<Vocabulary>,
    normalizer: Normalizer,
    max_len: usize,
}

impl RecognitionEngine {
    pub fn new(
        scorer: Box<dyn SequenceScorer>,
        vocab: Arc<Vocabulary>,
        normalizer: Normalizer,
        max_len: usize,
    ) -> Self {
        Self {
            scorer,
            vocab,
            normalizer,
            max_len,
        }
    }

    /// Recognize one image, dropping to an empty string if the scorer fails.
    pub fn recognize(&mut self, image: &RgbImage) -> String {
        self.try_recognize(image).unwrap_or_else(|e| {
            warn!("RecognitionEngine: decode aborted: {}", e);
            String::new()
        })
    }

    /// Normalize, decode and detokenize one image.
    pub fn try_recognize(&mut self, image: &RgbImage) -> Result<String, OcrError> {
        let tensor = self.normalizer.normalize(image);
        let tokens = self.decode_tokens(&tensor)?;
        Ok(self.vocab.decode_sequence(&tokens))
    }

    /// Run the greedy loop. The returned sequence never contains the start
    /// or end token and holds at most `max_len` entries.
    pub fn decode_tokens(&mut self, image: &Array4<f32>) -> Result<Vec<Token>, OcrError> {
        let mut sequence: Vec<Token> = vec![START_TOKEN];
        let mut generated = Vec::new();

        for step in 0..self.max_len {
            let padded = pad_sequence(&sequence, self.max_len);
            let logits = self.scorer.score(image, &padded)?;
            let logits = logits
                .into_dimensionality::<Ix3>()
                .map_err(|e| OcrError::InvalidOutput(e.to_string()))?;

            let shape = logits.shape();
            if shape[0] == 0 || shape[1] <= step || shape[2] == 0 {
                return Err(OcrError::InvalidOutput(format!(
                    "logits shape {:?} has no slot for step {}",
                    shape, step
                )));
            }

            let step_logits = logits.index_axis(Axis(0), 0);
            let next = argmax(step_logits.index_axis(Axis(0), step));
            if next == END_TOKEN {
                break;
            }
            sequence.push(next);
            generated.push(next);
        }

        debug!("RecognitionEngine: decoded {} tokens", generated.len());
        Ok(generated)
    }
}

/// Right-pad the running sequence with the pad token to the fixed input length.
fn pad_sequence(sequence: &[Token], max_len: usize) -> Array2<i64> {
    let mut padded = Array2::<i64>::from_elem((1, max_len), PAD_TOKEN as i64);
    for (i, &token) in sequence.iter().take(max_len).enumerate() {
        padded[[0, i]] = token as i64;
    }
    padded
}

/// Index of the largest score; ties go to the lowest index and NaN never wins
/// (unlike numpy's `argmax`, which returns the first NaN).
fn argmax(scores: ArrayView1<f32>) -> Token {
    let mut best = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    for (i, &score) in scores.iter().enumerate() {
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    best as Token
}
