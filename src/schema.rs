//! HTTP request/response types.
//!
//! Images travel as base64 strings. Legacy `language` / `psm` fields sent by
//! older clients are accepted and ignored (unknown fields are not rejected).

use crate::orchestrator::{JobItem, JobResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct SingleTextRequest {
    #[serde(default)]
    pub image_bytes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SingleTextResponse {
    pub success: bool,
    /// Lines joined by a single space.
    pub text: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct MultipleTextRequest {
    #[serde(default)]
    pub image_bytes_list: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MultipleTextResponse {
    pub success: bool,
    pub texts: Vec<String>,
    pub lines_arrays: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct BatchItem {
    pub id: String,
    pub image_bytes: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub items: Vec<BatchItem>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub results: Vec<JobResult>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub model_path: String,
    pub image_width: u32,
    pub image_height: u32,
    pub max_len: usize,
    pub vocab_size: usize,
    pub workers: usize,
    pub detector: String,
}

/// Decode a base64 payload into a job item. Invalid base64 becomes an empty
/// byte buffer so the failure stays isolated to this item.
pub fn job_item(id: String, encoded: &str) -> JobItem {
    let image_bytes = BASE64.decode(encoded.trim()).unwrap_or_else(|e| {
        warn!("Item {}: invalid base64 payload: {}", id, e);
        Vec::new()
    });
    JobItem { id, image_bytes }
}

/// Split a newline-joined transcription into its lines. An empty
/// transcription is a single empty line.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n').map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_item_decodes_base64() {
        let item = job_item("a".into(), &BASE64.encode(b"\x89PNG"));
        assert_eq!(item.image_bytes, b"\x89PNG");
    }

    #[test]
    fn test_invalid_base64_is_isolated() {
        let item = job_item("bad".into(), "***not base64***");
        assert_eq!(item.id, "bad");
        assert!(item.image_bytes.is_empty());
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("one\ntwo"), vec!["one", "two"]);
        assert_eq!(split_lines(""), vec![""]);
    }

    #[test]
    fn test_legacy_fields_are_ignored() {
        let req: SingleTextRequest =
            serde_json::from_str(r#"{"image_bytes":"AAAA","language":"ara","psm":3}"#).unwrap();
        assert_eq!(req.image_bytes.as_deref(), Some("AAAA"));
    }
}
