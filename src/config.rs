//! Service configuration.
//!
//! Loaded from an optional JSON file (`OCR_CONFIG_PATH`) and then overridden
//! by individual environment variables. Canvas size, `max_len` and the
//! character list must match the exported model exactly.

use crate::segment::DEFAULT_LINE_THRESHOLD;
use crate::vocab::{Vocabulary, ALPHABET};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Exported recognition model.
    pub model_path: PathBuf,
    /// Base URL of the detector sidecar; whole-image mode when unset.
    pub detector_url: Option<String>,
    pub bind_addr: String,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub max_len: usize,
    /// Vertical distance (pixels) under which consecutive boxes share a line.
    pub line_threshold: f32,
    pub worker_timeout_secs: u64,
    /// Engine pool size; defaults to the available parallelism.
    pub workers: Option<usize>,
    /// Intra-op threads per scorer session.
    pub intra_threads: usize,
    /// Ordered alphabet; the built-in list when absent.
    pub characters: Option<Vec<char>>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./exported_model/ocr_model.onnx"),
            detector_url: None,
            bind_addr: "0.0.0.0:5500".to_string(),
            canvas_width: 1024,
            canvas_height: 64,
            max_len: 350,
            line_threshold: DEFAULT_LINE_THRESHOLD,
            worker_timeout_secs: 30,
            workers: None,
            intra_threads: 1,
            characters: None,
        }
    }
}

impl OcrConfig {
    /// Read `OCR_CONFIG_PATH` if set, then apply env overrides and validate.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("OCR_CONFIG_PATH") {
            Ok(path) => Self::load_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config: OcrConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {:?}", path))?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = var("OCR_MODEL_PATH") {
            self.model_path = PathBuf::from(path);
        }
        if let Some(url) = var("DETECTOR_URL") {
            self.detector_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(addr) = var("OCR_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(workers) = parse_var(&var, "OCR_WORKERS")? {
            self.workers = Some(workers);
        }
        if let Some(secs) = parse_var(&var, "OCR_WORKER_TIMEOUT_SECS")? {
            self.worker_timeout_secs = secs;
        }
        if let Some(threshold) = parse_var(&var, "OCR_LINE_THRESHOLD")? {
            self.line_threshold = threshold;
        }
        if let Some(max_len) = parse_var(&var, "OCR_MAX_LEN")? {
            self.max_len = max_len;
        }
        if let Some(threads) = parse_var(&var, "OCR_INTRA_THREADS")? {
            self.intra_threads = threads;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            anyhow::bail!(
                "Canvas must be non-empty, got {}x{}",
                self.canvas_width,
                self.canvas_height
            );
        }
        if self.max_len == 0 {
            anyhow::bail!("max_len must be at least 1");
        }
        if self.workers == Some(0) {
            anyhow::bail!("workers must be at least 1");
        }
        if !(self.line_threshold > 0.0) {
            anyhow::bail!("line_threshold must be positive, got {}", self.line_threshold);
        }
        if self.characters.as_ref().is_some_and(|c| c.is_empty()) {
            anyhow::bail!("characters must not be empty");
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn vocabulary(&self) -> Vocabulary {
        match &self.characters {
            Some(chars) => Vocabulary::new(chars),
            None => Vocabulary::new(&ALPHABET),
        }
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid {}: {:?}", key, raw))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_model() {
        let config = OcrConfig::default();
        assert_eq!((config.canvas_width, config.canvas_height), (1024, 64));
        assert_eq!(config.max_len, 350);
        assert_eq!(config.worker_timeout(), Duration::from_secs(30));
        assert_eq!(config.vocabulary().len(), 112);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut config = OcrConfig::default();
        config
            .apply_env(env(&[
                ("DETECTOR_URL", "http://detector:3002/"),
                ("OCR_WORKERS", "3"),
                ("OCR_WORKER_TIMEOUT_SECS", "5"),
                ("OCR_LINE_THRESHOLD", "12.5"),
            ]))
            .unwrap();
        assert_eq!(config.detector_url.as_deref(), Some("http://detector:3002"));
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.worker_timeout_secs, 5);
        assert_eq!(config.line_threshold, 12.5);
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut config = OcrConfig::default();
        let err = config
            .apply_env(env(&[("OCR_MAX_LEN", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("OCR_MAX_LEN"));
    }

    #[test]
    fn test_validate_rejects_degenerate_values() {
        let config = OcrConfig {
            max_len: 0,
            ..OcrConfig::default()
        };
        assert!(config.validate().is_err());

        let config = OcrConfig {
            workers: Some(0),
            ..OcrConfig::default()
        };
        assert!(config.validate().is_err());

        let config = OcrConfig {
            line_threshold: f32::NAN,
            ..OcrConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"canvas_width": 512, "max_len": 100, "characters": ["a", "b"]}}"#
        )
        .unwrap();

        let config = OcrConfig::load_file(file.path()).unwrap();
        assert_eq!(config.canvas_width, 512);
        assert_eq!(config.canvas_height, 64);
        assert_eq!(config.max_len, 100);
        assert_eq!(config.vocabulary().len(), 6);
    }
}
