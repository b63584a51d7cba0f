//! Runtime configuration loaded from an optional JSON file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::detection::DEFAULT_CONTEXT;
use crate::error::{RedactorError, RedactorResult};
use crate::redaction::{PipelineOptions, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_THRESHOLD};

/// Environment variable overriding `detector.endpoint`.
pub const DETECTOR_URL_ENV: &str = "PDF_REDACTOR_DETECTOR_URL";

/// Remote detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Detection endpoint; pattern rules only when unset.
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
    pub context: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 30,
            context: DEFAULT_CONTEXT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunk_threshold: usize,
    pub chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl From<&PipelineConfig> for PipelineOptions {
    fn from(config: &PipelineConfig) -> Self {
        PipelineOptions {
            chunk_threshold: config.chunk_threshold,
            chunk_size: config.chunk_size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactorConfig {
    pub detector: DetectorConfig,
    pub pipeline: PipelineConfig,
    /// JSON file with additional templates.
    pub templates_path: Option<PathBuf>,
}

impl RedactorConfig {
    /// Reads a config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> RedactorResult<Self> {
        let raw = fs::read_to_string(path).map_err(|source| RedactorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|err| RedactorError::Config {
            reason: format!("{}: {}", path.display(), err),
        })
    }

    /// Loads `path` when given, otherwise defaults, then applies the
    /// environment and validates.
    pub fn resolve(path: Option<&Path>) -> RedactorResult<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies environment-style overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(DETECTOR_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.detector.endpoint = Some(url);
        }
    }

    pub fn validate(&self) -> RedactorResult<()> {
        if self.pipeline.chunk_size == 0 {
            return Err(RedactorError::Config {
                reason: "pipeline.chunk_size must be at least 1".to_string(),
            });
        }
        if self.detector.timeout_secs == 0 {
            return Err(RedactorError::Config {
                reason: "detector.timeout_secs must be at least 1".to_string(),
            });
        }
        if let Some(endpoint) = &self.detector.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(RedactorError::Config {
                    reason: format!("detector.endpoint '{}' is not an http(s) URL", endpoint),
                });
            }
        }
        Ok(())
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions::from(&self.pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RedactorConfig::default();
        assert_eq!(config.detector.timeout_secs, 30);
        assert_eq!(config.detector.context, "pharmaceutical");
        assert_eq!(config.pipeline.chunk_threshold, 20);
        assert_eq!(config.pipeline.chunk_size, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"pipeline": {{"chunk_size": 2}}}}"#).unwrap();

        let config = RedactorConfig::load(file.path()).unwrap();
        assert_eq!(config.pipeline.chunk_size, 2);
        assert_eq!(config.pipeline.chunk_threshold, 20);
        assert!(config.detector.endpoint.is_none());
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = RedactorConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, RedactorError::Config { .. }));
    }

    #[test]
    fn test_env_override() {
        let mut config = RedactorConfig::default();
        config.apply_overrides(|key| {
            (key == DETECTOR_URL_ENV).then(|| "http://localhost:3000/detect".to_string())
        });
        assert_eq!(
            config.detector.endpoint.as_deref(),
            Some("http://localhost:3000/detect")
        );

        config.apply_overrides(|_| Some("  ".to_string()));
        assert!(config.detector.endpoint.is_some());
    }

    #[test]
    fn test_validation() {
        let mut config = RedactorConfig::default();
        config.pipeline.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = RedactorConfig::default();
        config.detector.endpoint = Some("ftp://x".to_string());
        assert!(config.validate().is_err());
    }
}
