//! Pipeline configuration
//!
//! Layered like the settlement engine's config: defaults, then a TOML
//! file, then environment variable overrides.

use recon_core::{ExtractionConfig, MatchingConfig, ReceiptConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Archive root directory
    pub archive_dir: PathBuf,

    /// Extraction engine configuration
    pub extraction: ExtractionConfig,

    /// Matching engine configuration
    pub matching: MatchingConfig,

    /// Receipt generator configuration
    pub receipt: ReceiptConfig,

    /// Archiving retry policy
    pub retry: RetryConfig,
}

/// Bounded exponential backoff for archiving writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Max attempts before surfacing a persistence failure
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds
    pub initial_delay_ms: u64,

    /// Max retry delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// Initial delay as a Duration
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Max delay as a Duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl PipelineConfig {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Defaults with environment variable overrides
    pub fn from_env() -> Self {
        let mut config = PipelineConfig {
            archive_dir: PathBuf::from("./data/archive"),
            ..Default::default()
        };

        if let Ok(dir) = std::env::var("RECON_ARCHIVE_DIR") {
            config.archive_dir = PathBuf::from(dir);
        }
        if let Ok(timeout) = std::env::var("RECON_RECOGNITION_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                config.extraction.recognition_timeout_ms = ms;
            }
        }
        if let Ok(attempts) = std::env::var("RECON_RETRY_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                config.retry.max_attempts = n;
            }
        }

        config
    }
}
