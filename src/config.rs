//! Configuration structures for the tuneserve system

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::{AdapterConfig, QuantizationMode};
use crate::error::{Error, Result};

/// Main configuration for the control plane
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Filesystem layout
    #[serde(default)]
    pub paths: PathsConfig,
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Training defaults and fixed hyperparameters
    #[serde(default)]
    pub training: TrainingConfig,
    /// Feedback-to-retrain loop settings
    #[serde(default)]
    pub retrain: RetrainConfig,
    /// Serving-time generation settings
    #[serde(default)]
    pub chat: ChatConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.training.max_steps == 0 {
            return Err(Error::config("Training step budget must be > 0"));
        }
        if self.training.learning_rate <= 0.0 {
            return Err(Error::config("Learning rate must be > 0"));
        }
        if self.training.batch_size == 0 {
            return Err(Error::config("Batch size must be > 0"));
        }
        if self.training.adapter.rank == 0 || self.training.adapter.rank > 64 {
            return Err(Error::config("Adapter rank must be between 1 and 64"));
        }
        if self.training.max_seq_len == 0 {
            return Err(Error::config("Sequence-length ceiling must be > 0"));
        }
        if self.retrain.threshold == 0 {
            return Err(Error::config("Retrain threshold must be > 0"));
        }
        if self.retrain.export_limit == 0 {
            return Err(Error::config("Retrain export limit must be > 0"));
        }
        Ok(())
    }

    /// Create every directory the control plane writes to
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.paths.data_dir)?;
        std::fs::create_dir_all(&self.paths.models_dir)?;
        std::fs::create_dir_all(&self.paths.export_dir)?;
        if let Some(parent) = self.paths.database.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// Filesystem layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Uploaded training-data files
    pub data_dir: PathBuf,
    /// One subdirectory per trained model
    pub models_dir: PathBuf,
    /// Auto-generated retrain exports
    pub export_dir: PathBuf,
    /// SQLite conversation database
    pub database: PathBuf,
    /// Local financial-resource directory file
    pub resources_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/uploads"),
            models_dir: PathBuf::from("models"),
            export_dir: PathBuf::from("data/auto_generated"),
            database: PathBuf::from("conversations.db"),
            resources_file: PathBuf::from("location_resources.json"),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Training defaults and fixed hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Base model used when a request does not name one
    pub default_base_model: String,
    /// Default step budget
    pub max_steps: u32,
    /// Default peak learning rate
    pub learning_rate: f64,
    /// Default per-device batch size
    pub batch_size: usize,
    /// Micro-batches accumulated per optimization step
    pub gradient_accumulation: usize,
    /// Warmup steps
    pub warmup_steps: u32,
    /// Weight decay constant
    pub weight_decay: f64,
    /// Sequence-length ceiling passed to the backend at load time
    pub max_seq_len: usize,
    /// Quantization mode for model loads
    pub quantization: QuantizationMode,
    /// Low-rank adapter configuration
    pub adapter: AdapterConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            default_base_model: "tinylm/base".to_string(),
            max_steps: 60,
            learning_rate: 2e-4,
            batch_size: 1,
            gradient_accumulation: 4,
            warmup_steps: 5,
            weight_decay: 0.01,
            max_seq_len: 2048,
            quantization: QuantizationMode::FourBit,
            adapter: AdapterConfig::default(),
        }
    }
}

/// Feedback-to-retrain loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainConfig {
    /// Unconsumed-conversation count that triggers a retrain cycle
    pub threshold: u64,
    /// Seconds between threshold checks
    pub poll_interval_secs: u64,
    /// Seconds to wait after a failed tick before the next check
    pub backoff_secs: u64,
    /// Maximum conversations exported per cycle
    pub export_limit: usize,
    /// Step budget for retrain runs
    pub max_steps: u32,
    /// Learning rate for retrain runs
    pub learning_rate: f64,
    /// Batch size for retrain runs
    pub batch_size: usize,
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            threshold: 50,
            poll_interval_secs: 3600,
            backoff_secs: 60,
            export_limit: 1000,
            max_steps: 50,
            learning_rate: 2e-4,
            batch_size: 1,
        }
    }
}

impl RetrainConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

/// Serving-time generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub max_tokens: usize,
    pub temperature: f64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.training.max_steps, 60);
        assert_eq!(config.retrain.threshold, 50);
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn zero_step_budget_is_rejected() {
        let mut config = Config::default();
        config.training.max_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_adapter_rank_is_rejected() {
        let mut config = Config::default();
        config.training.adapter.rank = 128;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config::default();
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.server.port, config.server.port);
        assert_eq!(loaded.training.adapter.rank, 16);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"server": {"host": "127.0.0.1", "port": 8080}}"#).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.server.port, 8080);
        assert_eq!(loaded.training.max_steps, 60);
    }
}
