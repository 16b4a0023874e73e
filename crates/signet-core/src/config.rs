//! Service configuration, stored as JSON on disk.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found")]
    NotFound,
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Workflow engine configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FlowConfig {
    /// Public base URL used to build signer and document links,
    /// e.g. "https://sign.example.com".
    pub base_url: String,
    /// Default envelope lifetime applied at send when no explicit due date
    /// is set; `None` means envelopes don't expire by default.
    #[serde(default)]
    pub default_expiry_days: Option<i64>,
    /// How many times a signing transaction is retried on contention before
    /// giving up.
    #[serde(default = "default_sign_retries")]
    pub sign_retries: u32,
}

fn default_sign_retries() -> u32 {
    3
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            default_expiry_days: Some(30),
            sign_retries: default_sign_retries(),
        }
    }
}

impl FlowConfig {
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound
            } else {
                ConfigError::Read(e)
            }
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self)?)?;
        Ok(())
    }

    /// Signing link for a signer token.
    pub fn sign_url(&self, token: &str) -> String {
        format!("{}/sign/{}", self.base_url.trim_end_matches('/'), token)
    }

    /// Public envelope link for a slug.
    pub fn envelope_url(&self, slug: &str) -> String {
        format!("{}/e/{}", self.base_url.trim_end_matches('/'), slug)
    }
}
