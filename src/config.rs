//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.typeprobe.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cli::Args;
use crate::models::{AnalysisRequest, TYPE_MAPPER, TYPE_REDUCER};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Analysis service settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Analysis program settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Report output file path; stdout when unset.
    #[serde(default)]
    pub output: Option<String>,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// Analysis service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// WebSocket endpoint of the analysis service.
    #[serde(default = "default_server_url")]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_server_url() -> String {
    "wss://dispatch.replay.io".to_string()
}

fn default_timeout() -> u64 {
    120
}

/// Analysis program settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Path to a file with mapper program text; built-in when unset.
    #[serde(default)]
    pub mapper: Option<String>,

    /// Path to a file with reducer program text; built-in when unset.
    #[serde(default)]
    pub reducer: Option<String>,

    /// Submit analyses as effectful.
    #[serde(default)]
    pub effectful: bool,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(".typeprobe.toml");

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings; options
    /// without an explicit CLI value leave the config untouched.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref server) = args.server {
            self.server.url = server.clone();
        }
        if let Some(timeout) = args.timeout {
            self.server.timeout_seconds = timeout;
        }

        if let Some(ref mapper) = args.mapper {
            self.analysis.mapper = Some(mapper.display().to_string());
        }
        if let Some(ref reducer) = args.reducer {
            self.analysis.reducer = Some(reducer.display().to_string());
        }
        if args.effectful {
            self.analysis.effectful = true;
        }

        if let Some(ref output) = args.output {
            self.general.output = Some(output.display().to_string());
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Build the analysis payload, reading program overrides from disk
    /// when configured.
    pub fn analysis_request(&self) -> Result<AnalysisRequest> {
        let mapper = match &self.analysis.mapper {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read mapper file: {}", path))?,
            None => TYPE_MAPPER.to_string(),
        };
        let reducer = match &self.analysis.reducer {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read reducer file: {}", path))?,
            None => TYPE_REDUCER.to_string(),
        };
        Ok(AnalysisRequest {
            mapper,
            reducer,
            effectful: self.analysis.effectful,
        })
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
