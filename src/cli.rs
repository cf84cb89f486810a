//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// Typeprobe - parameter-type profiler for recorded executions
///
/// Open a recording on a replay analysis service, discover its scripts,
/// and sample the argument types observed at every function entry of one
/// script. The result is the script's source annotated line by line.
///
/// Examples:
///   typeprobe --recording 4a9c… --list
///   typeprobe --recording 4a9c… --script app.js
///   typeprobe --recording 4a9c… --script sc42 --format json -o types.json
///   typeprobe --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Recording to open
    ///
    /// The analysis session is bound to this recording. Can also be set
    /// via the TYPEPROBE_RECORDING env var.
    #[arg(short, long, value_name = "ID", env = "TYPEPROBE_RECORDING")]
    pub recording: Option<String>,

    /// WebSocket endpoint of the analysis service
    ///
    /// Overrides the [server] url from .typeprobe.toml when given.
    #[arg(long, value_name = "URL", env = "TYPEPROBE_SERVER")]
    pub server: Option<String>,

    /// List discovered scripts and exit
    #[arg(short, long)]
    pub list: bool,

    /// Script to analyze
    ///
    /// An exact script id, or a case-insensitive substring of a script
    /// url that matches exactly one discovered script.
    #[arg(short, long, value_name = "SCRIPT")]
    pub script: Option<String>,

    /// File containing mapper program text
    ///
    /// Defaults to the built-in parameter-type mapper.
    #[arg(long, value_name = "FILE")]
    pub mapper: Option<PathBuf>,

    /// File containing reducer program text
    ///
    /// Defaults to the built-in deduplicating reducer.
    #[arg(long, value_name = "FILE")]
    pub reducer: Option<PathBuf>,

    /// Submit the analysis as effectful
    #[arg(long)]
    pub effectful: bool,

    /// Output file path for the report; stdout when omitted
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .typeprobe.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .typeprobe.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // One of the two modes must be selected
        if !self.list && self.script.is_none() {
            return Err("Either --list or --script <SCRIPT> is required".to_string());
        }

        // Validate server URL scheme when given
        if let Some(ref server) = self.server {
            if !server.starts_with("ws://") && !server.starts_with("wss://") {
                return Err("Server URL must start with 'ws://' or 'wss://'".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        // Validate timeout if provided
        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        // Validate analysis program files if provided
        for (flag, path) in [("--mapper", &self.mapper), ("--reducer", &self.reducer)] {
            if let Some(path) = path {
                if !path.is_file() {
                    return Err(format!("{} file does not exist: {}", flag, path.display()));
                }
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
