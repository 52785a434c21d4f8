//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `telemetry.toml`.
//!     loads configuration from file or falls back to defaults,
//!     then applies command line overrides. nothing here logs: the
//!     subscriber is configured from the result.
//!
//! structure:
//!     - ServerConfig: bind address, port, and the request body cap.
//!     - LoggingConfig: default log level and device state dumps.
//!     - CliArgs: --port / --config flags.
//!
//! ==============================================================================

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

/// 1 MiB, the largest ingest body accepted by default
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// used when RUST_LOG is not set
    pub level: String,
    /// dump each device's aggregate at debug level after a merge
    pub log_device_state: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_device_state: false,
        }
    }
}

/// Command line flags
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "device-telemetry", about = "Start the device telemetry web server")]
pub struct CliArgs {
    /// web server port (overrides the config file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// path to a telemetry.toml
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl TelemetryConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// First default location that exists, if any
    pub fn locate() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config").join("telemetry.toml"),
            PathBuf::from("..").join("config").join("telemetry.toml"),
        ];
        paths.into_iter().find(|path| path.exists())
    }

    /// Resolve the effective configuration for a run.
    ///
    /// `--config` wins over the default locations, `--port` over the file.
    /// Returns the file the settings came from, `None` when using defaults.
    pub fn from_args(args: &CliArgs) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let source = args.config.clone().or_else(Self::locate);
        let mut config = match &source {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(port) = args.port {
            config.server.port = port;
        }
        Ok((config, source))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│        TELEMETRY CONFIGURATION          │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Listen: {:<31} │", self.listen_addr());
        println!("│ Max Body: {:<29} │", format!("{} bytes", self.server.max_body_bytes));
        println!("│ Log Level: {:<28} │", self.logging.level);
        println!("│ Device State Dumps: {:<19} │", self.logging.log_device_state);
        println!("└─────────────────────────────────────────┘");
    }
}
