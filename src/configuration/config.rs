use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::{CommandFactory, Parser};
use std::fs;
use std::path::{Path, PathBuf};

/// Command-line surface of the recorder.
///
/// ```text
/// hcapture [-i <interface>] [-r <capture-file>|-] [-p <port>] [-c <config.toml>] <output-file>
/// ```
///
/// Flags given here override the matching settings of the configuration file.
#[derive(Parser, Debug, Clone)]
#[command(name = "hcapture")]
#[command(version)]
#[command(about = "Record reassembled TCP streams into a compact binary event log")]
pub struct Args {
    /// Network interface to capture on
    ///
    /// Without `-i` and `-r`, the capture tool's default interface is used.
    #[arg(short = 'i', long = "interface", conflicts_with = "read")]
    pub interface: Option<String>,

    /// Read packets from a pcap/pcapng file instead of capturing live
    ///
    /// Use `-` to read a capture stream from standard input.
    #[arg(short = 'r', long = "read")]
    pub read: Option<PathBuf>,

    /// Destination port of the connections to record
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Optional TOML configuration file
    #[arg(short = 'c', long = "config", env = "HCAPTURE_CONFIG")]
    pub config: Option<PathBuf>,

    /// File the event log is written to (created or truncated)
    pub output: PathBuf,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub output: PathBuf,
    pub source: CaptureSource,
    pub admission_port: u16,
    pub snaplen: u32,
    pub on_write_error: WriteErrorPolicy,
    pub max_pending_bytes: usize,
    pub max_connections: usize,
}

/// Usage line printed next to configuration errors.
pub fn usage() -> String {
    Args::command().render_usage().to_string()
}

impl FileConfig {
    /// Loads settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }
}

impl Config {
    /// Parses the process arguments and resolves them against the optional
    /// configuration file.
    ///
    /// # Panics
    /// Never panics; clap prints usage and exits the process on malformed
    /// arguments, before any capture begins.
    pub fn from_args() -> Result<Self, ConfigError> {
        Self::resolve(Args::parse())
    }

    pub fn resolve(args: Args) -> Result<Self, ConfigError> {
        let file = match args.config {
            Some(ref path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };

        let admission_port = args.port.unwrap_or(file.admission_port);
        if admission_port == 0 {
            return Err(ConfigError::InvalidPort(
                "admission port must be between 1 and 65535".to_string(),
            ));
        }
        if file.snaplen == 0 {
            return Err(ConfigError::InvalidSnaplen(
                "snaplen must be greater than 0".to_string(),
            ));
        }

        if file.max_connections == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        let source = match args.read {
            Some(path) if path.as_os_str() == "-" => CaptureSource::Stdin,
            Some(path) => CaptureSource::File(path),
            None => CaptureSource::Live {
                interface: args.interface.or(file.interface),
                tool: file.capture_tool,
            },
        };

        Ok(Config {
            output: args.output,
            source,
            admission_port,
            snaplen: file.snaplen,
            on_write_error: file.on_write_error,
            max_pending_bytes: file.max_pending_bytes,
            max_connections: file.max_connections,
        })
    }
}
