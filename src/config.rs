//! Configuration module for grab-a-file.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values. Defaults that depend
//! on the working directory are resolved here, once, so the server and client
//! only ever see explicit paths.

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::protocol::DEFAULT_CHUNK_SIZE;

/// Directory, relative to the working directory, served when none is configured.
const DEFAULT_BASE_SUBDIR: &str = "Images";

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "grab-a-file")]
#[command(author = "grab-a-file authors")]
#[command(version = "0.1.0")]
#[command(about = "Serve or fetch single files over TCP", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve files from a directory, one connection at a time
    Serve(ServeArgs),
    /// Request a file from a server and save it locally
    Fetch(FetchArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind to (e.g., 0.0.0.0:12345)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Directory requested names are resolved against
    #[arg(short = 'd', long)]
    pub base_dir: Option<PathBuf>,

    /// Bytes per read while streaming a file
    #[arg(long)]
    pub chunk_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Name of the file to request
    pub file: String,

    /// Server host name or address
    #[arg(short = 's', long)]
    pub server: Option<String>,

    /// Server port
    #[arg(short = 'p', long)]
    pub port: Option<u32>,

    /// Directory the fetched file is written to
    #[arg(short = 'o', long)]
    pub destination: Option<PathBuf>,

    /// Bytes per read while streaming the response
    #[arg(long)]
    pub chunk_size: Option<usize>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[server]` table
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub base_dir: Option<PathBuf>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            base_dir: None,
            chunk_size: default_chunk_size(),
        }
    }
}

/// `[client]` table
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_server")]
    pub server: String,
    /// Kept wider than `u16` so out-of-range values reach port validation
    #[serde(default = "default_port")]
    pub port: u32,
    pub destination: Option<PathBuf>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            server: default_server(),
            port: default_port(),
            destination: None,
            chunk_size: default_chunk_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:12345".to_string()
}

fn default_server() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u32 {
    12345
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved settings for the serving role
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen: String,
    pub base_dir: PathBuf,
    pub chunk_size: usize,
}

/// Resolved settings for the fetching role
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub server: String,
    /// Validated when the fetch starts
    pub port: u32,
    pub destination: PathBuf,
    pub chunk_size: usize,
}

#[derive(Debug, Clone)]
pub enum Role {
    Serve(ServerSettings),
    Fetch { settings: ClientSettings, file: String },
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse(), std::env::current_dir)
    }

    /// Merge parsed arguments with the TOML file they name, if any.
    ///
    /// `working_dir` is only called when a directory default is needed.
    pub fn from_args<F>(cli: CliArgs, working_dir: F) -> Result<Self, ConfigError>
    where
        F: Fn() -> io::Result<PathBuf>,
    {
        let toml_config = match cli.config {
            Some(ref path) => read_toml(path)?,
            None => TomlConfig::default(),
        };

        let cwd = || working_dir().map_err(ConfigError::WorkingDir);

        let role = match cli.command {
            Command::Serve(args) => {
                let section = toml_config.server;
                let base_dir = match args.base_dir.or(section.base_dir) {
                    Some(dir) => dir,
                    None => cwd()?.join(DEFAULT_BASE_SUBDIR),
                };
                Role::Serve(ServerSettings {
                    listen: args.listen.unwrap_or(section.listen),
                    base_dir,
                    chunk_size: check_chunk_size(args.chunk_size.unwrap_or(section.chunk_size))?,
                })
            }
            Command::Fetch(args) => {
                let section = toml_config.client;
                let destination = match args.destination.or(section.destination) {
                    Some(dir) => dir,
                    None => cwd()?,
                };
                Role::Fetch {
                    settings: ClientSettings {
                        server: args.server.unwrap_or(section.server),
                        port: args.port.unwrap_or(section.port),
                        destination,
                        chunk_size: check_chunk_size(
                            args.chunk_size.unwrap_or(section.chunk_size),
                        )?,
                    },
                    file: args.file,
                }
            }
        };

        Ok(Config {
            role,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

fn read_toml(path: &Path) -> Result<TomlConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

fn check_chunk_size(chunk_size: usize) -> Result<usize, ConfigError> {
    if chunk_size == 0 {
        Err(ConfigError::InvalidChunkSize)
    } else {
        Ok(chunk_size)
    }
}
