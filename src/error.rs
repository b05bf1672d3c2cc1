//! Error types for both roles.
//!
//! Setup failures and per-exchange failures are kept as separate variants so
//! the binary can report a distinct exit status for each cause.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Violations of the request/response framing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid file name {0:?}: must be non-empty and contain no '/', '\\r' or '\\n'")]
    InvalidFileName(String),

    #[error("connection closed before a request line was received")]
    EmptyRequest,

    #[error("request line is not valid UTF-8")]
    InvalidEncoding,

    #[error("request line exceeds {0} bytes")]
    RequestTooLong(usize),

    #[error("connection closed before a status flag was received")]
    MissingStatus,

    #[error("unknown status flag 0x{0:02x}")]
    UnknownStatus(u8),
}

/// Server-side failures.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Fatal: the listener could not be created.
    #[error("failed to bind listener on {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    /// Per-connection: the exchange was abandoned.
    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Client-side failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid port {0}: must be between 1 and 65535")]
    InvalidPort(u32),

    #[error("failed to resolve host {host}: {source}")]
    Resolve { host: String, source: io::Error },

    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to write {}: {source}", .path.display())]
    LocalWrite { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    FileRead { path: PathBuf, source: io::Error },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to determine the working directory: {0}")]
    WorkingDir(io::Error),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Any failure that ends the process.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Serve(#[from] ServeError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl AppError {
    /// Process exit status for this failure. Each cause gets its own code.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(ConfigError::WorkingDir(_)) => 3,
            AppError::Config(_) => 9,
            AppError::Fetch(FetchError::Resolve { .. }) => 4,
            AppError::Fetch(FetchError::InvalidPort(_)) => 5,
            AppError::Fetch(FetchError::Connect { .. } | FetchError::Io(_)) => 6,
            AppError::Fetch(FetchError::LocalWrite { .. }) => 11,
            AppError::Fetch(FetchError::Protocol(e)) | AppError::Serve(ServeError::Protocol(e)) => {
                protocol_exit_code(e)
            }
            AppError::Serve(ServeError::Bind { .. }) => 7,
            AppError::Serve(ServeError::Io(_)) => 6,
        }
    }
}

fn protocol_exit_code(error: &ProtocolError) -> u8 {
    match error {
        ProtocolError::InvalidFileName(_) => 10,
        _ => 8,
    }
}
