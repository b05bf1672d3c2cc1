//! grab-a-file: single-file retrieval over TCP
//!
//! A client connects, sends one file name terminated by `\n`, and receives a
//! one-byte status flag followed, on success, by the raw file contents until the
//! server closes the connection.
//!
//! Roles:
//! - `serve`: answer requests from a base directory, one connection at a time
//! - `fetch <FILE>`: request a file and write it into a destination directory
//!
//! Configuration via CLI arguments or TOML file.

mod client;
mod config;
mod error;
mod protocol;
mod server;
mod transfer;

use std::process::ExitCode;

use client::{FetchOutcome, Fetcher};
use config::{Config, Role};
use error::AppError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration; usage errors exit inside clap
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(AppError::from(e).exit_code());
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.exit_code();
            error!(error = %e, exit_code = code, "Fatal error");
            ExitCode::from(code)
        }
    }
}

async fn run(config: Config) -> Result<(), AppError> {
    match config.role {
        Role::Serve(settings) => {
            info!(
                listen = %settings.listen,
                base_dir = %settings.base_dir.display(),
                chunk_size = settings.chunk_size,
                "Starting grab-a-file server"
            );
            server::serve_forever(&settings).await?;
        }
        Role::Fetch { settings, file } => {
            info!(
                server = %settings.server,
                port = settings.port,
                file = %file,
                destination = %settings.destination.display(),
                "Fetching file"
            );
            match Fetcher::new(&settings).fetch(&file).await? {
                FetchOutcome::Saved { path, bytes } => {
                    info!(path = %path.display(), bytes, "Fetch complete");
                }
                FetchOutcome::NotFound { name } => {
                    println!("File {name} not found.");
                }
            }
        }
    }
    Ok(())
}
