//! TCP server answering single-file requests.
//!
//! Connections are served strictly one at a time: an exchange runs to
//! completion before the next connection is accepted. Further clients wait in
//! the listen backlog.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::ServerSettings;
use crate::error::{ProtocolError, ServeError};
use crate::protocol::{decode_request_line, sanitize_file_name, StatusFlag, MAX_REQUEST_LINE};
use crate::transfer::{copy_chunked, CopyError};

/// Pending connections the kernel will queue while an exchange is running
const LISTEN_BACKLOG: i32 = 128;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) doesn't spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// What happened when the server tried to open a requested file.
#[derive(Debug)]
pub enum OpenOutcome {
    Opened(File),
    Unavailable(std::io::Error),
}

/// How a completed exchange was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    /// READY was sent followed by this many bytes.
    File(u64),
    /// FILE_NOT_FOUND was sent.
    NotFound,
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    base_dir: PathBuf,
    chunk_size: usize,
}

impl Server {
    /// Bind the listener. Failure here is fatal for the server.
    pub async fn bind(settings: &ServerSettings) -> Result<Self, ServeError> {
        let bind_err = |source: std::io::Error| ServeError::Bind {
            addr: settings.listen.clone(),
            source,
        };

        let addr = tokio::net::lookup_host(settings.listen.as_str())
            .await
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "address resolved to nothing",
                ))
            })?;

        let listener = create_listener(addr)
            .and_then(TcpListener::from_std)
            .map_err(bind_err)?;

        Ok(Server {
            listener,
            base_dir: settings.base_dir.clone(),
            chunk_size: settings.chunk_size,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve connections forever.
    ///
    /// Errors are confined to the connection that caused them.
    pub async fn run(self) {
        info!(
            address = ?self.local_addr().ok(),
            base_dir = %self.base_dir.display(),
            "Server listening"
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "New connection");

                    match handle_connection(stream, &self.base_dir, self.chunk_size).await {
                        Ok(Served::File(bytes)) => info!(%peer, bytes, "File sent"),
                        Ok(Served::NotFound) => info!(%peer, "File not found"),
                        Err(e) => warn!(%peer, error = %e, "Exchange abandoned"),
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
}

/// Bind on `settings.listen` and serve until the process ends.
///
/// Returns only if the listener cannot be created.
pub async fn serve_forever(settings: &ServerSettings) -> Result<(), ServeError> {
    let server = Server::bind(settings).await?;
    server.run().await;
    Ok(())
}

/// Run one exchange: read the request line, answer with a status flag and,
/// if the file opened, its contents.
///
/// The stream is dropped, and so closed, on every return path.
pub async fn handle_connection<S>(
    stream: S,
    base_dir: &Path,
    chunk_size: usize,
) -> Result<Served, ServeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = BufReader::with_capacity(chunk_size, stream);
    let requested = read_request(&mut conn).await?;
    let name = sanitize_file_name(&requested);
    debug!(requested = %requested, resolved = %name, "Request received");

    match open_requested(base_dir, &name).await {
        OpenOutcome::Opened(mut file) => {
            conn.write_all(&[StatusFlag::Ready.as_byte()]).await?;
            conn.flush().await?;
            let sent = copy_chunked(&mut file, &mut conn, chunk_size)
                .await
                .map_err(CopyError::into_io)?;
            conn.shutdown().await?;
            Ok(Served::File(sent))
        }
        OpenOutcome::Unavailable(reason) => {
            debug!(file = %name, reason = %reason, "Requested file unavailable");
            conn.write_all(&[StatusFlag::FileNotFound.as_byte()]).await?;
            conn.shutdown().await?;
            Ok(Served::NotFound)
        }
    }
}

/// Open `base_dir/name` for reading.
///
/// Anything other than a readable regular file is `Unavailable`, whatever the
/// underlying cause.
pub async fn open_requested(base_dir: &Path, name: &str) -> OpenOutcome {
    let path = base_dir.join(name);
    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => return OpenOutcome::Unavailable(e),
    };

    match file.metadata().await {
        Ok(meta) if meta.is_file() => OpenOutcome::Opened(file),
        Ok(_) => OpenOutcome::Unavailable(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        )),
        Err(e) => OpenOutcome::Unavailable(e),
    }
}

/// Read the single request line, bounded by `MAX_REQUEST_LINE`.
async fn read_request<R>(conn: &mut R) -> Result<String, ServeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = match conn.take(MAX_REQUEST_LINE as u64).read_line(&mut line).await {
        Ok(n) => n,
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Err(ProtocolError::InvalidEncoding.into())
        }
        Err(e) => return Err(e.into()),
    };

    if n == 0 {
        return Err(ProtocolError::EmptyRequest.into());
    }
    if n == MAX_REQUEST_LINE && !line.ends_with('\n') {
        return Err(ProtocolError::RequestTooLong(MAX_REQUEST_LINE).into());
    }

    Ok(decode_request_line(&line).to_string())
}

/// Create a TCP listener with SO_REUSEADDR so restarts don't trip over TIME_WAIT.
fn create_listener(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
