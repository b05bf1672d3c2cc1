//! Client side: request one file and save it locally.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::ClientSettings;
use crate::error::{FetchError, ProtocolError};
use crate::protocol::{FileRequest, StatusFlag};
use crate::transfer::{copy_chunked, CopyError};

/// Result of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The file was written to `path`.
    Saved { path: PathBuf, bytes: u64 },
    /// The server answered FILE_NOT_FOUND. Nothing was written.
    NotFound { name: String },
}

/// Fetches files from one configured server into one destination directory.
#[derive(Debug, Clone)]
pub struct Fetcher {
    server: String,
    port: u32,
    destination: PathBuf,
    chunk_size: usize,
}

impl Fetcher {
    pub fn new(settings: &ClientSettings) -> Self {
        Fetcher {
            server: settings.server.clone(),
            port: settings.port,
            destination: settings.destination.clone(),
            chunk_size: settings.chunk_size,
        }
    }

    /// Request `file_name` and store it as `destination/file_name`.
    ///
    /// An existing local file with that name is overwritten. The name is
    /// validated before any connection is made.
    pub async fn fetch(&self, file_name: &str) -> Result<FetchOutcome, FetchError> {
        let request = FileRequest::new(file_name)?;
        let port = validate_port(self.port)?;
        let stream = self.connect(port).await?;

        exchange(stream, &request, &self.destination, self.chunk_size).await
    }

    async fn connect(&self, port: u16) -> Result<TcpStream, FetchError> {
        let addrs = tokio::net::lookup_host((self.server.as_str(), port))
            .await
            .map_err(|source| FetchError::Resolve {
                host: self.server.clone(),
                source,
            })?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!(%addr, "Connected");
                    return Ok(stream);
                }
                Err(source) => {
                    debug!(%addr, error = %source, "Connect attempt failed");
                    last_err = Some(FetchError::Connect { addr, source });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| FetchError::Resolve {
            host: self.server.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        }))
    }
}

fn validate_port(port: u32) -> Result<u16, FetchError> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(FetchError::InvalidPort(port)),
    }
}

/// Send the request, read the status flag and save the payload if there is one.
async fn exchange<S>(
    stream: S,
    request: &FileRequest,
    destination: &Path,
    chunk_size: usize,
) -> Result<FetchOutcome, FetchError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = BufReader::with_capacity(chunk_size, stream);
    conn.write_all(&request.encode()).await?;
    conn.flush().await?;

    let flag = match conn.read_u8().await {
        Ok(byte) => byte,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::MissingStatus.into())
        }
        Err(e) => return Err(e.into()),
    };

    match StatusFlag::try_from(flag)? {
        StatusFlag::Ready => {
            let path = destination.join(request.name());
            let bytes = save_payload(&mut conn, &path, chunk_size).await?;
            info!(file = %request.name(), path = %path.display(), bytes, "File saved");
            Ok(FetchOutcome::Saved { path, bytes })
        }
        StatusFlag::FileNotFound => Ok(FetchOutcome::NotFound {
            name: request.name().to_string(),
        }),
    }
}

/// Stream the rest of the connection into `path`.
///
/// A file left incomplete by a failed transfer is removed. Failures writing the
/// local file are `LocalWrite`; failures reading the connection are `Io`.
async fn save_payload<R>(conn: &mut R, path: &Path, chunk_size: usize) -> Result<u64, FetchError>
where
    R: AsyncRead + Unpin,
{
    let mut file = File::create(path)
        .await
        .map_err(|source| FetchError::LocalWrite {
            path: path.to_path_buf(),
            source,
        })?;

    match copy_chunked(conn, &mut file, chunk_size).await {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            drop(file);
            if let Err(cleanup) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %cleanup, "Failed to remove partial file");
            }
            Err(match e {
                CopyError::Read(source) => FetchError::Io(source),
                CopyError::Write(source) => FetchError::LocalWrite {
                    path: path.to_path_buf(),
                    source,
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerSettings;
    use crate::server::Server;
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    struct Harness {
        base: TempDir,
        dest: TempDir,
        fetcher: Fetcher,
    }

    async fn harness() -> Harness {
        let base = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let server = Server::bind(&ServerSettings {
            listen: "127.0.0.1:0".to_string(),
            base_dir: base.path().to_path_buf(),
            chunk_size: 1024,
        })
        .await
        .unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(server.run());

        let fetcher = Fetcher::new(&ClientSettings {
            server: "127.0.0.1".to_string(),
            port: u32::from(port),
            destination: dest.path().to_path_buf(),
            chunk_size: 1024,
        });
        Harness { base, dest, fetcher }
    }

    fn fetcher_for(port: u32, dest: &Path) -> Fetcher {
        Fetcher::new(&ClientSettings {
            server: "127.0.0.1".to_string(),
            port,
            destination: dest.to_path_buf(),
            chunk_size: 1024,
        })
    }

    #[tokio::test]
    async fn test_fetch_hello() {
        let h = harness().await;
        std::fs::write(h.base.path().join("hello.txt"), b"hi").unwrap();

        let outcome = h.fetcher.fetch("hello.txt").await.unwrap();
        let expected = h.dest.path().join("hello.txt");
        assert_eq!(
            outcome,
            FetchOutcome::Saved {
                path: expected.clone(),
                bytes: 2
            }
        );
        assert_eq!(std::fs::read(expected).unwrap(), b"hi");
    }

    #[tokio::test]
    async fn test_fetch_preserves_bytes() {
        let h = harness().await;
        let data: Vec<u8> = (0..100_000u32).map(|i| (i * 7 % 256) as u8).collect();
        std::fs::write(h.base.path().join("blob.bin"), &data).unwrap();
        std::fs::write(h.base.path().join("empty.bin"), b"").unwrap();

        h.fetcher.fetch("blob.bin").await.unwrap();
        assert_eq!(std::fs::read(h.dest.path().join("blob.bin")).unwrap(), data);

        let outcome = h.fetcher.fetch("empty.bin").await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Saved { bytes: 0, .. }));
        let saved = h.dest.path().join("empty.bin");
        assert!(saved.exists());
        assert!(std::fs::read(saved).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_missing_creates_nothing() {
        let h = harness().await;

        let outcome = h.fetcher.fetch("missing.txt").await.unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::NotFound {
                name: "missing.txt".to_string()
            }
        );
        assert!(!h.dest.path().join("missing.txt").exists());
    }

    #[tokio::test]
    async fn test_repeated_fetch_is_identical() {
        let h = harness().await;
        std::fs::write(h.base.path().join("doc.txt"), b"same bytes every time").unwrap();

        h.fetcher.fetch("doc.txt").await.unwrap();
        let first = std::fs::read(h.dest.path().join("doc.txt")).unwrap();
        h.fetcher.fetch("doc.txt").await.unwrap();
        let second = std::fs::read(h.dest.path().join("doc.txt")).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            std::fs::read(h.base.path().join("doc.txt")).unwrap(),
            b"same bytes every time"
        );
    }

    #[tokio::test]
    async fn test_fetch_overwrites_local_file() {
        let h = harness().await;
        std::fs::write(h.base.path().join("note.txt"), b"new").unwrap();
        std::fs::write(h.dest.path().join("note.txt"), b"old and longer").unwrap();

        h.fetcher.fetch("note.txt").await.unwrap();
        assert_eq!(std::fs::read(h.dest.path().join("note.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_invalid_name_rejected_before_connecting() {
        let dest = tempfile::tempdir().unwrap();
        // Port 1 is almost certainly closed; a connect attempt would fail differently.
        let fetcher = fetcher_for(1, dest.path());

        match fetcher.fetch("../secret").await {
            Err(FetchError::Protocol(ProtocolError::InvalidFileName(name))) => {
                assert_eq!(name, "../secret")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_ports() {
        let dest = tempfile::tempdir().unwrap();
        for port in [0, 65536, 70000] {
            match fetcher_for(port, dest.path()).fetch("a.txt").await {
                Err(FetchError::InvalidPort(p)) => assert_eq!(p, port),
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dest = tempfile::tempdir().unwrap();
        let err = fetcher_for(u32::from(port), dest.path())
            .fetch("a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_unknown_status_flag() {
        let dest = tempfile::tempdir().unwrap();
        let request = FileRequest::new("a.txt").unwrap();
        let mock = Builder::new().write(b"a.txt\n").read(b"Xjunk").build();

        let err = exchange(mock, &request, dest.path(), 1024).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Protocol(ProtocolError::UnknownStatus(b'X'))
        ));
        assert!(!dest.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_status_flag() {
        let dest = tempfile::tempdir().unwrap();
        let request = FileRequest::new("a.txt").unwrap();
        let mock = Builder::new().write(b"a.txt\n").build();

        let err = exchange(mock, &request, dest.path(), 1024).await.unwrap_err();
        assert!(matches!(err, FetchError::Protocol(ProtocolError::MissingStatus)));
    }

    #[tokio::test]
    async fn test_interrupted_transfer_removes_partial_file() {
        let dest = tempfile::tempdir().unwrap();
        let request = FileRequest::new("a.txt").unwrap();
        let mock = Builder::new()
            .write(b"a.txt\n")
            .read(b"Rpartial")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let err = exchange(mock, &request, dest.path(), 1024).await.unwrap_err();
        assert!(matches!(err, FetchError::Io(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
        assert!(!dest.path().join("a.txt").exists());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_local_write_failure_mid_stream() {
        use crate::error::AppError;

        // Every write to /dev/full fails with ENOSPC.
        let dest = tempfile::tempdir().unwrap();
        let link = dest.path().join("a.txt");
        std::os::unix::fs::symlink("/dev/full", &link).unwrap();

        let request = FileRequest::new("a.txt").unwrap();
        let mock = Builder::new().write(b"a.txt\n").read(b"Rdata").build();

        let err = exchange(mock, &request, dest.path(), 1024).await.unwrap_err();
        match &err {
            FetchError::LocalWrite { path, .. } => assert_eq!(path, &link),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(AppError::from(err).exit_code(), 11);
        // The symlink is removed, /dev/full is not touched.
        assert!(std::fs::symlink_metadata(&link).is_err());
        assert!(Path::new("/dev/full").exists());
    }

    #[tokio::test]
    async fn test_missing_destination_directory() {
        let dest = tempfile::tempdir().unwrap();
        let gone = dest.path().join("does-not-exist");
        let request = FileRequest::new("a.txt").unwrap();
        let mock = Builder::new().write(b"a.txt\n").read(b"Rdata").build();

        let err = exchange(mock, &request, &gone, 1024).await.unwrap_err();
        assert!(matches!(err, FetchError::LocalWrite { .. }));
    }
}
