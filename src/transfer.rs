//! Chunked streaming shared by the server and the client.

use bytes::BytesMut;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Which side of a copy failed.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("read failed: {0}")]
    Read(io::Error),

    #[error("write failed: {0}")]
    Write(io::Error),
}

impl CopyError {
    pub fn into_io(self) -> io::Error {
        match self {
            CopyError::Read(e) | CopyError::Write(e) => e,
        }
    }
}

/// Copy everything from `reader` to `writer`, at most `chunk_size` bytes per read.
///
/// Stops when `reader` reports end of stream, flushes `writer`, and returns the
/// number of bytes copied. Errors from either side abort the copy; whatever was
/// written before the error stays written.
pub async fn copy_chunked<R, W>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut chunk = BytesMut::zeroed(chunk_size.max(1));
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut chunk[..]).await.map_err(CopyError::Read)?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&chunk[..n])
            .await
            .map_err(CopyError::Write)?;
        total += n as u64;
        trace!(chunk = n, total, "Copied chunk");
    }

    writer.flush().await.map_err(CopyError::Write)?;
    Ok(total)
}
