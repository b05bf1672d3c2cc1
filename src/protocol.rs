//! Wire protocol for single-file retrieval.
//!
//! One exchange per connection:
//!
//! ```text
//! Client -> Server: <file name>\n
//! Server -> Client: R<raw file bytes until close>
//!               or: F
//! ```
//!
//! The payload carries no length prefix. The server closing its side of the
//! connection marks the end of the file.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Chunk size used when streaming file contents.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Longest request line the server will buffer while looking for `\n`.
pub const MAX_REQUEST_LINE: usize = 4096;

/// One-byte status marker sent before any payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFlag {
    /// The file was opened; its bytes follow.
    Ready,
    /// The file could not be opened; nothing follows.
    FileNotFound,
}

impl StatusFlag {
    pub const READY: u8 = b'R';
    pub const FILE_NOT_FOUND: u8 = b'F';

    pub fn as_byte(self) -> u8 {
        match self {
            StatusFlag::Ready => Self::READY,
            StatusFlag::FileNotFound => Self::FILE_NOT_FOUND,
        }
    }
}

impl TryFrom<u8> for StatusFlag {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            Self::READY => Ok(StatusFlag::Ready),
            Self::FILE_NOT_FOUND => Ok(StatusFlag::FileNotFound),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }
}

/// A validated file name, ready to be sent as a request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
    name: String,
}

impl FileRequest {
    /// Validate a requested name.
    ///
    /// Names the responder would alter or misframe are refused: `/` is stripped
    /// server-side and `\r`/`\n` would break the request line.
    pub fn new(name: impl Into<String>) -> Result<Self, ProtocolError> {
        let name = name.into();
        if name.is_empty() || name.contains(['/', '\n', '\r']) {
            return Err(ProtocolError::InvalidFileName(name));
        }
        Ok(FileRequest { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encode as `<name>\n`.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.name.len() + 1);
        buf.put_slice(self.name.as_bytes());
        buf.put_u8(b'\n');
        buf.freeze()
    }
}

/// Extract the requested name from a raw request line.
///
/// Strips the `\n` terminator and an optional preceding `\r`. A line that hit
/// EOF without a terminator is accepted as-is.
pub fn decode_request_line(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Remove every `/` from a requested name.
///
/// This only blocks traversal through `/` separators. `..` on its own, other
/// separator characters and similar tricks are not handled.
pub fn sanitize_file_name(requested: &str) -> String {
    requested.replace('/', "")
}
