// ABOUTME: LSP base protocol framing: Content-Length headers around JSON-RPC bodies
// ABOUTME: Reads and writes one message at a time over async byte streams

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest body accepted from the language server
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

const CONTENT_LENGTH: &str = "content-length";

#[derive(Error, Debug)]
pub enum FramingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing Content-Length header")]
    MissingContentLength,

    #[error("Invalid header line: {0}")]
    InvalidHeader(String),

    #[error("Message of {0} bytes exceeds the limit")]
    TooLarge(usize),

    /// Stream ended partway through a message
    #[error("Unexpected end of stream")]
    UnexpectedEof,
}

/// Read the next framed message body. `Ok(None)` on clean end of stream.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FramingError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    let mut saw_header = false;

    loop {
        line.clear();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return if saw_header {
                Err(FramingError::UnexpectedEof)
            } else {
                Ok(None)
            };
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if saw_header {
                break;
            }
            // Tolerate stray blank lines between messages
            continue;
        }
        saw_header = true;

        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| FramingError::InvalidHeader(trimmed.to_string()))?;
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            let length = value
                .trim()
                .parse::<usize>()
                .map_err(|_| FramingError::InvalidHeader(trimmed.to_string()))?;
            content_length = Some(length);
        }
    }

    let length = content_length.ok_or(FramingError::MissingContentLength)?;
    if length > MAX_MESSAGE_BYTES {
        return Err(FramingError::TooLarge(length));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FramingError::UnexpectedEof
        } else {
            FramingError::Io(e)
        }
    })?;
    Ok(Some(body))
}

/// Write one body with its Content-Length header and flush
pub async fn write_message<W>(writer: &mut W, body: &[u8]) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}
