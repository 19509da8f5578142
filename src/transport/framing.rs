//! Content-Length message framing for envelopes over byte streams.
//!
//! Uses HTTP-style Content-Length framing (the same scheme as LSP) so a
//! stream socket carries discrete frames.
//!
//! # Wire Format
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! The header parsing is case-insensitive and handles both CRLF and LF line endings.

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16MB) to prevent OOM from a misbehaving server.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Read a Content-Length framed message from the stream.
///
/// Returns `Ok(None)` on a clean EOF before any header byte.
///
/// # Errors
///
/// Returns an error if:
/// - The stream closes in the middle of a frame
/// - No Content-Length header is found
/// - Content-Length exceeds MAX_FRAME_SIZE
/// - The body is not valid UTF-8
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .context("Failed to read header line")?;

        if bytes_read == 0 {
            if saw_header {
                return Err(anyhow!("Connection closed mid-frame"));
            }
            return Ok(None);
        }
        saw_header = true;

        let trimmed = line.trim();

        // Empty line ends the headers
        if trimmed.is_empty() {
            break;
        }

        if let Some((key, value)) = trimmed.split_once(':') {
            if key.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid Content-Length value: {}", value))?,
                );
            }
            // Other headers are ignored
        }
    }

    let size = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;

    if size > MAX_FRAME_SIZE {
        return Err(anyhow!(
            "Frame size {} exceeds maximum {} bytes",
            size,
            MAX_FRAME_SIZE
        ));
    }

    let mut body = vec![0u8; size];
    reader
        .read_exact(&mut body)
        .await
        .context("Failed to read frame body")?;

    String::from_utf8(body)
        .map(Some)
        .context("Frame body is not valid UTF-8")
}

/// Write a Content-Length framed message to the stream.
///
/// # Errors
///
/// Returns an error if the write or flush fails.
pub async fn write_frame<W>(writer: &mut W, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body_bytes = body.as_bytes();
    let header = format!("Content-Length: {}\r\n\r\n", body_bytes.len());

    writer
        .write_all(header.as_bytes())
        .await
        .context("Failed to write frame header")?;

    writer
        .write_all(body_bytes)
        .await
        .context("Failed to write frame body")?;

    writer.flush().await.context("Failed to flush frame")?;

    Ok(())
}
