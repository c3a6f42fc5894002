//! Wire protocol
//!
//! Server → client: every frame is an 8-digit, zero-padded ASCII decimal length followed by
//! exactly that many payload bytes.
//!
//! Client → server: a name string once at connect time, then raw UTF-8 messages that are
//! either the liveness token or a `verb[:argument]` command.

use crate::error::{RigError, RigResult};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Width of the ASCII length prefix
pub const LENGTH_PREFIX_DIGITS: usize = 8;

/// Largest payload the length prefix can describe
pub const MAX_FRAME_LEN: usize = 99_999_999;

/// Encode the length prefix for a payload of `len` bytes
pub fn encode_frame_header(len: usize) -> RigResult<[u8; LENGTH_PREFIX_DIGITS]> {
    if len > MAX_FRAME_LEN {
        return Err(RigError::FrameTooLarge(len));
    }

    let digits = format!("{len:0width$}", width = LENGTH_PREFIX_DIGITS);
    let mut header = [b'0'; LENGTH_PREFIX_DIGITS];
    header.copy_from_slice(digits.as_bytes());
    Ok(header)
}

/// Parse a length prefix
pub fn decode_frame_header(header: &[u8; LENGTH_PREFIX_DIGITS]) -> RigResult<usize> {
    if !header.iter().all(u8::is_ascii_digit) {
        return Err(RigError::MalformedFrame(format!(
            "non-digit length prefix {:?}",
            String::from_utf8_lossy(header)
        )));
    }

    header
        .iter()
        .try_fold(0usize, |acc, digit| {
            acc.checked_mul(10)?.checked_add(usize::from(digit - b'0'))
        })
        .ok_or_else(|| RigError::MalformedFrame("length prefix overflow".to_string()))
}

/// Prefix and payload in one contiguous buffer
pub fn encode_frame(payload: &[u8]) -> RigResult<Vec<u8>> {
    let header = encode_frame_header(payload.len())?;
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_DIGITS + payload.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Write one framed payload
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> RigResult<()>
where
    W: AsyncWrite + Unpin,
{
    let header = encode_frame_header(payload.len())?;
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed payload
///
/// A closed peer surfaces as an `Io` error of kind `UnexpectedEof`.
pub async fn read_frame<R>(reader: &mut R) -> RigResult<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LENGTH_PREFIX_DIGITS];
    reader.read_exact(&mut header).await?;
    let len = decode_frame_header(&header)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Bytes::from(payload))
}

/// Remove liveness tokens stuck to either end of a message
///
/// TCP may coalesce a probe with the handshake or a command, so `scope-1alive` and
/// `alivezoom:4` both arrive as one read.
fn strip_liveness<'a>(mut text: &'a str, liveness_token: &str) -> &'a str {
    if liveness_token.is_empty() {
        return text.trim();
    }

    loop {
        let trimmed = text.trim();
        let stripped = trimmed
            .strip_suffix(liveness_token)
            .or_else(|| trimmed.strip_prefix(liveness_token));
        match stripped {
            Some(rest) => text = rest,
            None => return trimmed,
        }
    }
}

/// Extract the display name from the handshake bytes
///
/// Returns `None` when nothing is left once whitespace and the liveness token are removed.
pub fn parse_handshake_name(raw: &[u8], liveness_token: &str) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let name = strip_liveness(&text, liveness_token);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// One inbound client message after liveness filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Only liveness probes (or whitespace); nothing to do
    Liveness,
    /// Command text to hand to the command authority
    Command(String),
}

/// Classify the bytes of one read from a client socket
pub fn classify_inbound(raw: &[u8], liveness_token: &str) -> InboundMessage {
    let text = String::from_utf8_lossy(raw);
    let command = strip_liveness(&text, liveness_token);
    if command.is_empty() {
        InboundMessage::Liveness
    } else {
        InboundMessage::Command(command.to_string())
    }
}
