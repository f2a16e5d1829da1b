//! Decoder for the binary `application/vnd.amazon.eventstream` framing used
//! by Bedrock's streaming endpoints.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! [total_len u32][headers_len u32][prelude_crc u32][headers][payload][message_crc u32]
//! ```
//!
//! Both checksums are CRC-32 (IEEE): `prelude_crc` covers the first 8
//! bytes, `message_crc` everything before it. A mismatch is a protocol error.

use std::collections::HashMap;

use toolbox_core::ProviderError;

const PRELUDE_LEN: usize = 12;
const TRAILER_LEN: usize = 4;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// One decoded frame. Only string-valued headers are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// `:message-type`: `event`, `exception` or `error`.
    pub fn message_type(&self) -> &str {
        self.header(":message-type").unwrap_or("event")
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header(":event-type")
    }
}

/// Incremental decoder: push bytes as they arrive, pull complete frames out.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// The next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProviderError> {
        if self.buf.len() < PRELUDE_LEN {
            return Ok(None);
        }
        let prelude_crc = read_u32(&self.buf, 8);
        if crc32fast::hash(&self.buf[..8]) != prelude_crc {
            return Err(ProviderError::Protocol("event-stream prelude checksum mismatch".into()));
        }
        let total_len = read_u32(&self.buf, 0) as usize;
        let headers_len = read_u32(&self.buf, 4) as usize;

        if total_len < PRELUDE_LEN + TRAILER_LEN + headers_len || total_len > MAX_FRAME_LEN {
            return Err(ProviderError::Protocol(format!(
                "invalid event-stream frame: total {total_len}, headers {headers_len}"
            )));
        }
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let frame_bytes: Vec<u8> = self.buf.drain(..total_len).collect();
        let message_crc = read_u32(&frame_bytes, total_len - TRAILER_LEN);
        if crc32fast::hash(&frame_bytes[..total_len - TRAILER_LEN]) != message_crc {
            return Err(ProviderError::Protocol("event-stream message checksum mismatch".into()));
        }
        let headers_end = PRELUDE_LEN + headers_len;
        let headers = parse_headers(&frame_bytes[PRELUDE_LEN..headers_end])?;
        let payload = frame_bytes[headers_end..total_len - TRAILER_LEN].to_vec();

        Ok(Some(Frame { headers, payload }))
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn parse_headers(mut bytes: &[u8]) -> Result<HashMap<String, String>, ProviderError> {
    let truncated = || ProviderError::Protocol("truncated event-stream header".into());
    let mut headers = HashMap::new();

    while !bytes.is_empty() {
        let name_len = bytes[0] as usize;
        let name = bytes.get(1..1 + name_len).ok_or_else(truncated)?;
        let name = String::from_utf8_lossy(name).into_owned();
        bytes = &bytes[1 + name_len..];

        let value_type = *bytes.first().ok_or_else(truncated)?;
        bytes = &bytes[1..];

        let fixed = match value_type {
            0 | 1 => Some(0),
            2 => Some(1),
            3 => Some(2),
            4 => Some(4),
            5 | 8 => Some(8),
            9 => Some(16),
            6 | 7 => None,
            other => {
                return Err(ProviderError::Protocol(format!(
                    "unknown event-stream header type {other}"
                )));
            }
        };

        match fixed {
            Some(len) => {
                bytes = bytes.get(len..).ok_or_else(truncated)?;
            }
            None => {
                let len_bytes = bytes.get(..2).ok_or_else(truncated)?;
                let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
                let value = bytes.get(2..2 + len).ok_or_else(truncated)?;
                if value_type == 7 {
                    headers.insert(name, String::from_utf8_lossy(value).into_owned());
                }
                bytes = &bytes[2 + len..];
            }
        }
    }

    Ok(headers)
}

/// Encode a frame with string headers. Used to build fixtures.
pub fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }
    let total = PRELUDE_LEN + header_bytes.len() + payload.len() + TRAILER_LEN;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    let prelude_crc = crc32fast::hash(&out);
    out.extend_from_slice(&prelude_crc.to_be_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(payload);
    let message_crc = crc32fast::hash(&out);
    out.extend_from_slice(&message_crc.to_be_bytes());
    out
}
