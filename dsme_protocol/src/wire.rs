//! Bit-exact on-wire framing (§6).
//!
//! ```text
//! 4 bytes  line_size_   total length including this field
//! 4 bytes  size_        fixed-struct portion length
//! 4 bytes  type_        32-bit message-type identifier
//! size_ - 12 bytes      fixed-struct body
//! line_size_ - size_    optional extra bytes
//! ```

use crate::message::Message;

/// Byte length of the three header fields.
pub const HEADER_LEN: usize = 12;

/// Maximum accepted message size (§6).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// The three leading wire fields, validated against each other (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub line_size: u32,
    pub size: u32,
    pub type_id: u32,
}

/// Errors in the header/frame itself — distinct from a known-type body size
/// mismatch, which is a silent dispatcher-level drop (see [`Message::decode`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short for header: have {0}, need {HEADER_LEN}")]
    ShortHeader(usize),
    #[error("size_ ({size}) is smaller than header length ({HEADER_LEN})")]
    SizeBelowHeader { size: u32 },
    #[error("line_size_ ({line_size}) is smaller than size_ ({size})")]
    LineSizeBelowSize { line_size: u32, size: u32 },
    #[error("line_size_ ({0}) exceeds maximum message size ({MAX_MESSAGE_SIZE})")]
    TooLarge(u32),
    #[error("buffer too short for declared frame: have {have}, need {need}")]
    Incomplete { have: usize, need: usize },
}

impl Header {
    /// Parse the fixed 12-byte header from the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Header, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::ShortHeader(buf.len()));
        }
        let line_size = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let size = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let type_id = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let header = Header { line_size, size, type_id };
        header.validate()?;
        Ok(header)
    }

    /// Structural validation independent of buffer length (§3 invariants).
    pub fn validate(&self) -> Result<(), FrameError> {
        if (self.size as usize) < HEADER_LEN {
            return Err(FrameError::SizeBelowHeader { size: self.size });
        }
        if self.line_size < self.size {
            return Err(FrameError::LineSizeBelowSize { line_size: self.line_size, size: self.size });
        }
        if self.line_size as usize > MAX_MESSAGE_SIZE {
            return Err(FrameError::TooLarge(self.line_size));
        }
        Ok(())
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.line_size.to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..12].copy_from_slice(&self.type_id.to_le_bytes());
        out
    }
}

/// Encode a complete wire frame: header + fixed body + extra.
pub fn encode(message: &Message) -> Vec<u8> {
    let body = message.encode_body();
    let extra = message.encode_extra();
    let size = (HEADER_LEN + body.len()) as u32;
    let line_size = size + extra.len() as u32;
    let header = Header { line_size, size, type_id: message.type_id() };

    let mut out = Vec::with_capacity(line_size as usize);
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&body);
    out.extend_from_slice(&extra);
    out
}

/// Decode one complete frame from the start of `buf`.
///
/// Returns the decoded message and the number of bytes consumed. `buf` must
/// already contain at least `line_size_` bytes — callers (the IPC server's
/// framer) are responsible for buffering until that much is available;
/// see the framer contract in the event-loop crate.
pub fn decode(buf: &[u8]) -> Result<(Message, usize), FrameError> {
    let header = Header::parse(buf)?;
    let line_size = header.line_size as usize;
    if buf.len() < line_size {
        return Err(FrameError::Incomplete { have: buf.len(), need: line_size });
    }
    let size = header.size as usize;
    let body = &buf[HEADER_LEN..size];
    let extra = &buf[size..line_size];
    let message = Message::decode(header.type_id, body, extra);
    Ok((message, line_size))
}
