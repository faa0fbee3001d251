//! Frame codec for the player's ASCII line protocol.
//!
//! Inbound bytes are split on carriage returns and each line is tagged as an
//! unsolicited status line (`@@` prefix) or a command response. Outbound
//! commands are framed as `#<VERB> <arg>\r\n`.

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::command::Command;
use crate::protocol_constants::{
    COMMAND_PREFIX, COMMAND_TERMINATOR, DEFAULT_MAX_LINE_LENGTH, LINE_TERMINATOR, STATUS_PREFIX,
};

/// Errors produced while framing the TCP byte stream.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A line grew past the frame buffer without a terminator.
    #[error("line exceeds {limit} byte frame buffer")]
    Overflow {
        /// The configured limit.
        limit: usize,
    },

    /// Reading from or writing to the socket failed.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a received line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Unsolicited notification (`@@UPL PLAY`).
    Status,
    /// Reply to the command in flight.
    Response,
}

/// A decoded, classified line with its terminator removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub kind: LineKind,
    pub text: String,
}

impl Line {
    /// Decodes raw line bytes. Returns `None` for blank lines.
    ///
    /// A stray `\n` left over from a `\r\n` pair ends up at the start of the
    /// next line and is dropped here.
    fn from_bytes(raw: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim_start_matches('\n');
        if text.trim().is_empty() {
            return None;
        }
        if text.starts_with(STATUS_PREFIX) {
            Some(Self {
                kind: LineKind::Status,
                text: text.trim().to_string(),
            })
        } else {
            // Trailing blanks can be part of a typed value (`OK D `).
            Some(Self {
                kind: LineKind::Response,
                text: text.trim_end_matches(['\r', '\n']).to_string(),
            })
        }
    }

    pub fn is_status(&self) -> bool {
        self.kind == LineKind::Status
    }
}

/// `Decoder`/`Encoder` for the command session.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Bytes already scanned for a terminator on a previous call.
    next_index: usize,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Line>, CodecError> {
        loop {
            self.next_index = self.next_index.min(src.len());
            let terminator = src[self.next_index..]
                .iter()
                .position(|b| *b == LINE_TERMINATOR);

            let Some(offset) = terminator else {
                if src.len() > self.max_length {
                    return Err(CodecError::Overflow {
                        limit: self.max_length,
                    });
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let end = self.next_index + offset;
            self.next_index = 0;
            if end > self.max_length {
                return Err(CodecError::Overflow {
                    limit: self.max_length,
                });
            }

            let frame = src.split_to(end + 1);
            if let Some(line) = Line::from_bytes(&frame[..end]) {
                log::trace!("[Codec] <- {:?} {}", line.kind, line.text);
                return Ok(Some(line));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Line>, CodecError> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if !src.is_empty() {
            log::debug!(
                "[Codec] Discarding {} bytes of unterminated line at EOF",
                src.len()
            );
            src.clear();
            self.next_index = 0;
        }
        Ok(None)
    }
}

impl<'a> Encoder<&'a Command> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, cmd: &'a Command, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = cmd.to_string();
        dst.reserve(1 + body.len() + COMMAND_TERMINATOR.len());
        dst.put_u8(COMMAND_PREFIX);
        dst.put_slice(body.as_bytes());
        dst.put_slice(COMMAND_TERMINATOR);
        log::trace!("[Codec] -> #{}", body);
        Ok(())
    }
}
