//! Delimiter-seeking decoder with bounded lookahead.
//!
//! Bytes accumulate until the terminator shows up. The frame runs from the
//! start of the accumulator through the terminator (inclusive, so `}` works
//! as a terminator for JSON objects) and is parsed as one value.
//!
//! Bytes that follow the terminator in the same read are the start of the
//! next message. They stay in the accumulator; nothing is dropped.

use super::{is_blank, ParseResult};
use crate::error::FrameError;
use bytes::{Buf, BytesMut};

#[derive(Debug)]
pub struct DelimitedDecoder {
    terminator: u8,
    max_frame: usize,
    /// Prefix of the accumulator already known to hold no terminator.
    scanned: usize,
    /// Dropping an oversized frame until its terminator arrives.
    discarding: bool,
}

impl DelimitedDecoder {
    pub fn new(terminator: u8, max_frame: usize) -> Self {
        Self {
            terminator,
            max_frame,
            scanned: 0,
            discarding: false,
        }
    }

    pub fn terminator(&self) -> u8 {
        self.terminator
    }

    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Forget scan progress after the accumulator was emptied elsewhere.
    pub fn reset(&mut self) {
        self.scanned = 0;
        self.discarding = false;
    }

    /// Decode one frame from the front of `buffer`.
    pub fn decode(&mut self, buffer: &mut BytesMut) -> ParseResult {
        loop {
            if self.discarding {
                match self.find_terminator(buffer, 0) {
                    Some(pos) => {
                        buffer.advance(pos + 1);
                        self.discarding = false;
                    }
                    None => {
                        buffer.clear();
                        return ParseResult::Incomplete;
                    }
                }
            }

            let end = match self.find_terminator(buffer, self.scanned) {
                Some(pos) => pos + 1,
                None => {
                    if buffer.len() > self.max_frame {
                        buffer.clear();
                        self.scanned = 0;
                        self.discarding = true;
                        return ParseResult::Error(FrameError::TooLong {
                            limit: self.max_frame,
                        });
                    }
                    self.scanned = buffer.len();
                    return ParseResult::Incomplete;
                }
            };

            self.scanned = 0;
            let frame = buffer.split_to(end);
            if is_blank(&frame) {
                continue;
            }
            if frame.len() > self.max_frame {
                return ParseResult::Error(FrameError::TooLong {
                    limit: self.max_frame,
                });
            }

            return match serde_json::from_slice(&frame) {
                Ok(value) => ParseResult::Complete(value),
                Err(e) => ParseResult::Error(FrameError::Malformed(e.to_string())),
            };
        }
    }

    fn find_terminator(&self, buffer: &[u8], from: usize) -> Option<usize> {
        let from = from.min(buffer.len());
        buffer[from..]
            .iter()
            .position(|&b| b == self.terminator)
            .map(|pos| from + pos)
    }
}
