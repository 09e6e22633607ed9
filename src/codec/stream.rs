//! Self-delimiting streaming decoder.
//!
//! JSON values carry their own boundaries, so no terminator is needed: the
//! decoder parses one value from the front of the accumulator and reports
//! how many bytes it used. Whatever follows stays buffered for the next call.

use super::{is_blank, ParseResult};
use crate::error::FrameError;
use bytes::{Buf, BytesMut};
use serde_json::Value;

/// Line boundary used to resynchronise after a syntax error.
const RESYNC_BYTE: u8 = b'\n';

#[derive(Debug)]
pub struct StreamDecoder {
    max_frame: usize,
    /// Dropping input until the next line boundary.
    discarding: bool,
}

impl StreamDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            max_frame,
            discarding: false,
        }
    }

    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    pub fn reset(&mut self) {
        self.discarding = false;
    }

    /// Decode one value from the front of `buffer`.
    ///
    /// On a syntax error the offending input is dropped through the next
    /// newline, so exactly one error is reported per bad line.
    pub fn decode(&mut self, buffer: &mut BytesMut) -> ParseResult {
        if self.discarding {
            match buffer.iter().position(|&b| b == RESYNC_BYTE) {
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

        if is_blank(buffer) {
            buffer.clear();
            return ParseResult::Incomplete;
        }

        let outcome = {
            let mut values = serde_json::Deserializer::from_slice(buffer).into_iter::<Value>();
            match values.next() {
                Some(Ok(value)) => Ok(Some((value, values.byte_offset()))),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        };

        match outcome {
            // A number running to the end of the buffer may have more digits
            // still in flight.
            Ok(Some((value, consumed))) if value.is_number() && consumed == buffer.len() => {
                self.need_more(buffer)
            }
            Ok(Some((value, consumed))) => {
                buffer.advance(consumed);
                ParseResult::Complete(value)
            }
            Ok(None) => ParseResult::Incomplete,
            Err(e) if e.is_eof() => self.need_more(buffer),
            Err(e) => {
                self.resync(buffer);
                ParseResult::Error(FrameError::Malformed(e.to_string()))
            }
        }
    }

    fn need_more(&mut self, buffer: &mut BytesMut) -> ParseResult {
        if buffer.len() > self.max_frame {
            buffer.clear();
            self.discarding = true;
            ParseResult::Error(FrameError::TooLong {
                limit: self.max_frame,
            })
        } else {
            ParseResult::Incomplete
        }
    }

    fn resync(&mut self, buffer: &mut BytesMut) {
        match buffer.iter().position(|&b| b == RESYNC_BYTE) {
            Some(pos) => buffer.advance(pos + 1),
            None => {
                buffer.clear();
                self.discarding = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(decoder: &mut StreamDecoder, buffer: &mut BytesMut) -> Vec<Value> {
        let mut out = Vec::new();
        while let ParseResult::Complete(v) = decoder.decode(buffer) {
            out.push(v);
        }
        out
    }

    #[test]
    fn test_decodes_back_to_back_values() {
        let mut decoder = StreamDecoder::new(1024);
        let mut buffer = BytesMut::from(&b"{\"get\":\"a\"}{\"get\":\"b\"} \n [1,2]"[..]);

        let values = decode_all(&mut decoder, &mut buffer);
        assert_eq!(
            values,
            vec![json!({"get": "a"}), json!({"get": "b"}), json!([1, 2])]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_value_stays_buffered() {
        let mut decoder = StreamDecoder::new(1024);
        let mut buffer = BytesMut::from(&b"{\"get\":\"a\"}\n{\"get\":"[..]);

        assert!(matches!(decoder.decode(&mut buffer), ParseResult::Complete(_)));
        assert!(matches!(decoder.decode(&mut buffer), ParseResult::Incomplete));
        assert_eq!(&buffer[..], b"\n{\"get\":");

        buffer.extend_from_slice(b"\"b\"}\n");
        match decoder.decode(&mut buffer) {
            ParseResult::Complete(v) => assert_eq!(v, json!({"get": "b"})),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_skips_to_next_line() {
        let mut decoder = StreamDecoder::new(1024);
        let mut buffer = BytesMut::from(&b"{\"get\" 1}\n{\"get\":\"ok\"}\n"[..]);

        assert!(matches!(
            decoder.decode(&mut buffer),
            ParseResult::Error(FrameError::Malformed(_))
        ));
        match decoder.decode(&mut buffer) {
            ParseResult::Complete(v) => assert_eq!(v, json!({"get": "ok"})),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_discards_rest_of_line_across_reads() {
        let mut decoder = StreamDecoder::new(1024);
        let mut buffer = BytesMut::from(&b"{\"get\" 1"[..]);

        assert!(matches!(decoder.decode(&mut buffer), ParseResult::Error(_)));
        assert!(decoder.is_discarding());

        buffer.extend_from_slice(b", \"x\": 2}\n{\"get\":\"ok\"}");
        match decoder.decode(&mut buffer) {
            ParseResult::Complete(v) => assert_eq!(v, json!({"get": "ok"})),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!decoder.is_discarding());
    }

    #[test]
    fn test_oversized_value_rejected() {
        let mut decoder = StreamDecoder::new(8);
        let mut buffer = BytesMut::from(&b"{\"get\":\"0123456789"[..]);

        assert!(matches!(
            decoder.decode(&mut buffer),
            ParseResult::Error(FrameError::TooLong { limit: 8 })
        ));
        assert!(buffer.is_empty());

        buffer.extend_from_slice(b"\"}\n[]\n");
        match decoder.decode(&mut buffer) {
            ParseResult::Complete(v) => assert_eq!(v, json!([])),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_number_split_across_reads() {
        let mut decoder = StreamDecoder::new(1024);
        let mut buffer = BytesMut::from(&b"12"[..]);
        assert!(matches!(decoder.decode(&mut buffer), ParseResult::Incomplete));

        buffer.extend_from_slice(b"34\n");
        match decoder.decode(&mut buffer) {
            ParseResult::Complete(v) => assert_eq!(v, json!(1234)),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(decoder.decode(&mut buffer), ParseResult::Incomplete));
    }

    #[test]
    fn test_whitespace_only_is_incomplete() {
        let mut decoder = StreamDecoder::new(1024);
        let mut buffer = BytesMut::from(&b" \r\n\t"[..]);
        assert!(matches!(decoder.decode(&mut buffer), ParseResult::Incomplete));
        assert!(buffer.is_empty());
    }
}
