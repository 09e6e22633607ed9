//! Message framing over a byte stream.
//!
//! Reads on a stream transport do not line up with message boundaries: one
//! read may carry half a message, or the tail of one message and the head of
//! the next. Two interchangeable decoding strategies recover the boundaries:
//!
//! - [`Framing::Stream`]: the JSON document format is self-delimiting, so the
//!   decoder consumes exactly one complete value and leaves the remainder
//!   buffered for the next call.
//! - [`Framing::Delimited`]: bytes accumulate until a terminator byte is seen;
//!   the accumulated frame (terminator included) is parsed as one value and
//!   anything after the terminator is carried over to the next message.
//!
//! Both strategies are sans-IO and operate on a `BytesMut` accumulator.
//! [`FrameReader`] and [`FrameWriter`] drive them over async streams.
//!
//! ## Wire Format
//!
//! Outbound values are always written as compact JSON followed by `\n`.
//! Compact JSON never contains a raw newline, so the output is readable by
//! either strategy when the delimiter is `\n`.
//!
//! ```text
//! {"Get":"USD"}\n
//! [{"Code":"USD","Name":"US Dollar","Number":"840","Country":"United States"}]\n
//! ```

pub mod delimited;
pub mod stream;

use crate::error::{ErrorClass, FrameError};
use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

pub use delimited::DelimitedDecoder;
pub use stream::StreamDecoder;

/// Largest message accepted by default (64 KiB).
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024;

/// Bytes requested from the transport per read by default.
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// Decoding strategy, selectable per deployment.
///
/// The default is newline-delimited: a truncated message is cut off at the
/// next newline and reported, so the following request is still served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Self-delimiting streaming decode.
    Stream { max_frame: usize },
    /// Accumulate until `terminator`, then parse.
    Delimited { terminator: u8, max_frame: usize },
}

impl Default for Framing {
    fn default() -> Self {
        Framing::lines()
    }
}

impl Framing {
    /// Self-delimiting framing with the default frame limit.
    pub fn streaming() -> Self {
        Framing::Stream {
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    /// Newline-delimited framing with the default frame limit.
    pub fn lines() -> Self {
        Framing::Delimited {
            terminator: b'\n',
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    pub fn max_frame(&self) -> usize {
        match self {
            Framing::Stream { max_frame } | Framing::Delimited { max_frame, .. } => *max_frame,
        }
    }
}

/// Result of trying to decode one message from the accumulator.
#[derive(Debug)]
pub enum ParseResult {
    /// One complete message was removed from the buffer.
    Complete(serde_json::Value),
    /// Need more data.
    Incomplete,
    /// The buffered message was invalid and has been discarded.
    Error(FrameError),
}

/// A configured decoder for one connection.
#[derive(Debug)]
pub enum Decoder {
    Stream(StreamDecoder),
    Delimited(DelimitedDecoder),
}

impl Decoder {
    pub fn new(framing: &Framing) -> Self {
        match *framing {
            Framing::Stream { max_frame } => Decoder::Stream(StreamDecoder::new(max_frame)),
            Framing::Delimited {
                terminator,
                max_frame,
            } => Decoder::Delimited(DelimitedDecoder::new(terminator, max_frame)),
        }
    }

    /// Try to take one message from the front of `buffer`.
    pub fn decode(&mut self, buffer: &mut BytesMut) -> ParseResult {
        match self {
            Decoder::Stream(d) => d.decode(buffer),
            Decoder::Delimited(d) => d.decode(buffer),
        }
    }

    /// Drop per-buffer state once the accumulator has been emptied.
    fn reset(&mut self) {
        match self {
            Decoder::Stream(d) => d.reset(),
            Decoder::Delimited(d) => d.reset(),
        }
    }

    /// Decode after the peer finished sending.
    ///
    /// Complete messages still buffered are returned first. A non-blank
    /// remainder is parsed as a final message, which fails as malformed if it
    /// was cut short. `Ok(None)` means the stream ended cleanly.
    pub fn decode_eof(
        &mut self,
        buffer: &mut BytesMut,
    ) -> Result<Option<serde_json::Value>, FrameError> {
        match self.decode(buffer) {
            ParseResult::Complete(value) => return Ok(Some(value)),
            ParseResult::Error(e) => return Err(e),
            ParseResult::Incomplete => {}
        }

        let discarding = match self {
            Decoder::Stream(d) => d.is_discarding(),
            Decoder::Delimited(d) => d.is_discarding(),
        };
        let remainder = buffer.split();
        self.reset();
        if discarding || is_blank(&remainder) {
            return Ok(None);
        }

        serde_json::from_slice(&remainder)
            .map(Some)
            .map_err(|e| FrameError::Malformed(e.to_string()))
    }
}

/// True when `bytes` holds nothing but JSON whitespace.
pub(crate) fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

/// Reads framed, typed messages from an async byte stream.
pub struct FrameReader<R> {
    inner: R,
    decoder: Decoder,
    buffer: BytesMut,
    chunk: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, framing: &Framing) -> Self {
        Self {
            inner,
            decoder: Decoder::new(framing),
            buffer: BytesMut::with_capacity(DEFAULT_READ_CHUNK),
            chunk: vec![0u8; DEFAULT_READ_CHUNK],
            eof: false,
        }
    }

    /// Change how many bytes are requested per read.
    pub fn with_read_chunk(mut self, size: usize) -> Self {
        self.chunk = vec![0u8; size.max(1)];
        self
    }

    /// Read the next message.
    ///
    /// Blocks until one full message is buffered. Returns `Ok(None)` when the
    /// peer closed the stream between messages.
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        loop {
            if self.eof {
                return match self.decoder.decode_eof(&mut self.buffer)? {
                    Some(value) => into_typed(value).map(Some),
                    None => Ok(None),
                };
            }

            match self.decoder.decode(&mut self.buffer) {
                ParseResult::Complete(value) => return into_typed(value).map(Some),
                ParseResult::Error(e) => return Err(e),
                ParseResult::Incomplete => {}
            }

            let n = self.inner.read(&mut self.chunk).await?;
            if n == 0 {
                trace!(buffered = self.buffer.len(), "End of stream");
                self.eof = true;
            } else {
                self.buffer.extend_from_slice(&self.chunk[..n]);
            }
        }
    }

    /// Bytes received but not yet consumed by a decoded message.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn into_typed<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, FrameError> {
    serde_json::from_value(value).map_err(|e| FrameError::Malformed(e.to_string()))
}

/// Writes typed messages as newline-terminated compact JSON.
pub struct FrameWriter<W> {
    inner: W,
    buffer: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(DEFAULT_READ_CHUNK),
        }
    }

    /// Write exactly one complete message and flush it.
    ///
    /// Serialization happens before any byte is written, so an
    /// [`FrameError::Encode`] leaves the stream untouched.
    pub async fn write_frame<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> Result<(), FrameError> {
        self.buffer.clear();
        serde_json::to_writer(&mut self.buffer, value)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        self.buffer.push(b'\n');

        self.inner.write_all(&self.buffer).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Close the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Whether a read error leaves the connection usable.
pub fn is_recoverable(err: &FrameError) -> bool {
    err.class() == ErrorClass::Protocol
}
