//! Error types and failure classification.
//!
//! Every fallible operation in the crate produces an explicit variant from
//! one of the enums below. Callers decide how to react by asking for the
//! [`ErrorClass`] of a failure rather than inspecting error internals:
//!
//! - `Transient`: worth retrying with backoff (accept and dial hiccups)
//! - `Fatal`: the affected loop or session stops
//! - `Protocol`: a bad message on a healthy connection, reported to the peer

use std::io;
use std::time::Duration;
use thiserror::Error;

/// How a failure should be handled by the loop that observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Momentary failure, retry with backoff.
    Transient,
    /// Stop the affected loop or session.
    Fatal,
    /// Malformed message; report to the peer and keep the connection.
    Protocol,
}

/// Classify an I/O error raised by accept, connect, read or write.
pub fn classify_io(err: &io::Error) -> ErrorClass {
    #[cfg(unix)]
    if let Some(code) = err.raw_os_error() {
        if matches!(
            code,
            libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM | libc::EAGAIN
        ) {
            return ErrorClass::Transient;
        }
    }

    match err.kind() {
        io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

/// Errors produced while framing messages on a byte stream.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The bytes of one message could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// No message boundary was found within the frame limit.
    #[error("message exceeds {limit} bytes without a boundary")]
    TooLong { limit: usize },

    /// An outbound value could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// The underlying stream failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Protocol errors leave the connection usable, transport errors do not.
    pub fn class(&self) -> ErrorClass {
        match self {
            FrameError::Malformed(_) | FrameError::TooLong { .. } | FrameError::Encode(_) => {
                ErrorClass::Protocol
            }
            FrameError::Io(_) => ErrorClass::Fatal,
        }
    }
}

/// Reasons a server session ended in the error state.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer stayed silent (or stalled) past the idle deadline.
    #[error("idle deadline of {0:?} elapsed")]
    DeadlineElapsed(Duration),

    /// Reading or writing a frame failed at the transport level.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The request handler signalled a condition that ends the session.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The TLS handshake with the peer did not complete.
    #[error("tls handshake failed: {0}")]
    Handshake(io::Error),
}

/// Fatal conditions that stop the accept loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening endpoint could not be created.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// Transient accept failures outlasted the retry ceiling.
    #[error("unable to accept after {attempts} consecutive failures: {source}")]
    AcceptExhausted {
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

/// Failures establishing an outbound connection.
#[derive(Debug, Error)]
pub enum DialError {
    /// Every attempt failed transiently; the endpoint was never reached.
    #[error("unable to reach {endpoint} after {attempts} attempts: {source}")]
    Exhausted {
        endpoint: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// A non-transient failure aborted dialing without retry.
    #[error("failed to connect to {endpoint}: {source}")]
    Refused {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// The transport connected but the TLS handshake failed.
    #[error("tls handshake with {endpoint} failed: {source}")]
    Handshake {
        endpoint: String,
        #[source]
        source: io::Error,
    },
}

/// Failures of a single client request/response turn.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a structured error payload.
    #[error("server error: {0}")]
    Remote(String),

    /// Framing failed while sending the request or reading the reply.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The server closed the connection before replying.
    #[error("connection closed by server")]
    Closed,

    /// The connection could not be established.
    #[error(transparent)]
    Dial(#[from] DialError),
}

impl ClientError {
    /// Whether the connection can carry another request after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::Remote(_) => true,
            ClientError::Frame(e) => e.class() == ErrorClass::Protocol,
            ClientError::Closed | ClientError::Dial(_) => false,
        }
    }
}
