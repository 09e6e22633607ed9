//! Server-side session: one accepted connection, one request at a time.
//!
//! ```text
//!            +--------------------------------------------+
//!            v                                            |
//! AwaitRequest -> Decoding -> Handling -> Encoding -------+
//!                    |           |           |
//!                    +-----------+-----------+--> ClosedClean | ClosedError
//! ```
//!
//! An idle deadline bounds every blocking read and write. It starts at
//! `first_deadline` (time allowed for the first request) and is pushed out to
//! `idle_deadline` after each successful turn. Protocol errors are answered
//! with an [`ErrorPayload`] and the session keeps going; transport errors,
//! deadline expiry and fatal handler errors end it.

use crate::codec::{FrameReader, FrameWriter, Framing, DEFAULT_READ_CHUNK};
use crate::error::{ErrorClass, SessionError};
use crate::handler::RequestHandler;
use crate::wire::ErrorPayload;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace, warn};

/// Upper bound on closing the write side once the session is over.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Per-session timing and framing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Time allowed before the first request completes.
    pub first_deadline: Duration,
    /// Time allowed between successful turns.
    pub idle_deadline: Duration,
    pub framing: Framing,
    /// Bytes requested from the transport per read.
    pub read_chunk: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            first_deadline: Duration::from_secs(45),
            idle_deadline: Duration::from_secs(90),
            framing: Framing::default(),
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

/// Where a session is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitRequest,
    Decoding,
    Handling,
    Encoding,
    ClosedClean,
    ClosedError,
}

/// Summary of a finished session.
#[derive(Debug)]
pub struct SessionEnd {
    /// `ClosedClean` or `ClosedError`.
    pub state: SessionState,
    /// Successful request/response turns.
    pub turns: u64,
    /// Error payloads sent to the peer.
    pub errors_reported: u64,
    /// Why the session ended, for `ClosedError`.
    pub error: Option<SessionError>,
}

impl SessionEnd {
    pub fn is_clean(&self) -> bool {
        self.state == SessionState::ClosedClean
    }
}

/// One connection driven through the request/response loop.
pub struct Session<S, H> {
    peer: String,
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
    handler: Arc<H>,
    idle_deadline: Duration,
    window: Duration,
    deadline: Instant,
    state: SessionState,
    turns: u64,
    errors_reported: u64,
}

impl<S, H> Session<S, H>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
    H: RequestHandler,
{
    /// Take ownership of `stream`; the first-request deadline starts now.
    pub fn new<P: Into<String>>(
        stream: S,
        peer: P,
        handler: Arc<H>,
        config: &SessionConfig,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);

        Self {
            peer: peer.into(),
            reader: FrameReader::new(read_half, &config.framing).with_read_chunk(config.read_chunk),
            writer: FrameWriter::new(write_half),
            handler,
            idle_deadline: config.idle_deadline,
            window: config.first_deadline,
            deadline: Instant::now() + config.first_deadline,
            state: SessionState::AwaitRequest,
            turns: 0,
            errors_reported: 0,
        }
    }

    /// Use an already-running first deadline (e.g. one armed before a TLS
    /// handshake).
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Serve requests until the peer leaves or the session fails, then
    /// release the connection.
    pub async fn run(mut self) -> SessionEnd {
        let result = self.serve().await;
        self.close(result).await
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        loop {
            self.state = SessionState::Decoding;
            let window = self.window;
            let decoded = timeout_at(self.deadline, self.reader.read_frame::<H::Request>())
                .await
                .map_err(|_| SessionError::DeadlineElapsed(window))?;

            let request = match decoded {
                Ok(Some(request)) => request,
                Ok(None) => {
                    trace!(peer = %self.peer, "Peer closed connection");
                    return Ok(());
                }
                Err(e) if e.class() == ErrorClass::Protocol => {
                    warn!(peer = %self.peer, error = %e, "Bad request");
                    self.report(&e.to_string()).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            self.state = SessionState::Handling;
            let response = match self.handler.handle(request) {
                Ok(response) => response,
                Err(e) if e.is_fatal() => {
                    return Err(SessionError::Handler(e.message().to_string()));
                }
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "Handler error");
                    self.report(e.message()).await?;
                    continue;
                }
            };

            self.state = SessionState::Encoding;
            let sent = timeout_at(self.deadline, self.writer.write_frame(&response))
                .await
                .map_err(|_| SessionError::DeadlineElapsed(window))?;

            match sent {
                Ok(()) => {}
                Err(e) if e.class() == ErrorClass::Protocol => {
                    warn!(peer = %self.peer, error = %e, "Failed to encode response");
                    self.report(&e.to_string()).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            self.turns += 1;
            self.window = self.idle_deadline;
            self.deadline = Instant::now() + self.idle_deadline;
            self.state = SessionState::AwaitRequest;
            trace!(peer = %self.peer, turns = self.turns, "Request served");
        }
    }

    /// Send one error payload to the peer.
    async fn report(&mut self, message: &str) -> Result<(), SessionError> {
        self.state = SessionState::Encoding;
        let window = self.window;
        let payload = ErrorPayload::new(message);

        timeout_at(self.deadline, self.writer.write_frame(&payload))
            .await
            .map_err(|_| SessionError::DeadlineElapsed(window))?
            .map_err(SessionError::Frame)?;

        self.errors_reported += 1;
        Ok(())
    }

    async fn close(mut self, result: Result<(), SessionError>) -> SessionEnd {
        let (state, error) = match result {
            Ok(()) => (SessionState::ClosedClean, None),
            Err(e) => (SessionState::ClosedError, Some(e)),
        };
        self.state = state;

        match timeout(SHUTDOWN_GRACE, self.writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(peer = %self.peer, error = %e, "Shutdown failed"),
            Err(_) => trace!(peer = %self.peer, "Shutdown timed out"),
        }

        SessionEnd {
            state,
            turns: self.turns,
            errors_reported: self.errors_reported,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;
    use crate::handler::HandlerError;
    use serde::{Deserialize, Serialize};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio_test::io::Builder;

    #[derive(Debug, Deserialize)]
    struct Query {
        get: String,
    }

    #[derive(Debug, Serialize)]
    struct Answer {
        value: String,
    }

    /// Upper-cases the query; `fail` and `fatal` trigger handler errors.
    struct UpperHandler;

    impl RequestHandler for UpperHandler {
        type Request = Query;
        type Response = Vec<Answer>;

        fn handle(&self, request: Query) -> Result<Vec<Answer>, HandlerError> {
            match request.get.as_str() {
                "fail" => Err(HandlerError::new("no such thing")),
                "fatal" => Err(HandlerError::fatal("data gone")),
                "" => Ok(Vec::new()),
                other => Ok(vec![Answer {
                    value: other.to_uppercase(),
                }]),
            }
        }
    }

    struct Peer {
        reader: BufReader<tokio::io::ReadHalf<DuplexStream>>,
        writer: tokio::io::WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn send(&mut self, bytes: &[u8]) {
            self.writer.write_all(bytes).await.unwrap();
        }

        async fn recv(&mut self) -> Option<String> {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await.unwrap();
            (n > 0).then(|| line.trim_end().to_string())
        }
    }

    fn start(config: SessionConfig) -> (Peer, tokio::task::JoinHandle<SessionEnd>) {
        let (client, server) = tokio::io::duplex(4096);
        let session = Session::new(server, "test-peer", Arc::new(UpperHandler), &config);
        let handle = tokio::spawn(session.run());
        let (r, w) = tokio::io::split(client);
        (
            Peer {
                reader: BufReader::new(r),
                writer: w,
            },
            handle,
        )
    }

    #[tokio::test]
    async fn test_round_trip() {
        let mock = Builder::new()
            .read(b"{\"get\":\"usd\"}\n")
            .write(b"[{\"value\":\"USD\"}]\n")
            .read(b"{\"get\":\"\"}\n")
            .write(b"[]\n")
            .build();

        let end = Session::new(mock, "mock", Arc::new(UpperHandler), &SessionConfig::default())
            .run()
            .await;
        assert!(end.is_clean());
        assert_eq!(end.turns, 2);
        assert!(end.error.is_none());
    }

    #[tokio::test]
    async fn test_malformed_request_reported_and_session_survives() {
        let config = SessionConfig {
            framing: Framing::lines(),
            ..SessionConfig::default()
        };
        let (mut peer, handle) = start(config);

        peer.send(b"{\"get\":\n").await;
        let error: ErrorPayload = serde_json::from_str(&peer.recv().await.unwrap()).unwrap();
        assert!(!error.message.is_empty());

        peer.send(b"{\"get\":\"eur\"}\n").await;
        assert_eq!(peer.recv().await.unwrap(), r#"[{"value":"EUR"}]"#);

        drop(peer);
        let end = handle.await.unwrap();
        assert_eq!(end.state, SessionState::ClosedClean);
        assert_eq!(end.turns, 1);
        assert_eq!(end.errors_reported, 1);
    }

    #[tokio::test]
    async fn test_truncated_request_then_valid_with_default_config() {
        let (mut peer, handle) = start(SessionConfig::default());

        peer.send(b"{\"get\":\n{\"get\":\"usd\"}\n").await;
        let error: ErrorPayload = serde_json::from_str(&peer.recv().await.unwrap()).unwrap();
        assert!(!error.message.is_empty());
        assert_eq!(peer.recv().await.unwrap(), r#"[{"value":"USD"}]"#);

        drop(peer);
        let end = handle.await.unwrap();
        assert!(end.is_clean());
        assert_eq!(end.turns, 1);
        assert_eq!(end.errors_reported, 1);
    }

    #[tokio::test]
    async fn test_final_request_without_newline_then_half_close() {
        let (mut peer, handle) = start(SessionConfig::default());

        peer.send(b"{\"get\":\"jpy\"}").await;
        peer.writer.shutdown().await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), r#"[{"value":"JPY"}]"#);
        assert_eq!(peer.recv().await, None);

        let end = handle.await.unwrap();
        assert_eq!(end.state, SessionState::ClosedClean);
        assert_eq!(end.turns, 1);
    }

    #[tokio::test]
    async fn test_handler_error_reported() {
        let (mut peer, handle) = start(SessionConfig::default());

        peer.send(b"{\"get\":\"fail\"}\n").await;
        assert_eq!(peer.recv().await.unwrap(), r#"{"Error":"no such thing"}"#);

        peer.send(b"{\"get\":\"ok\"}\n").await;
        assert_eq!(peer.recv().await.unwrap(), r#"[{"value":"OK"}]"#);

        drop(peer);
        assert!(handle.await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_fatal_handler_error_closes() {
        let (mut peer, handle) = start(SessionConfig::default());

        peer.send(b"{\"get\":\"fatal\"}\n").await;
        assert_eq!(peer.recv().await, None);

        let end = handle.await.unwrap();
        assert_eq!(end.state, SessionState::ClosedError);
        assert!(matches!(end.error, Some(SessionError::Handler(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_hits_first_deadline() {
        let (mut peer, handle) = start(SessionConfig::default());
        let started = Instant::now();

        // The session closes its side, so the peer sees end of stream.
        assert_eq!(peer.recv().await, None);

        let end = handle.await.unwrap();
        assert_eq!(end.state, SessionState::ClosedError);
        assert!(matches!(
            end.error,
            Some(SessionError::DeadlineElapsed(d)) if d == Duration::from_secs(45)
        ));
        assert!(started.elapsed() >= Duration::from_secs(45));
        assert_eq!(end.turns, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_renewed_after_turn() {
        let (mut peer, handle) = start(SessionConfig::default());

        peer.send(b"{\"get\":\"a\"}\n").await;
        assert_eq!(peer.recv().await.unwrap(), r#"[{"value":"A"}]"#);

        // Past the first deadline but inside the renewed one.
        tokio::time::sleep(Duration::from_secs(60)).await;
        peer.send(b"{\"get\":\"b\"}\n").await;
        assert_eq!(peer.recv().await.unwrap(), r#"[{"value":"B"}]"#);

        tokio::time::sleep(Duration::from_secs(91)).await;
        assert_eq!(peer.recv().await, None);

        let end = handle.await.unwrap();
        assert_eq!(end.turns, 2);
        assert!(matches!(
            end.error,
            Some(SessionError::DeadlineElapsed(d)) if d == Duration::from_secs(90)
        ));
    }

    #[tokio::test]
    async fn test_transport_error_closes_with_error() {
        let mock = Builder::new()
            .read(b"{\"get\":\"a\"}\n")
            .write_error(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .build();

        let end = Session::new(mock, "mock", Arc::new(UpperHandler), &SessionConfig::default())
            .run()
            .await;
        assert_eq!(end.state, SessionState::ClosedError);
        assert!(matches!(end.error, Some(SessionError::Frame(FrameError::Io(_)))));
        assert_eq!(end.turns, 0);
    }
}
