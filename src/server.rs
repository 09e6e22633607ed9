//! Listener and accept loop.
//!
//! Binds the configured endpoint, accepts connections and spawns one
//! [`Session`] per connection. Transient accept failures are retried with
//! bounded exponential backoff; exhausting the retries stops the loop.

use crate::backoff::{Backoff, BackoffConfig};
use crate::endpoint::Endpoint;
use crate::error::{classify_io, ErrorClass, ServerError, SessionError};
use crate::handler::RequestHandler;
use crate::session::{Session, SessionConfig, SessionEnd};
use crate::transport::{Acceptor, Listener};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout_at, Instant};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Maximum number of concurrent connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Everything the accept loop needs besides the handler.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub endpoint: Endpoint,
    pub session: SessionConfig,
    pub accept_backoff: BackoffConfig,
    pub max_connections: usize,
}

impl ServerConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            session: SessionConfig::default(),
            accept_backoff: BackoffConfig::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Server instance
pub struct Server<H> {
    config: ServerConfig,
    handler: Arc<H>,
    tls: Option<TlsAcceptor>,
    connection_limit: Arc<Semaphore>,
}

impl<H: RequestHandler> Server<H> {
    pub fn new(config: ServerConfig, handler: H) -> Self {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections.max(1)));

        Server {
            config,
            handler: Arc::new(handler),
            tls: None,
            connection_limit,
        }
    }

    /// Run a TLS handshake on every accepted connection.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Connections currently holding a slot.
    pub fn active_connections(&self) -> usize {
        self.config.max_connections.max(1) - self.connection_limit.available_permits()
    }

    /// Bind the configured endpoint.
    pub async fn bind(&self) -> Result<Listener, ServerError> {
        Listener::bind(&self.config.endpoint)
            .await
            .map_err(|source| ServerError::Bind {
                endpoint: self.config.endpoint.to_string(),
                source,
            })
    }

    /// Bind and serve until a fatal accept condition.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Bind and serve until `shutdown` resolves or accepting fails fatally.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = self.bind().await?;
        info!(
            endpoint = %self.config.endpoint,
            address = %listener.local_addr().unwrap_or_default(),
            tls = self.tls.is_some(),
            "Server listening"
        );

        // The listener is dropped on return, which closes it.
        self.serve_until(listener, shutdown).await
    }

    /// Accept from `acceptor` until a fatal accept condition.
    pub async fn serve<A: Acceptor>(&self, acceptor: A) -> Result<(), ServerError> {
        self.serve_until(acceptor, std::future::pending()).await
    }

    /// The accept loop.
    pub async fn serve_until<A, F>(&self, mut acceptor: A, shutdown: F) -> Result<(), ServerError>
    where
        A: Acceptor,
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut backoff = Backoff::new(self.config.accept_backoff.clone());

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.connection_limit.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };

            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = acceptor.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if backoff.failures() > 0 {
                        info!(failures = backoff.failures(), "Accepting again");
                    }
                    backoff.reset();
                    debug!(peer = %peer, "New connection");
                    self.spawn_session(stream, peer, permit);
                }
                Err(e) if classify_io(&e) == ErrorClass::Transient => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            error = %e,
                            failures = backoff.failures(),
                            delay_ms = delay.as_millis() as u64,
                            "Accept failed, backing off"
                        );
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => {
                        error!(error = %e, failures = backoff.failures(), "Giving up on accept");
                        return Err(ServerError::AcceptExhausted {
                            attempts: backoff.failures(),
                            source: e,
                        });
                    }
                },
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }

        info!("Shutting down");
        Ok(())
    }

    fn spawn_session<S>(&self, stream: S, peer: String, permit: OwnedSemaphorePermit)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let handler = Arc::clone(&self.handler);
        let config = self.config.session.clone();
        let tls = self.tls.clone();

        tokio::spawn(async move {
            let deadline = Instant::now() + config.first_deadline;

            let end = match tls {
                None => {
                    Session::new(stream, peer.as_str(), handler, &config)
                        .with_deadline(deadline)
                        .run()
                        .await
                }
                Some(tls) => match timeout_at(deadline, tls.accept(stream)).await {
                    Ok(Ok(stream)) => {
                        Session::new(stream, peer.as_str(), handler, &config)
                            .with_deadline(deadline)
                            .run()
                            .await
                    }
                    Ok(Err(e)) => {
                        let e = SessionError::Handshake(e);
                        debug!(peer = %peer, error = %e, "Connection error");
                        drop(permit);
                        return;
                    }
                    Err(_) => {
                        let e = SessionError::DeadlineElapsed(config.first_deadline);
                        debug!(peer = %peer, error = %e, "TLS handshake timed out");
                        drop(permit);
                        return;
                    }
                },
            };

            log_session_end(&peer, &end);
            drop(permit);
        });
    }
}

fn log_session_end(peer: &str, end: &SessionEnd) {
    match &end.error {
        None => debug!(peer = %peer, turns = end.turns, "Connection closed"),
        Some(e) => debug!(
            peer = %peer,
            turns = end.turns,
            error = %e,
            "Connection error"
        ),
    }
}
