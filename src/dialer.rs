//! Outbound connections with bounded retry.

use crate::backoff::{Backoff, BackoffConfig};
use crate::endpoint::Endpoint;
use crate::error::{classify_io, DialError, ErrorClass};
use crate::tls;
use crate::transport::{Connection, Connector, TransportConnector};
use rustls::pki_types::ServerName;
use std::io;
use std::time::Duration;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Dialer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialerConfig {
    /// Limit on a single connection attempt (and the TLS handshake).
    pub connect_timeout: Duration,
    /// TCP keep-alive idle time; `None` leaves the OS default.
    pub keep_alive: Option<Duration>,
    /// Total connection attempts before giving up.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub retry_delay: Duration,
    /// Growth of the wait per failed attempt (1 = fixed).
    pub retry_multiplier: u32,
    pub max_retry_delay: Duration,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(300),
            keep_alive: Some(Duration::from_secs(5 * 60)),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            retry_multiplier: 1,
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

impl DialerConfig {
    fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.retry_delay,
            max_delay: self.max_retry_delay,
            multiplier: self.retry_multiplier,
            max_retries: self.max_attempts.saturating_sub(1),
        }
    }
}

/// Establishes one connection per [`dial`](Dialer::dial) call.
pub struct Dialer<C = TransportConnector> {
    config: DialerConfig,
    connector: C,
    tls: Option<TlsConnector>,
    server_name: Option<ServerName<'static>>,
}

impl Dialer {
    pub fn new(config: DialerConfig) -> Self {
        Self {
            connector: TransportConnector::new(config.keep_alive),
            config,
            tls: None,
            server_name: None,
        }
    }
}

impl<C: Connector> Dialer<C> {
    /// Replace the transport used for each attempt.
    pub fn with_connector<D: Connector>(self, connector: D) -> Dialer<D> {
        Dialer {
            config: self.config,
            connector,
            tls: self.tls,
            server_name: self.server_name,
        }
    }

    /// Wrap every connection in TLS.
    pub fn with_tls(mut self, connector: TlsConnector) -> Self {
        self.tls = Some(connector);
        self
    }

    /// Name to verify the server certificate against. Defaults to the
    /// endpoint's host.
    pub fn with_server_name(mut self, name: ServerName<'static>) -> Self {
        self.server_name = Some(name);
        self
    }

    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    /// Connect to `endpoint`, retrying transient failures.
    pub async fn dial(&self, endpoint: &Endpoint) -> Result<Connection, DialError> {
        if endpoint.is_tls() && self.tls.is_none() {
            return Err(DialError::Refused {
                endpoint: endpoint.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "no tls configuration"),
            });
        }

        let stream = self.connect(endpoint).await?;

        let Some(tls) = &self.tls else {
            return Ok(Box::new(stream));
        };

        let handshake_err = |source: io::Error| DialError::Handshake {
            endpoint: endpoint.to_string(),
            source,
        };

        let name = match &self.server_name {
            Some(name) => name.clone(),
            None => tls::server_name(endpoint.server_name())
                .map_err(|e| handshake_err(io::Error::new(io::ErrorKind::InvalidInput, e)))?,
        };

        match timeout(self.config.connect_timeout, tls.connect(name, stream)).await {
            Ok(Ok(stream)) => {
                debug!(endpoint = %endpoint, "TLS established");
                Ok(Box::new(stream))
            }
            Ok(Err(e)) => Err(handshake_err(e)),
            Err(_) => Err(handshake_err(io::Error::from(io::ErrorKind::TimedOut))),
        }
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<C::Stream, DialError> {
        let mut backoff = Backoff::new(self.config.backoff());

        loop {
            let connecting = self.connector.connect(endpoint);
            let attempt = match timeout(self.config.connect_timeout, connecting).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no connection within {:?}", self.config.connect_timeout),
                )),
            };

            let e = match attempt {
                Ok(stream) => {
                    if backoff.failures() > 0 {
                        info!(endpoint = %endpoint, attempts = backoff.failures() + 1, "Connected");
                    } else {
                        debug!(endpoint = %endpoint, "Connected");
                    }
                    return Ok(stream);
                }
                Err(e) => e,
            };

            if classify_io(&e) != ErrorClass::Transient {
                return Err(DialError::Refused {
                    endpoint: endpoint.to_string(),
                    source: e,
                });
            }

            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        endpoint = %endpoint,
                        attempt = backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(DialError::Exhausted {
                        endpoint: endpoint.to_string(),
                        attempts: backoff.failures(),
                        source: e,
                    });
                }
            }
        }
    }
}
