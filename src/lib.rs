//! framed-lookup: a framed request/response service over stream transports
//!
//! Requests and responses are JSON values carried over TCP, Unix domain
//! sockets or TLS. The crate provides:
//! - Message framing for byte streams (self-delimiting or terminator-based)
//! - Server sessions with idle deadlines and protocol-error recovery
//! - An accept loop with bounded backoff on transient failures
//! - A dialer with bounded retry and a turn-based client
//! - A currency lookup service and an echo service

pub mod backoff;
pub mod client;
pub mod codec;
pub mod config;
pub mod currency;
pub mod dialer;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod server;
pub mod session;
pub mod tls;
pub mod transport;
pub mod wire;

pub use client::Client;
pub use codec::Framing;
pub use dialer::{Dialer, DialerConfig};
pub use endpoint::{Endpoint, Network};
pub use handler::{EchoHandler, HandlerError, RequestHandler};
pub use server::{Server, ServerConfig};
pub use session::{Session, SessionConfig};
