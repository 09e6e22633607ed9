//! Request handler contract.
//!
//! The session machinery carries requests to a handler and its responses
//! back to the peer. The handler itself is application logic and knows
//! nothing about the transport. It may read shared data, which must be
//! immutable for the lifetime of the server since sessions run in parallel.

use crate::wire::ErrorPayload;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Maps one decoded request to one response.
pub trait RequestHandler: Send + Sync + 'static {
    type Request: DeserializeOwned + Send;
    type Response: Serialize + Send + Sync;

    fn handle(&self, request: Self::Request) -> Result<Self::Response, HandlerError>;
}

/// Failure reported by a handler.
///
/// Ordinary failures are sent to the peer as an error payload and the
/// connection carries on. Fatal failures end the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
    fatal: bool,
}

impl HandlerError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Sends every request straight back.
///
/// A request that looks like an error report is refused, since echoing it
/// would read as a server error on the other end.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    type Request = serde_json::Value;
    type Response = serde_json::Value;

    fn handle(&self, request: Self::Request) -> Result<Self::Response, HandlerError> {
        if ErrorPayload::is_error_shaped(&request) {
            return Err(HandlerError::new("cannot echo an error report"));
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_echo_returns_request() {
        let request = json!({"msg": "hello", "n": [1, 2, 3]});
        assert_eq!(EchoHandler.handle(request.clone()).unwrap(), request);
    }

    #[test]
    fn test_echo_refuses_error_shaped_request() {
        let err = EchoHandler.handle(json!({"Error": "hi"})).unwrap_err();
        assert!(!err.is_fatal());

        // Extra fields make it an ordinary value again.
        let request = json!({"Error": "hi", "n": 1});
        assert_eq!(EchoHandler.handle(request.clone()).unwrap(), request);
    }

    #[test]
    fn test_handler_error_kinds() {
        let soft = HandlerError::new("not found");
        assert!(!soft.is_fatal());
        assert_eq!(soft.to_string(), "not found");

        let hard = HandlerError::fatal("dataset unavailable");
        assert!(hard.is_fatal());
        assert_eq!(hard.message(), "dataset unavailable");
    }
}
