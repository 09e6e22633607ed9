//! Reply payloads: a normal response or a structured error.
//!
//! Errors travel as an object with a single `Error` field. A client reading a
//! reply tries the error shape first, so it never has to guess whether a
//! value is a result or a failure report.
//!
//! ```text
//! success: [{"Code":"USD",...}]
//! failure: {"Error":"expected value at line 1 column 8"}
//! ```

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Error report sent to the peer in place of a response.
///
/// Only an object with exactly one `Error` (or `error`) string field reads
/// back as an error; arrays and wider objects never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    #[serde(rename = "Error")]
    pub message: String,
}

impl<'de> Deserialize<'de> for ErrorPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = BTreeMap::<String, String>::deserialize(deserializer)?;
        if fields.len() != 1 {
            return Err(de::Error::custom("not an error payload"));
        }
        fields
            .remove("Error")
            .or_else(|| fields.remove("error"))
            .map(|message| ErrorPayload { message })
            .ok_or_else(|| de::Error::custom("not an error payload"))
    }
}

impl ErrorPayload {
    /// True when a client would read `value` as an error report.
    pub fn is_error_shaped(value: &serde_json::Value) -> bool {
        ErrorPayload::deserialize(value).is_ok()
    }

    pub fn new<S: Into<String>>(message: S) -> Self {
        let message = message.into();
        Self {
            message: if message.is_empty() {
                "unknown error".to_string()
            } else {
                message
            },
        }
    }
}

/// What a server sends back for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply<T> {
    Error(ErrorPayload),
    Ok(T),
}

impl<T> Reply<T> {
    pub fn into_result(self) -> Result<T, String> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Error(e) => Err(e.message),
        }
    }
}
