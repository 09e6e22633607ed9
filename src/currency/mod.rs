//! Currency lookup service.
//!
//! Clients send `{"Get":"<code, number, name or country>"}` and receive a
//! JSON array of matching currency records.

mod dataset;
mod handler;

pub use dataset::{Dataset, DatasetError};
pub use handler::CurrencyHandler;

use serde::{Deserialize, Serialize};

/// One ISO 4217 currency as used in a given country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Currency {
    pub code: String,
    pub name: String,
    pub number: String,
    pub country: String,
}

/// A search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyRequest {
    #[serde(rename = "Get", alias = "get")]
    pub get: String,
}

impl CurrencyRequest {
    pub fn new<S: Into<String>>(filter: S) -> Self {
        Self { get: filter.into() }
    }
}
