use super::{Currency, CurrencyRequest, Dataset};
use crate::handler::{HandlerError, RequestHandler};
use std::sync::Arc;
use tracing::trace;

/// Answers lookup requests from a shared, read-only [`Dataset`].
#[derive(Debug, Clone)]
pub struct CurrencyHandler {
    dataset: Arc<Dataset>,
}

impl CurrencyHandler {
    pub fn new(dataset: Arc<Dataset>) -> Self {
        Self { dataset }
    }
}

impl RequestHandler for CurrencyHandler {
    type Request = CurrencyRequest;
    type Response = Vec<Currency>;

    fn handle(&self, request: CurrencyRequest) -> Result<Vec<Currency>, HandlerError> {
        let found = self.dataset.find(&request.get);
        trace!(filter = %request.get, found = found.len(), "Lookup");
        Ok(found)
    }
}
