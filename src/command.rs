use serde_json::Value;

use crate::api::EndpointKey;
use crate::error::FetchError;

/// Messages delivered to the event loop from background tasks.
#[derive(Debug, Clone)]
pub enum Command {
    QueryResolved(QueryOutcome),
    Status(String),
    Error(String),
}

/// Result of one issued request, tagged with the generation that was current
/// for its key when the request started.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub key: EndpointKey,
    pub generation: u64,
    pub result: Result<Value, FetchError>,
}
