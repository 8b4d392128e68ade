pub mod memory;
pub mod postgres;
pub mod publisher;

pub use memory::InMemoryEventLog;
pub use postgres::PostgresEventLog;
pub use publisher::{PublisherConfig, ResilientPublisher};

use std::collections::BTreeMap;
use std::future::Future;

/// Flat key/value payload appended to a stream.
pub type Record = BTreeMap<String, String>;

pub const OPERATION_KEY: &str = "operation";
pub const OCCURRED_AT_KEY: &str = "occurred_at";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("event encoding failed: {0}")]
    Encode(String),

    #[error("event log unavailable: {0}")]
    Unavailable(String),

    #[error("append failed: {0}")]
    Append(String),
}

pub trait Event: Send + Sync {
    /// Must carry at least [`OPERATION_KEY`] and [`OCCURRED_AT_KEY`].
    fn encode(&self) -> Result<Record, EventError>;
}

pub trait EventLog: Send + Sync + 'static {
    fn ping(&self) -> impl Future<Output = Result<(), EventError>> + Send;

    /// Appends to `stream`, trimming it to roughly `max_len` entries (0 disables trimming).
    fn append(
        &self,
        stream: &str,
        record: &Record,
        max_len: u64,
    ) -> impl Future<Output = Result<(), EventError>> + Send;
}
