//! Event source abstraction over the chain's per-kind event streams.

use crate::domain::{Cursor, EventKind, LedgerEvent, MarketRecord};
use async_trait::async_trait;
use std::fmt;

pub mod chain;
pub mod mock;

pub use chain::ChainEventSource;
pub use mock::MockEventSource;

/// One decoded upstream event. `market` is populated for MarketCreated,
/// carrying the metadata the market cache is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub event: LedgerEvent,
    pub market: Option<MarketRecord>,
}

/// A page of events for one kind plus the cursor to resume from.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    pub events: Vec<DecodedEvent>,
    pub next_cursor: Cursor,
}

/// Source of typed, cursor-addressable event streams.
///
/// Ordering is guaranteed within a kind's stream only; implementations
/// must handle pagination and retry/backoff for transient upstream
/// failures.
#[async_trait]
pub trait EventSource: Send + Sync + fmt::Debug {
    /// Fetch events of one kind strictly after `cursor`, in stream order.
    async fn poll(&self, kind: EventKind, cursor: Cursor) -> Result<EventBatch, SourceError>;

    /// Current tip of a kind's stream. Used to fast-forward past history
    /// on a first start with no persisted checkpoint.
    async fn latest_cursor(&self, kind: EventKind) -> Result<Cursor, SourceError>;
}

/// Error type for event source operations.
#[derive(Debug, Clone)]
pub enum SourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Parsing error (invalid JSON or malformed response)
    ParseError(String),
    /// Rate limit exceeded (caller should implement backoff)
    RateLimited,
    /// Other error
    Other(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            SourceError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            SourceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            SourceError::RateLimited => write!(f, "Rate limited"),
            SourceError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}
