//! Mock event source for testing without network calls.

use super::{DecodedEvent, EventBatch, EventSource, SourceError};
use crate::domain::{Cursor, EventKind, LedgerEvent, MarketRecord};
use std::sync::Mutex;

/// Mock event source serving predefined per-kind streams.
#[derive(Debug, Default)]
pub struct MockEventSource {
    events: Vec<DecodedEvent>,
    /// Number of upcoming polls that fail with a transient network error.
    failures_remaining: Mutex<u32>,
}

impl MockEventSource {
    /// Create a new mock event source with empty streams.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trade/market event to the stream of its kind.
    pub fn with_event(mut self, event: LedgerEvent) -> Self {
        self.events.push(DecodedEvent {
            event,
            market: None,
        });
        self
    }

    /// Add a MarketCreated event carrying its cache metadata.
    pub fn with_market_event(mut self, event: LedgerEvent, market: MarketRecord) -> Self {
        self.events.push(DecodedEvent {
            event,
            market: Some(market),
        });
        self
    }

    /// Make the next `n` polls fail with a transient network error.
    pub fn with_transient_failures(self, n: u32) -> Self {
        *self.failures_remaining.lock().unwrap() = n;
        self
    }

    fn stream_of(&self, kind: EventKind) -> Vec<DecodedEvent> {
        let mut events: Vec<DecodedEvent> = self
            .events
            .iter()
            .filter(|e| e.event.kind == kind)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.event.checkpoint);
        events
    }
}

#[async_trait::async_trait]
impl EventSource for MockEventSource {
    async fn poll(&self, kind: EventKind, cursor: Cursor) -> Result<EventBatch, SourceError> {
        {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SourceError::NetworkError("injected failure".to_string()));
            }
        }

        let events: Vec<DecodedEvent> = self
            .stream_of(kind)
            .into_iter()
            .filter(|e| e.event.checkpoint > cursor)
            .collect();

        let next_cursor = events
            .iter()
            .map(|e| e.event.checkpoint)
            .max()
            .unwrap_or(cursor);

        Ok(EventBatch {
            events,
            next_cursor,
        })
    }

    async fn latest_cursor(&self, kind: EventKind) -> Result<Cursor, SourceError> {
        Ok(self
            .stream_of(kind)
            .iter()
            .map(|e| e.event.checkpoint)
            .max()
            .unwrap_or(Cursor::new(0)))
    }
}
