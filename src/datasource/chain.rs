//! Chain indexer API client implementation.
//!
//! Payload fields vary slightly across upstream contract versions (the
//! resolved-value field in particular has been renamed between releases),
//! so every logical field is decoded through an ordered fallback list of
//! names rather than a single fixed key.

use super::{DecodedEvent, EventBatch, EventSource, SourceError};
use crate::domain::{
    Address, Cursor, EventKind, LedgerEvent, MarketId, MarketRecord, SellMode, TimeMs,
};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Event source backed by the chain indexer's HTTP API.
#[derive(Debug, Clone)]
pub struct ChainEventSource {
    client: Client,
    base_url: String,
    page_limit: u32,
}

impl ChainEventSource {
    /// Create a new chain event source.
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            page_limit: 500,
        }
    }

    async fn post(&self, path: &str, payload: Value) -> Result<Value, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(SourceError::NetworkError(e.to_string())))?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(SourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(SourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(SourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| backoff::Error::permanent(SourceError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl EventSource for ChainEventSource {
    async fn poll(&self, kind: EventKind, cursor: Cursor) -> Result<EventBatch, SourceError> {
        debug!(
            "Polling events kind={}, cursor={}",
            kind,
            cursor.as_i64()
        );

        let payload = serde_json::json!({
            "kind": kind.as_str(),
            "cursor": cursor.as_i64(),
            "limit": self.page_limit,
        });

        let response = self.post("/v1/events/poll", payload).await?;

        let events_json = first_field(&response, &["events", "items"])
            .and_then(|v| v.as_array())
            .ok_or_else(|| SourceError::ParseError("Expected events array".to_string()))?;

        let mut events = Vec::new();
        for event_json in events_json {
            match decode_event(kind, event_json) {
                Ok(decoded) => events.push(decoded),
                Err(e) => {
                    warn!("Failed to parse {} event: {}", kind, e);
                }
            }
        }

        let next_cursor = first_i64(&response, &["next_cursor", "nextCursor", "cursor"])
            .map(Cursor::new)
            .unwrap_or(cursor);

        Ok(EventBatch {
            events,
            next_cursor,
        })
    }

    async fn latest_cursor(&self, kind: EventKind) -> Result<Cursor, SourceError> {
        let payload = serde_json::json!({ "kind": kind.as_str() });
        let response = self.post("/v1/events/tip", payload).await?;

        first_i64(&response, &["cursor", "tip", "checkpoint"])
            .map(Cursor::new)
            .ok_or_else(|| SourceError::ParseError("Missing cursor in tip response".to_string()))
    }
}

/// First present, non-null field from an ordered list of names.
fn first_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| value.get(*key))
        .filter(|v| !v.is_null())
}

fn first_i64(value: &Value, keys: &[&str]) -> Option<i64> {
    first_field(value, keys).and_then(|v| v.as_i64())
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    first_field(value, keys).and_then(|v| v.as_str())
}

fn require_i64(value: &Value, keys: &[&str]) -> Result<i64, SourceError> {
    first_i64(value, keys)
        .ok_or_else(|| SourceError::ParseError(format!("Missing field (any of {:?})", keys)))
}

fn require_str<'a>(value: &'a Value, keys: &[&str]) -> Result<&'a str, SourceError> {
    first_str(value, keys)
        .ok_or_else(|| SourceError::ParseError(format!("Missing field (any of {:?})", keys)))
}

/// Decode one upstream event payload for a given kind.
pub fn decode_event(kind: EventKind, json: &Value) -> Result<DecodedEvent, SourceError> {
    let checkpoint = Cursor::new(require_i64(json, &["checkpoint", "sequence", "seq"])?);
    let time_ms = TimeMs::new(require_i64(json, &["time", "timestamp", "block_time"])?);
    let tx_hash = first_str(json, &["tx_hash", "transaction_hash", "txid"]).map(String::from);
    let market_id = MarketId::new(require_str(json, &["market_id", "market"])?.to_string());

    let event = match kind {
        EventKind::SharesPurchased => {
            let user = Address::new(require_str(json, &["user", "owner", "account"])?.to_string());
            LedgerEvent::purchase(
                tx_hash,
                checkpoint,
                time_ms,
                market_id,
                user,
                require_i64(json, &["range_lower", "lower_bound"])?,
                require_i64(json, &["range_upper", "upper_bound"])?,
                require_i64(json, &["shares", "share_amount", "amount"])?,
                require_i64(json, &["cost", "cash_amount"])?,
                decode_price(json),
            )
        }
        EventKind::SharesSold => {
            let user = Address::new(require_str(json, &["user", "owner", "account"])?.to_string());
            LedgerEvent::sale(
                tx_hash,
                checkpoint,
                time_ms,
                market_id,
                user,
                require_i64(json, &["range_lower", "lower_bound"])?,
                require_i64(json, &["range_upper", "upper_bound"])?,
                require_i64(json, &["shares", "share_amount", "amount"])?,
                require_i64(json, &["proceeds", "cash_amount"])?,
                decode_price(json),
                decode_sell_mode(json),
            )
        }
        EventKind::RewardsClaimed => {
            let user = Address::new(require_str(json, &["user", "owner", "account"])?.to_string());
            LedgerEvent::claim(
                tx_hash,
                checkpoint,
                time_ms,
                market_id,
                user,
                require_i64(json, &["range_lower", "lower_bound"])?,
                require_i64(json, &["range_upper", "upper_bound"])?,
                require_i64(json, &["shares", "share_amount", "amount"])?,
                require_i64(json, &["payout", "reward", "cash_amount"])?,
            )
        }
        EventKind::MarketCreated => {
            LedgerEvent::market_created(tx_hash, checkpoint, time_ms, market_id.clone())
        }
        EventKind::MarketResolved => LedgerEvent::market_resolved(
            tx_hash,
            checkpoint,
            time_ms,
            market_id,
            // The canonical drift case: three names across contract versions.
            require_i64(json, &["resolved_value", "resolution_value", "final_value"])?,
        ),
    };

    let market = if kind == EventKind::MarketCreated {
        Some(decode_market(json, event.market_id.clone())?)
    } else {
        None
    };

    Ok(DecodedEvent { event, market })
}

fn decode_price(json: &Value) -> Option<Decimal> {
    let raw = first_field(json, &["price_per_share", "price"])?;
    let parsed = match raw {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => n.as_f64().and_then(|f| Decimal::try_from(f).ok()),
        _ => None,
    };
    if parsed.is_none() {
        warn!(price = %raw, "Unparseable price_per_share, dropping");
    }
    parsed
}

fn decode_sell_mode(json: &Value) -> SellMode {
    match first_str(json, &["sell_mode", "mode"]) {
        Some("targeted") => first_i64(json, &["lot_index", "index"])
            .map(SellMode::Targeted)
            .unwrap_or(SellMode::Fifo),
        _ => SellMode::Fifo,
    }
}

fn decode_market(json: &Value, market_id: MarketId) -> Result<MarketRecord, SourceError> {
    Ok(MarketRecord::new(
        market_id,
        require_str(json, &["name", "title"])?.to_string(),
        first_str(json, &["category"]).unwrap_or("uncategorized").to_string(),
        require_i64(json, &["min_value", "min"])?,
        require_i64(json, &["max_value", "max"])?,
        require_i64(json, &["range_width", "tick_size"])?,
        first_i64(json, &["resolution_time", "resolves_at"]).map(TimeMs::new),
    ))
}
