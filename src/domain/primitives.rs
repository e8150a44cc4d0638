//! Domain primitives: TimeMs, Address, MarketId, Cursor, enums.

use serde::{Deserialize, Serialize};

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }
}

/// Wallet address (hex string).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    pub fn new(addr: String) -> Self {
        Address(addr)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-chain market identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(pub String);

impl MarketId {
    pub fn new(id: String) -> Self {
        MarketId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MarketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque pointer into an event kind's stream. Monotonic within a kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor(pub i64);

impl Cursor {
    pub fn new(seq: i64) -> Self {
        Cursor(seq)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

/// Event kinds emitted by the chain, each with its own cursor stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    SharesPurchased,
    SharesSold,
    RewardsClaimed,
    MarketCreated,
    MarketResolved,
}

impl EventKind {
    /// All kinds, in the order the ingestion loops are spawned.
    pub const ALL: [EventKind; 5] = [
        EventKind::MarketCreated,
        EventKind::SharesPurchased,
        EventKind::SharesSold,
        EventKind::RewardsClaimed,
        EventKind::MarketResolved,
    ];

    /// Stable storage/wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SharesPurchased => "shares_purchased",
            EventKind::SharesSold => "shares_sold",
            EventKind::RewardsClaimed => "rewards_claimed",
            EventKind::MarketCreated => "market_created",
            EventKind::MarketResolved => "market_resolved",
        }
    }

    pub fn parse(s: &str) -> Option<EventKind> {
        match s {
            "shares_purchased" => Some(EventKind::SharesPurchased),
            "shares_sold" => Some(EventKind::SharesSold),
            "rewards_claimed" => Some(EventKind::RewardsClaimed),
            "market_created" => Some(EventKind::MarketCreated),
            "market_resolved" => Some(EventKind::MarketResolved),
            _ => None,
        }
    }

    /// Trade kinds are recorded against positions and replayed by the
    /// rebuild job; market kinds only touch the market cache.
    pub fn is_trade(&self) -> bool {
        matches!(
            self,
            EventKind::SharesPurchased | EventKind::SharesSold | EventKind::RewardsClaimed
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a sell consumed shares on-chain. Recorded for audit only; the
/// aggregator prices every sale off the blended average, not per-lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "index")]
pub enum SellMode {
    Fifo,
    Targeted(i64),
}

impl SellMode {
    /// Stable storage encoding ("fifo" or "targeted:<index>").
    pub fn encode(&self) -> String {
        match self {
            SellMode::Fifo => "fifo".to_string(),
            SellMode::Targeted(idx) => format!("targeted:{}", idx),
        }
    }

    pub fn decode(s: &str) -> Option<SellMode> {
        if s == "fifo" {
            return Some(SellMode::Fifo);
        }
        s.strip_prefix("targeted:")
            .and_then(|idx| idx.parse::<i64>().ok())
            .map(SellMode::Targeted)
    }
}

/// Why a position stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CloseReason {
    #[default]
    None,
    Sold,
    LostResolution,
    Claimed,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::None => "none",
            CloseReason::Sold => "sold",
            CloseReason::LostResolution => "lost_resolution",
            CloseReason::Claimed => "claimed",
        }
    }

    pub fn parse(s: &str) -> Option<CloseReason> {
        match s {
            "none" => Some(CloseReason::None),
            "sold" => Some(CloseReason::Sold),
            "lost_resolution" => Some(CloseReason::LostResolution),
            "claimed" => Some(CloseReason::Claimed),
            _ => None,
        }
    }
}

/// Lifecycle status of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Active,
    Resolved,
    Cancelled,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Active => "active",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<MarketStatus> {
        match s {
            "active" => Some(MarketStatus::Active),
            "resolved" => Some(MarketStatus::Resolved),
            "cancelled" => Some(MarketStatus::Cancelled),
            _ => None,
        }
    }
}
