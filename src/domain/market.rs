//! MarketRecord: denormalized market cache row.

use crate::domain::{MarketId, MarketStatus, TimeMs};
use serde::{Deserialize, Serialize};

/// Write-mostly market metadata, maintained from MarketCreated and
/// MarketResolved events. Read by the settlement engine and query paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub market_id: MarketId,
    pub name: String,
    pub category: String,
    /// Lowest representable outcome across all range buckets.
    pub min_value: i64,
    /// Highest representable outcome across all range buckets.
    pub max_value: i64,
    /// Width of each range bucket.
    pub range_width: i64,
    pub resolution_time_ms: Option<TimeMs>,
    pub status: MarketStatus,
    pub resolved_value: Option<i64>,
}

impl MarketRecord {
    pub fn new(
        market_id: MarketId,
        name: String,
        category: String,
        min_value: i64,
        max_value: i64,
        range_width: i64,
        resolution_time_ms: Option<TimeMs>,
    ) -> Self {
        MarketRecord {
            market_id,
            name,
            category,
            min_value,
            max_value,
            range_width,
            resolution_time_ms,
            status: MarketStatus::Active,
            resolved_value: None,
        }
    }
}
