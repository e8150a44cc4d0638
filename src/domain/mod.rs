//! Domain types for the range-market position ledger.
//!
//! This module provides:
//! - Domain primitives: TimeMs, Address, MarketId, Cursor
//! - LedgerEvent with stable (tx, kind) event keys
//! - The Position aggregate and the MarketRecord cache row

pub mod event;
pub mod market;
pub mod position;
pub mod primitives;

pub use event::LedgerEvent;
pub use market::MarketRecord;
pub use position::Position;
pub use primitives::{
    Address, CloseReason, Cursor, EventKind, MarketId, MarketStatus, SellMode, TimeMs,
};
