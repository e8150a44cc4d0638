pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod registry;

pub use config::Config;
pub use datasource::{ChainEventSource, EventSource, MockEventSource, SourceError};
pub use db::{init_db, Repository};
pub use domain::{
    Address, CloseReason, Cursor, EventKind, LedgerEvent, MarketId, MarketRecord, MarketStatus,
    Position, SellMode, TimeMs,
};
pub use error::AppError;
