//! Pure computation engines for the ledger: the weighted-average-cost
//! fold, bulk market settlement, and log replay.

pub mod aggregator;
pub mod rebuild;
pub mod settlement;

pub use aggregator::{fold_trade, FoldOutcome, SaleOutcome};
pub use rebuild::{
    rebuild_and_store, rebuild_positions, reconcile, replay, ReconcileMismatch, ReconcileReport,
};
pub use settlement::{SettlementEngine, SettlementError, SettlementSummary};
