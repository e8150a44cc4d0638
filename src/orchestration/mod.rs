//! Long-running coordination: the per-kind ingestion loops and the
//! settlement retry worker.

pub mod pipeline;
pub mod retry;

pub use pipeline::{IngestError, Ingestor};
pub use retry::{RetryReport, RetryWorker};
