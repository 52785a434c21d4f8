//! In-memory device telemetry aggregation.
//!
//! Devices push batches of timestamped counter readings. Each batch is merged
//! into a per-device aggregate that never re-applies a timestamp it has
//! already accepted, and the aggregate answers two questions: the newest
//! reading timestamp and the cumulative count.
//!
//! ```text
//! POST /device ─► ReadingBatchProcessor ─► DeviceStore::merge_batch ─► DeviceAggregate::merge
//! GET  /...    ─► QueryService ─────────► DeviceStore::with_device
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod query;
pub mod server;
pub mod store;
pub mod time_codec;

pub use config::{CliArgs, TelemetryConfig};
pub use domain::{DeviceAggregate, MergeStats, RawReading, Reading};
pub use error::{IngestError, MalformedTimestamp, QueryError};
pub use ingest::{BatchResult, BatchStatus, MalformedReading, ReadingBatchProcessor};
pub use query::QueryService;
pub use server::{router, AppState};
pub use store::{DeviceStore, MergeOutcome, Slot};
pub use time_codec::{TimeCodec, Timestamp};
