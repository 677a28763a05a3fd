//! Telemetry delivery with a local retry spool.
//!
//! # Data Flow
//! ```text
//! Completed request
//!     → recorder.rs (try immediate delivery to the sink, with deadline)
//!     → on failure: retry_spool.rs (bounded, persisted buffer)
//!     → flush loop redelivers with backoff; gives up after max attempts
//! ```
//!
//! # Design Decisions
//! - The spool never grows past its bound; overflow is dropped and counted
//! - Spool contents are written to disk after each flush and on shutdown,
//!   and reloaded at startup
//! - Telemetry never blocks or fails the request that produced it

pub mod recorder;
pub mod retry_spool;
pub mod sink;

pub use recorder::TelemetryRecorder;
pub use retry_spool::{FlushReport, RetryQueueEntry, RetrySpool, SpoolStats};
pub use sink::{HttpTelemetrySink, LogSink, SinkError, TelemetryRecord, TelemetrySink};
