//! Callback ingestion subsystem.
//!
//! # Data Flow
//! ```text
//! POST /callbacks/scf (handlers.rs)
//!     → pipeline.rs (signature, replay, validation, probe, persist, publish)
//!     → store.rs / sqlite_store.rs (idempotent create keyed by eventId)
//!     → publisher.rs (log, queue or webhook; best-effort)
//!
//! Background:
//!     retention.rs deletes records past the retention window
//! ```
//!
//! # Design Decisions
//! - The store's uniqueness constraint is the only idempotency guard
//! - Rejections happen before any write or publish
//! - Publisher backend is fixed at startup from configuration

pub mod handlers;
pub mod pipeline;
pub mod probe;
pub mod publisher;
pub mod retention;
pub mod sqlite_store;
pub mod store;
pub mod types;
pub mod validation;

pub use pipeline::{CallbackPipeline, DeliveryState, IngestOutcome};
pub use probe::{ProbeError, StorageProbe};
pub use publisher::{PublishError, Publisher};
pub use retention::RetentionSweeper;
pub use sqlite_store::SqliteCallbackStore;
pub use store::{CallbackStore, CreateOutcome, MemoryCallbackStore, StoreError};
pub use types::{CallbackEvent, CallbackStatus, CompletionNotice, CosObject};
