//! Callback record persistence.
//!
//! `create_if_absent` is the idempotency linearization point: concurrent
//! creates for one `eventId` yield exactly one stored record, and every
//! caller gets that record back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::callbacks::types::{CallbackEvent, CallbackStatus, StatusUpdate};
use crate::resilience::timeouts::TimedOut;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    #[error("no record for event {0}")]
    NotFound(String),

    #[error("status of {event_id} cannot change from {from} to {to}")]
    InvalidTransition {
        event_id: String,
        from: CallbackStatus,
        to: CallbackStatus,
    },

    #[error("corrupt record {event_id}: {reason}")]
    Corrupt { event_id: String, reason: String },

    #[error(transparent)]
    Timeout(#[from] TimedOut),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of an idempotent create.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// This call stored the record.
    Created(CallbackEvent),
    /// A record with the same `eventId` already existed; it is returned unchanged.
    Existing(CallbackEvent),
}

impl CreateOutcome {
    pub fn was_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }

    pub fn event(&self) -> &CallbackEvent {
        match self {
            CreateOutcome::Created(e) | CreateOutcome::Existing(e) => e,
        }
    }

    pub fn into_event(self) -> CallbackEvent {
        match self {
            CreateOutcome::Created(e) | CreateOutcome::Existing(e) => e,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackFilter {
    pub task_id: Option<String>,
    pub status: Option<CallbackStatus>,
}

impl CallbackFilter {
    pub fn matches(&self, event: &CallbackEvent) -> bool {
        self.task_id.as_deref().map_or(true, |t| t == event.task_id)
            && self.status.map_or(true, |s| s == event.status)
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

#[async_trait]
pub trait CallbackStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_if_absent(&self, event: CallbackEvent) -> Result<CreateOutcome, StoreError>;

    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<CallbackEvent>, StoreError>;

    /// Newest first.
    async fn list(
        &self,
        filter: &CallbackFilter,
        page: PageRequest,
    ) -> Result<Page<CallbackEvent>, StoreError>;

    /// Apply a status correction. Only RETRYING records may change.
    async fn update_status(
        &self,
        event_id: &str,
        update: StatusUpdate,
    ) -> Result<CallbackEvent, StoreError>;

    /// Delete records received before `cutoff`; returns the number removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Process-local store. Each shard lock serializes writers for one `eventId`.
#[derive(Default)]
pub struct MemoryCallbackStore {
    records: DashMap<String, CallbackEvent>,
}

impl MemoryCallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CallbackStore for MemoryCallbackStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_if_absent(&self, event: CallbackEvent) -> Result<CreateOutcome, StoreError> {
        match self.records.entry(event.event_id.clone()) {
            Entry::Occupied(existing) => Ok(CreateOutcome::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(event.clone());
                Ok(CreateOutcome::Created(event))
            }
        }
    }

    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<CallbackEvent>, StoreError> {
        Ok(self.records.get(event_id).map(|r| r.value().clone()))
    }

    async fn list(
        &self,
        filter: &CallbackFilter,
        page: PageRequest,
    ) -> Result<Page<CallbackEvent>, StoreError> {
        let mut matching: Vec<CallbackEvent> = self
            .records
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        matching.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();

        Ok(Page {
            items,
            page: page.page,
            limit: page.limit,
            total,
        })
    }

    async fn update_status(
        &self,
        event_id: &str,
        update: StatusUpdate,
    ) -> Result<CallbackEvent, StoreError> {
        let mut record = self
            .records
            .get_mut(event_id)
            .ok_or_else(|| StoreError::NotFound(event_id.to_string()))?;

        if !record.status.can_transition_to(update.status) {
            return Err(StoreError::InvalidTransition {
                event_id: event_id.to_string(),
                from: record.status,
                to: update.status,
            });
        }

        record.status = update.status;
        record.output_keys = update.output_keys;
        record.cos_object = update.cos_object;
        record.processed_at = update.processed_at;
        Ok(record.clone())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let before = self.records.len();
        self.records.retain(|_, r| r.received_at >= cutoff);
        Ok(before.saturating_sub(self.records.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
