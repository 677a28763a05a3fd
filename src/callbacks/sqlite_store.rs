//! SQLite-backed callback store.
//!
//! Uniqueness of `event_id` is enforced by the table constraint; an insert
//! that loses the race does nothing and the winner's row is read back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeMap;

use crate::callbacks::store::{
    CallbackFilter, CallbackStore, CreateOutcome, Page, PageRequest, StoreError,
};
use crate::callbacks::types::{CallbackEvent, CallbackStatus, CosObject, StatusUpdate};

const COLUMNS: &str = "event_id, task_id, status, output_keys, cos_object, metadata, \
                       signature, validated, raw_payload, received_at_ms, processed_at_ms";

pub struct SqliteCallbackStore {
    pool: Pool<Sqlite>,
}

impl SqliteCallbackStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await?;
        Self::run_migrations(&pool).await?;
        tracing::info!(url = %url, "Connected callback store");
        Ok(Self { pool })
    }

    /// Single-connection in-memory database, for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS callback_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                status TEXT NOT NULL,
                output_keys TEXT,
                cos_object TEXT NOT NULL,
                metadata TEXT NOT NULL,
                signature TEXT,
                validated INTEGER NOT NULL,
                raw_payload TEXT NOT NULL,
                received_at_ms INTEGER NOT NULL,
                processed_at_ms INTEGER NOT NULL,
                UNIQUE(event_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_callback_task
            ON callback_events(task_id, received_at_ms)
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn fetch(&self, event_id: &str) -> Result<Option<CallbackEvent>, StoreError> {
        let sql = format!("SELECT {} FROM callback_events WHERE event_id = ?", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }
}

fn encode<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn timestamp(ms: i64, event_id: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt {
        event_id: event_id.to_string(),
        reason: format!("timestamp {} out of range", ms),
    })
}

fn decode_row(row: &SqliteRow) -> Result<CallbackEvent, StoreError> {
    let event_id: String = row.try_get("event_id")?;
    let corrupt = |reason: String| StoreError::Corrupt {
        event_id: event_id.clone(),
        reason,
    };

    let status: String = row.try_get("status")?;
    let status = status
        .parse::<CallbackStatus>()
        .map_err(|e| corrupt(e.to_string()))?;

    let output_keys: Option<String> = row.try_get("output_keys")?;
    let output_keys: Option<Vec<String>> = match output_keys {
        Some(json) => serde_json::from_str(&json).map_err(|e| corrupt(e.to_string()))?,
        None => None,
    };

    let cos_object: String = row.try_get("cos_object")?;
    let cos_object: CosObject =
        serde_json::from_str(&cos_object).map_err(|e| corrupt(e.to_string()))?;

    let metadata: String = row.try_get("metadata")?;
    let metadata: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&metadata).map_err(|e| corrupt(e.to_string()))?;

    let received_at = timestamp(row.try_get("received_at_ms")?, &event_id)?;
    let processed_at = timestamp(row.try_get("processed_at_ms")?, &event_id)?;

    Ok(CallbackEvent {
        task_id: row.try_get("task_id")?,
        status,
        output_keys,
        cos_object,
        metadata,
        signature: row.try_get("signature")?,
        validated: row.try_get("validated")?,
        raw_payload: row.try_get("raw_payload")?,
        received_at,
        processed_at,
        event_id,
    })
}

#[async_trait]
impl CallbackStore for SqliteCallbackStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn create_if_absent(&self, event: CallbackEvent) -> Result<CreateOutcome, StoreError> {
        let event = event.at_storage_precision();
        let result = sqlx::query(
            r#"
            INSERT INTO callback_events (event_id, task_id, status, output_keys, cos_object,
                metadata, signature, validated, raw_payload, received_at_ms, processed_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(event_id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.task_id)
        .bind(event.status.as_str())
        .bind(event.output_keys.as_ref().map(encode))
        .bind(encode(&event.cos_object))
        .bind(encode(&event.metadata))
        .bind(&event.signature)
        .bind(event.validated)
        .bind(&event.raw_payload)
        .bind(event.received_at.timestamp_millis())
        .bind(event.processed_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(CreateOutcome::Created(event));
        }

        match self.fetch(&event.event_id).await? {
            Some(existing) => Ok(CreateOutcome::Existing(existing)),
            // Conflicting row vanished (retention sweep); treat as unavailable.
            None => Err(StoreError::Unavailable(format!(
                "event {} conflicted but could not be read back",
                event.event_id
            ))),
        }
    }

    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<CallbackEvent>, StoreError> {
        self.fetch(event_id).await
    }

    async fn list(
        &self,
        filter: &CallbackFilter,
        page: PageRequest,
    ) -> Result<Page<CallbackEvent>, StoreError> {
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total FROM callback_events
            WHERE (?1 IS NULL OR task_id = ?1) AND (?2 IS NULL OR status = ?2)
            "#,
        )
        .bind(filter.task_id.as_deref())
        .bind(status)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;

        let sql = format!(
            "SELECT {} FROM callback_events \
             WHERE (?1 IS NULL OR task_id = ?1) AND (?2 IS NULL OR status = ?2) \
             ORDER BY received_at_ms DESC, event_id ASC LIMIT ?3 OFFSET ?4",
            COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(filter.task_id.as_deref())
            .bind(status)
            .bind(i64::from(page.limit))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let items = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            page: page.page,
            limit: page.limit,
            total: total.max(0) as u64,
        })
    }

    async fn update_status(
        &self,
        event_id: &str,
        update: StatusUpdate,
    ) -> Result<CallbackEvent, StoreError> {
        // The WHERE clause makes the transition check and the write one statement.
        let result = sqlx::query(
            r#"
            UPDATE callback_events
            SET status = ?, output_keys = ?, cos_object = ?, processed_at_ms = ?
            WHERE event_id = ? AND status = 'RETRYING'
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.output_keys.as_ref().map(encode))
        .bind(encode(&update.cos_object))
        .bind(update.processed_at.timestamp_millis())
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        let current = self
            .fetch(event_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(event_id.to_string()))?;

        if result.rows_affected() == 0 || !update.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                event_id: event_id.to_string(),
                from: current.status,
                to: update.status,
            });
        }
        Ok(current)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM callback_events WHERE received_at_ms < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
