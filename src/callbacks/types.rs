//! Callback domain types.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Completion status reported by the execution service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackStatus {
    Success,
    Failed,
    Retrying,
}

impl CallbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackStatus::Success => "SUCCESS",
            CallbackStatus::Failed => "FAILED",
            CallbackStatus::Retrying => "RETRYING",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallbackStatus::Retrying)
    }

    /// The only permitted correction is RETRYING to a terminal status.
    pub fn can_transition_to(&self, next: CallbackStatus) -> bool {
        *self == CallbackStatus::Retrying && next.is_terminal()
    }
}

impl fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for CallbackStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(CallbackStatus::Success),
            "FAILED" => Ok(CallbackStatus::Failed),
            "RETRYING" => Ok(CallbackStatus::Retrying),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Location of the generated object in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosObject {
    pub key: String,
    pub bucket: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A structurally valid delivery, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidCallback {
    pub event_id: String,
    pub task_id: String,
    pub status: CallbackStatus,
    pub output_keys: Option<Vec<String>>,
    pub cos_object: CosObject,
    pub metadata: BTreeMap<String, Value>,
}

/// Persisted callback record.
///
/// The signature and raw body are kept for audit but never returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackEvent {
    pub event_id: String,
    pub task_id: String,
    pub status: CallbackStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_keys: Option<Vec<String>>,
    pub cos_object: CosObject,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(skip_serializing, default)]
    pub signature: Option<String>,
    /// Whether the signature was checked and matched.
    pub validated: bool,
    #[serde(skip_serializing, default)]
    pub raw_payload: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

/// Current time at the precision stores persist (milliseconds).
pub fn record_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

impl CallbackEvent {
    pub fn from_valid(
        valid: ValidCallback,
        signature: Option<String>,
        validated: bool,
        raw_payload: String,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: valid.event_id,
            task_id: valid.task_id,
            status: valid.status,
            output_keys: valid.output_keys,
            cos_object: valid.cos_object,
            metadata: valid.metadata,
            signature,
            validated,
            raw_payload,
            received_at: received_at.trunc_subsecs(3),
            processed_at: record_timestamp(),
        }
    }

    /// Drop sub-millisecond precision so a stored record reads back unchanged.
    pub fn at_storage_precision(mut self) -> Self {
        self.received_at = self.received_at.trunc_subsecs(3);
        self.processed_at = self.processed_at.trunc_subsecs(3);
        self
    }
}

/// Fields replaced when a RETRYING record is corrected.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: CallbackStatus,
    pub output_keys: Option<Vec<String>>,
    pub cos_object: CosObject,
    pub processed_at: DateTime<Utc>,
}

impl From<&ValidCallback> for StatusUpdate {
    fn from(valid: &ValidCallback) -> Self {
        Self {
            status: valid.status,
            output_keys: valid.output_keys.clone(),
            cos_object: valid.cos_object.clone(),
            processed_at: record_timestamp(),
        }
    }
}

/// Message handed to the publisher after a record is stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionNotice {
    pub event_id: String,
    pub task_id: String,
    pub status: CallbackStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_keys: Option<Vec<String>>,
    pub cos_object: CosObject,
    pub correction: bool,
    pub processed_at: DateTime<Utc>,
}

impl CompletionNotice {
    pub fn from_event(event: &CallbackEvent, correction: bool) -> Self {
        Self {
            event_id: event.event_id.clone(),
            task_id: event.task_id.clone(),
            status: event.status,
            output_keys: event.output_keys.clone(),
            cos_object: event.cos_object.clone(),
            correction,
            processed_at: event.processed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!("SUCCESS".parse::<CallbackStatus>(), Ok(CallbackStatus::Success));
        assert_eq!("RETRYING".parse::<CallbackStatus>(), Ok(CallbackStatus::Retrying));
        assert!("success".parse::<CallbackStatus>().is_err());
        assert!("DONE".parse::<CallbackStatus>().is_err());
    }

    #[test]
    fn test_only_retrying_can_be_corrected() {
        use CallbackStatus::*;
        assert!(Retrying.can_transition_to(Success));
        assert!(Retrying.can_transition_to(Failed));
        assert!(!Retrying.can_transition_to(Retrying));
        assert!(!Success.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Success));
    }

    #[test]
    fn test_built_events_use_millisecond_timestamps() {
        let valid = ValidCallback {
            event_id: "e1".into(),
            task_id: "t1".into(),
            status: CallbackStatus::Success,
            output_keys: None,
            cos_object: CosObject {
                key: "k".into(),
                bucket: "b".into(),
                region: "r".into(),
                etag: None,
                size: None,
            },
            metadata: BTreeMap::new(),
        };
        let update = StatusUpdate::from(&valid);
        let received = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let event = CallbackEvent::from_valid(valid, None, false, "{}".into(), received);

        assert_eq!(event.received_at.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(event.processed_at.timestamp_subsec_nanos() % 1_000_000, 0);
        assert_eq!(update.processed_at.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_event_serialization_hides_audit_fields() {
        let event = CallbackEvent {
            event_id: "e1".into(),
            task_id: "t1".into(),
            status: CallbackStatus::Success,
            output_keys: None,
            cos_object: CosObject {
                key: "k".into(),
                bucket: "b".into(),
                region: "r".into(),
                etag: None,
                size: None,
            },
            metadata: BTreeMap::new(),
            signature: Some("deadbeef".into()),
            validated: true,
            raw_payload: "{}".into(),
            received_at: Utc::now(),
            processed_at: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventId"], "e1");
        assert_eq!(json["status"], "SUCCESS");
        assert!(json.get("signature").is_none());
        assert!(json.get("rawPayload").is_none());
        assert!(json.get("metadata").is_none());
    }
}
