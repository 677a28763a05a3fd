//! Structural and semantic validation of callback bodies.
//!
//! Structural validation collects every violation so the 400 response lists
//! them all. Semantic checks run only on structurally valid input.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::callbacks::types::{CallbackStatus, CosObject, ValidCallback};

const MAX_ID_LEN: usize = 128;

/// Pull `eventId` out of a body without validating anything else.
pub fn peek_event_id(body: &Value) -> Option<&str> {
    body.get("eventId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty() && id.len() <= MAX_ID_LEN)
}

pub fn validate_payload(body: &Value) -> Result<ValidCallback, Vec<String>> {
    let Some(obj) = body.as_object() else {
        return Err(vec!["body must be a JSON object".to_string()]);
    };

    let mut violations = Vec::new();

    let event_id = required_id(obj, "eventId", &mut violations);
    let task_id = required_id(obj, "taskId", &mut violations);

    let status = match obj.get("status") {
        None | Some(Value::Null) => {
            violations.push("status is required".to_string());
            None
        }
        Some(Value::String(s)) => match s.parse::<CallbackStatus>() {
            Ok(status) => Some(status),
            Err(_) => {
                violations.push(format!(
                    "status must be one of SUCCESS, FAILED, RETRYING (got '{}')",
                    s
                ));
                None
            }
        },
        Some(_) => {
            violations.push("status must be a string".to_string());
            None
        }
    };

    let output_keys = match obj.get("outputKeys") {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => {
            let keys: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            if keys.len() != items.len() {
                violations.push("outputKeys must contain only strings".to_string());
            }
            Some(keys)
        }
        Some(_) => {
            violations.push("outputKeys must be an array".to_string());
            None
        }
    };

    let cos_object = match obj.get("cosObject") {
        None | Some(Value::Null) => {
            violations.push("cosObject is required".to_string());
            None
        }
        Some(Value::Object(cos)) => cos_object(cos, &mut violations),
        Some(_) => {
            violations.push("cosObject must be an object".to_string());
            None
        }
    };

    let metadata = match obj.get("metadata") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Some(_) => {
            violations.push("metadata must be an object".to_string());
            BTreeMap::new()
        }
    };

    match (event_id, task_id, status, cos_object) {
        (Some(event_id), Some(task_id), Some(status), Some(cos_object)) if violations.is_empty() => {
            Ok(ValidCallback {
                event_id,
                task_id,
                status,
                output_keys,
                cos_object,
                metadata,
            })
        }
        _ => Err(violations),
    }
}

/// Business rules for a structurally valid delivery.
pub fn check_semantics(callback: &ValidCallback) -> Result<(), String> {
    if callback.status != CallbackStatus::Success {
        return Ok(());
    }
    if callback.cos_object.size == Some(0) {
        return Err("SUCCESS callback reports an empty object (cosObject.size is 0)".to_string());
    }
    if matches!(&callback.output_keys, Some(keys) if keys.is_empty()) {
        return Err("SUCCESS callback lists no outputKeys".to_string());
    }
    Ok(())
}

fn required_id(obj: &Map<String, Value>, field: &str, violations: &mut Vec<String>) -> Option<String> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => {
            if s.len() > MAX_ID_LEN {
                violations.push(format!("{} exceeds {} characters", field, MAX_ID_LEN));
                None
            } else {
                Some(s.clone())
            }
        }
        Some(Value::String(_)) => {
            violations.push(format!("{} must not be empty", field));
            None
        }
        None | Some(Value::Null) => {
            violations.push(format!("{} is required", field));
            None
        }
        Some(_) => {
            violations.push(format!("{} must be a string", field));
            None
        }
    }
}

fn cos_object(cos: &Map<String, Value>, violations: &mut Vec<String>) -> Option<CosObject> {
    let mut text = |name: &str| match cos.get(name).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        _ => {
            violations.push(format!("cosObject.{} is required", name));
            None
        }
    };
    let key = text("key");
    let bucket = text("bucket");
    let region = text("region");

    let etag = match cos.get("etag") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            violations.push("cosObject.etag must be a string".to_string());
            None
        }
    };
    let size = match cos.get("size") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_u64() {
            Some(n) => Some(n),
            None => {
                violations.push("cosObject.size must be a non-negative integer".to_string());
                None
            }
        },
    };

    Some(CosObject {
        key: key?,
        bucket: bucket?,
        region: region?,
        etag,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_body() -> Value {
        json!({
            "eventId": "e1",
            "taskId": "t1",
            "status": "SUCCESS",
            "cosObject": {"key": "k", "bucket": "b", "region": "r"}
        })
    }

    #[test]
    fn test_minimal_body_is_valid() {
        let valid = validate_payload(&valid_body()).unwrap();
        assert_eq!(valid.event_id, "e1");
        assert_eq!(valid.status, CallbackStatus::Success);
        assert_eq!(valid.cos_object.bucket, "b");
        assert!(valid.output_keys.is_none());
        assert!(valid.metadata.is_empty());
    }

    #[test]
    fn test_missing_cos_object() {
        let mut body = valid_body();
        body.as_object_mut().unwrap().remove("cosObject");
        let errors = validate_payload(&body).unwrap_err();
        assert_eq!(errors, vec!["cosObject is required".to_string()]);
    }

    #[test]
    fn test_invalid_status() {
        let mut body = valid_body();
        body["status"] = json!("DONE");
        let errors = validate_payload(&body).unwrap_err();
        assert!(errors[0].contains("status must be one of"));
    }

    #[test]
    fn test_collects_all_violations() {
        let body = json!({"taskId": 7, "status": "SUCCESS", "cosObject": {"key": "k"}});
        let errors = validate_payload(&body).unwrap_err();
        assert!(errors.contains(&"eventId is required".to_string()));
        assert!(errors.contains(&"taskId must be a string".to_string()));
        assert!(errors.contains(&"cosObject.bucket is required".to_string()));
        assert!(errors.contains(&"cosObject.region is required".to_string()));
    }

    #[test]
    fn test_metadata_is_opaque() {
        let mut body = valid_body();
        body["metadata"] = json!({"style": {"nested": [1, 2]}, "seed": 42});
        let valid = validate_payload(&body).unwrap();
        assert_eq!(valid.metadata["seed"], json!(42));
    }

    #[test]
    fn test_non_object_body() {
        assert!(validate_payload(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_peek_event_id() {
        assert_eq!(peek_event_id(&valid_body()), Some("e1"));
        assert_eq!(peek_event_id(&json!({"eventId": ""})), None);
        assert_eq!(peek_event_id(&json!({})), None);
    }

    #[test]
    fn test_semantics_reject_empty_success() {
        let mut body = valid_body();
        body["cosObject"]["size"] = json!(0);
        let valid = validate_payload(&body).unwrap();
        assert!(check_semantics(&valid).is_err());

        let mut body = valid_body();
        body["outputKeys"] = json!([]);
        let valid = validate_payload(&body).unwrap();
        assert!(check_semantics(&valid).is_err());

        // Failures may legitimately carry nothing.
        let mut body = valid_body();
        body["status"] = json!("FAILED");
        body["outputKeys"] = json!([]);
        let valid = validate_payload(&body).unwrap();
        assert!(check_semantics(&valid).is_ok());
    }
}
