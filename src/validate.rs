//! Structural validation of detection payloads.
//!
//! Validation runs on untyped JSON so that a malformed payload is reported
//! as a contract violation with a stable field path, not as a
//! deserialization error. Only the first violation is reported; checks run
//! in a fixed order and short-circuit.

use serde_json::Value;

/// Indicator kinds accepted by the API.
pub const IOC_TYPES: &[&str] = &["ip", "domain", "hash", "vulnerability", "url"];

/// Detection kinds accepted by the API. Custom detectors using the
/// `detector_*` naming convention are also accepted.
pub const DETECTION_TYPES: &[&str] = &["correlation", "playbook", "detection_rule", "sandbox"];

/// Prefix that marks a custom detector kind as valid.
pub const DETECTOR_PREFIX: &str = "detector_";

/// Validate a payload against the API data contract.
///
/// Returns `None` when the payload is fully valid, otherwise a
/// human-readable description of the first violation, naming the offending
/// field path (`data[0].ioc.type` style). The input is never mutated.
pub fn validate_payload(payload: &Value) -> Option<String> {
    let Some(root) = payload.as_object() else {
        return Some("payload must be a JSON object".to_string());
    };

    let Some(data) = root.get("data") else {
        return Some("missing required field 'data'".to_string());
    };
    let Some(entries) = data.as_array() else {
        return Some("'data' must be an array of detection entries".to_string());
    };
    if entries.is_empty() {
        return Some("'data' must contain at least one entry".to_string());
    }

    for (index, entry) in entries.iter().enumerate() {
        if let Some(reason) = validate_entry(index, entry) {
            return Some(reason);
        }
    }

    None
}

fn validate_entry(index: usize, entry: &Value) -> Option<String> {
    let Some(entry) = entry.as_object() else {
        return Some(format!("data[{index}] must be an object"));
    };

    // IoC: required, with an enumerated type and a non-empty value.
    let Some(ioc) = entry.get("ioc").and_then(Value::as_object) else {
        return Some(format!("data[{index}].ioc: missing required field"));
    };
    match ioc.get("type").and_then(Value::as_str) {
        Some(kind) if !kind.is_empty() => {
            if !IOC_TYPES.contains(&kind) {
                return Some(format!(
                    "data[{index}].ioc.type: IoC type must be one of {}",
                    IOC_TYPES.join(", ")
                ));
            }
        }
        _ => return Some(format!("data[{index}].ioc.type: missing required field")),
    }
    match ioc.get("value").and_then(Value::as_str) {
        Some(value) if !value.is_empty() => {}
        Some(_) => return Some(format!("data[{index}].ioc.value: IoC value cannot be empty")),
        None => return Some(format!("data[{index}].ioc.value: missing required field")),
    }

    // Detection: required type, sub_type mandatory for detection rules.
    let Some(detection) = entry.get("detection").and_then(Value::as_object) else {
        return Some(format!("data[{index}].detection: missing required field"));
    };
    let kind = match detection.get("type").and_then(Value::as_str) {
        Some(kind) if !kind.is_empty() => kind,
        _ => {
            return Some(format!(
                "data[{index}].detection.type: missing required field"
            ));
        }
    };
    if !DETECTION_TYPES.contains(&kind) && !kind.starts_with(DETECTOR_PREFIX) {
        return Some(format!(
            "data[{index}].detection.type: Detection type must be one of {} or match '{DETECTOR_PREFIX}*'",
            DETECTION_TYPES.join(", ")
        ));
    }
    if kind == "detection_rule" {
        match detection.get("sub_type").and_then(Value::as_str) {
            Some(sub) if !sub.is_empty() => {}
            _ => {
                return Some(format!(
                    "data[{index}].detection.sub_type: 'sub_type' is required when type is 'detection_rule'"
                ));
            }
        }
    }

    // Timestamp, when present, must be an ISO-8601 UTC instant.
    if let Some(timestamp) = entry.get("timestamp") {
        match timestamp.as_str() {
            Some(ts) if is_iso8601_utc(ts) => {}
            _ => {
                return Some(format!(
                    "data[{index}].timestamp: Timestamp must be in ISO 8601 format (e.g. 2024-01-01T10:00:00Z)"
                ));
            }
        }
    }

    None
}

/// Lenient ISO-8601 UTC shape check: a date, a `T` separator, and a
/// `Z`-suffixed time with at least five dash/colon-delimited components.
fn is_iso8601_utc(value: &str) -> bool {
    value.contains('T')
        && value.ends_with('Z')
        && value.split(|c| c == '-' || c == ':').count() >= 5
}
