//! Payload and response types for the detection API.
//!
//! These are immutable value objects: option merging and splitting always
//! return new instances rather than mutating the receiver, so a payload
//! handed to the client is never aliased by a half-merged copy.

use crate::error::{RelayError, Result};
use crate::validate::validate_payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default API options applied when a payload carries none.
pub const DEFAULT_OPTIONS: ApiOptions = ApiOptions {
    debug: false,
    summary: true,
};

/// An indicator of compromise being reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ioc {
    /// Indicator kind: `ip`, `domain`, `hash`, `vulnerability`, or `url`.
    #[serde(rename = "type")]
    pub kind: String,

    /// The indicator value itself.
    pub value: String,

    /// Log source where the detection was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,

    /// Log/event field containing the indicator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// How an indicator was flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    /// Detection mechanism: `correlation`, `playbook`, `detection_rule`,
    /// `sandbox`, or a `detector_*` custom kind.
    #[serde(rename = "type")]
    pub kind: String,

    /// Identifier of the detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human-readable name of the detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Detection subtype; mandatory when `kind` is `detection_rule`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
}

/// Optional incident cross-reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    /// Incident identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Incident name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Incident type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// One submission unit: exactly one indicator plus its detection context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEntry {
    /// The reported indicator.
    pub ioc: Ioc,

    /// How the indicator was flagged.
    pub detection: Detection,

    /// Detection timestamp, ISO-8601 UTC (`2024-01-01T10:00:00Z`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Related incident, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident: Option<Incident>,

    /// MITRE ATT&CK technique codes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitre_codes: Option<Vec<String>>,

    /// Associated malware family names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malwares: Option<Vec<String>>,
}

/// Submission options understood by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiOptions {
    /// Debug submissions are processed but not persisted server-side.
    #[serde(default)]
    pub debug: bool,

    /// Whether the response should include a per-indicator summary.
    #[serde(default = "default_summary")]
    pub summary: bool,
}

fn default_summary() -> bool {
    true
}

impl Default for ApiOptions {
    fn default() -> Self {
        DEFAULT_OPTIONS
    }
}

/// The unit submitted to the API: one or more entries plus options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Detection entries, in submission order. Must be non-empty to pass
    /// validation.
    pub data: Vec<DataEntry>,

    /// Submission options; defaults are merged in before sending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ApiOptions>,

    /// Organizations the submission is made on behalf of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_ids: Option<Vec<String>>,
}

impl Payload {
    /// Create a payload from entries, with no options set.
    pub fn new(data: Vec<DataEntry>) -> Self {
        Self {
            data,
            options: None,
            organization_ids: None,
        }
    }

    /// Validate an untyped JSON value against the API contract and bind it.
    ///
    /// Contract violations (and any residual shape mismatch the contract
    /// checks don't cover, such as a mistyped optional field) are reported
    /// as [`RelayError::PayloadValidation`].
    pub fn from_value(value: Value) -> Result<Self> {
        if let Some(reason) = validate_payload(&value) {
            return Err(RelayError::PayloadValidation(reason));
        }
        serde_json::from_value(value).map_err(|e| {
            RelayError::PayloadValidation(format!("payload does not match the API contract: {e}"))
        })
    }

    /// Return a copy with default options merged in.
    ///
    /// A payload without options gets `{debug: false, summary: true}`;
    /// existing options are preserved. A `debug = true` caller override
    /// always wins, regardless of what the payload itself carries.
    pub fn with_default_options(&self, debug: bool) -> Payload {
        let mut options = self.options.unwrap_or_default();
        if debug {
            options.debug = true;
        }
        Payload {
            data: self.data.clone(),
            options: Some(options),
            organization_ids: self.organization_ids.clone(),
        }
    }

    /// Partition into contiguous chunks of at most `batch_size` entries.
    ///
    /// Entry order is preserved and the concatenation of all chunks
    /// reconstructs `data` exactly. Every chunk owns its own copy of
    /// `options` and `organization_ids`.
    pub fn split(&self, batch_size: usize) -> Vec<Payload> {
        let batch_size = batch_size.max(1);
        self.data
            .chunks(batch_size)
            .map(|chunk| Payload {
                data: chunk.to_vec(),
                options: self.options,
                organization_ids: self.organization_ids.clone(),
            })
            .collect()
    }
}

/// Per-indicator counters returned by the API in its `summary` block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Entries accepted for submission.
    #[serde(default)]
    pub submitted: u64,

    /// Entries fully processed.
    #[serde(default)]
    pub processed: u64,

    /// Entries dropped by the API.
    #[serde(default)]
    pub dropped: u64,
}

impl std::ops::Add for Summary {
    type Output = Summary;

    fn add(self, rhs: Summary) -> Summary {
        Summary {
            submitted: self.submitted + rhs.submitted,
            processed: self.processed + rhs.processed,
            dropped: self.dropped + rhs.dropped,
        }
    }
}

impl std::ops::AddAssign for Summary {
    fn add_assign(&mut self, rhs: Summary) {
        *self = *self + rhs;
    }
}

/// Metadata attached to a successful submission by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Round-trip latency of the final (successful) attempt in milliseconds.
    pub latency_ms: u64,

    /// Total attempts made, including the successful one.
    pub attempts: u32,
}

/// A successful API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    /// The response body as returned by the API.
    pub body: Value,

    /// Client-side submission metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

impl ApiResponse {
    /// Wrap a parsed response body.
    pub fn new(body: Value) -> Self {
        Self { body, meta: None }
    }

    /// An empty response, used when a 2xx body was not parseable JSON.
    pub fn empty() -> Self {
        Self::new(Value::Object(serde_json::Map::new()))
    }

    /// Attach client-side metadata.
    pub fn with_meta(mut self, meta: ResponseMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// The `summary` block of the response, when present and well-formed.
    pub fn summary(&self) -> Option<Summary> {
        self.body
            .get("summary")
            .and_then(|s| serde_json::from_value(s.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: &str) -> DataEntry {
        DataEntry {
            ioc: Ioc {
                kind: "ip".into(),
                value: value.into(),
                source_type: None,
                field: None,
            },
            detection: Detection {
                kind: "playbook".into(),
                id: Some("t1".into()),
                name: None,
                sub_type: None,
            },
            timestamp: None,
            incident: None,
            mitre_codes: None,
            malwares: None,
        }
    }

    fn payload_of(n: usize) -> Payload {
        Payload::new((0..n).map(|i| entry(&format!("10.0.0.{i}"))).collect())
    }

    #[test]
    fn default_options_merged_when_absent() {
        let merged = payload_of(1).with_default_options(false);
        assert_eq!(
            merged.options,
            Some(ApiOptions {
                debug: false,
                summary: true
            })
        );
    }

    #[test]
    fn debug_override_always_wins() {
        let mut p = payload_of(1);
        p.options = Some(ApiOptions {
            debug: false,
            summary: false,
        });

        let merged = p.with_default_options(true);
        assert_eq!(
            merged.options,
            Some(ApiOptions {
                debug: true,
                summary: false
            })
        );
        // The original payload is untouched.
        assert!(!p.options.unwrap().debug);
    }

    #[test]
    fn existing_options_preserved_without_override() {
        let mut p = payload_of(1);
        p.options = Some(ApiOptions {
            debug: true,
            summary: false,
        });

        let merged = p.with_default_options(false);
        assert_eq!(
            merged.options,
            Some(ApiOptions {
                debug: true,
                summary: false
            })
        );
    }

    #[test]
    fn split_preserves_order_and_options() {
        let mut p = payload_of(25);
        p.options = Some(ApiOptions {
            debug: true,
            summary: true,
        });
        p.organization_ids = Some(vec!["org1".into()]);

        let chunks = p.split(5);
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.data.len() == 5));
        assert!(chunks.iter().all(|c| c.options == p.options));
        assert!(
            chunks
                .iter()
                .all(|c| c.organization_ids == p.organization_ids)
        );

        let rejoined: Vec<_> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(rejoined, p.data);
    }

    #[test]
    fn split_handles_remainder_chunks() {
        let chunks = payload_of(7).split(3);
        let sizes: Vec<_> = chunks.iter().map(|c| c.data.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn summary_extraction_and_additivity() {
        let resp = ApiResponse::new(json!({
            "summary": {"submitted": 5, "processed": 4, "dropped": 1}
        }));
        let summary = resp.summary().unwrap();
        assert_eq!(summary.submitted, 5);

        let merged = summary + summary;
        assert_eq!(merged.processed, 8);
        assert_eq!(merged.dropped, 2);

        assert!(ApiResponse::new(json!({"ok": true})).summary().is_none());
        assert!(ApiResponse::empty().summary().is_none());
    }

    #[test]
    fn from_value_rejects_contract_violations() {
        let err = Payload::from_value(json!({"data": []})).unwrap_err();
        assert!(err.to_string().contains("data"));

        let ok = Payload::from_value(json!({
            "data": [{
                "ioc": {"type": "ip", "value": "1.2.3.4"},
                "detection": {"type": "playbook", "id": "t1"}
            }]
        }))
        .unwrap();
        assert_eq!(ok.data.len(), 1);
        assert_eq!(ok.data[0].ioc.kind, "ip");
    }

    #[test]
    fn wire_format_uses_type_keys() {
        let value = serde_json::to_value(payload_of(1)).unwrap();
        assert_eq!(value["data"][0]["ioc"]["type"], "ip");
        assert_eq!(value["data"][0]["detection"]["type"], "playbook");
        // Unset optionals are omitted entirely.
        assert!(value["data"][0].get("timestamp").is_none());
        assert!(value.get("options").is_none());
    }
}
