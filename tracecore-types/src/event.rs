//! The event data model: `Event` (the `ErrorEvent`/`TransactionEvent` union),
//! and the nested records it carries (`Exception`, `Breadcrumb`, `User`,
//! `SdkInfo`, span-derived `Measurements`).
//!
//! Grounded on `opentelemetry_sdk::trace::span::SpanData` for the pattern of
//! a plain, serializable snapshot struct produced once a span/trace finishes
//! and handed off to an exporter — here, to the envelope builder.

use serde::{Deserialize, Serialize};

use crate::ids::new_event_id;
use crate::status::SpanStatus;
use crate::value::{Attributes, Value};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SdkInfo {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub packages: Vec<SdkPackage>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SdkPackage {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl User {
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.email.is_none()
            && self.username.is_none()
            && self.ip_address.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

/// A single breadcrumb, per spec.md §4.2.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(skip_serializing_if = "Attributes::is_empty", default)]
    pub data: Attributes,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StackFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Stacktrace {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub frames: Vec<StackFrame>,
}

/// A single exception within `exception.values[]`. Equality of
/// `(type, value, stacktrace)` across two captures is what the dedupe
/// integration compares.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Exception {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<ExceptionMechanism>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExceptionMechanism {
    #[serde(rename = "type")]
    pub mechanism_type: String,
    pub handled: bool,
}

/// A span-derived measurement, e.g. from a timed event carrying
/// `sentry.measurement_value`/`sentry.measurement_unit` (spec.md §4.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A finished span, as it appears in `TransactionEvent.spans[]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpanPayload {
    pub span_id: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub op: Option<String>,
    pub description: Option<String>,
    pub start_timestamp: f64,
    pub timestamp: f64,
    #[serde(flatten)]
    pub status: SpanStatus,
    #[serde(skip_serializing_if = "Attributes::is_empty", default)]
    pub data: Attributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub source: String,
}

/// `ErrorEvent` (`kind` unset) or `TransactionEvent` (`kind = Transaction`,
/// carrying the transaction-only fields). Modeled as a struct with an
/// optional `transaction_data` rather than two separate Rust types so that
/// the shared fields (and the scope-merge logic in the client crate that
/// operates on all of them uniformly) live in one place, matching how
/// `opentelemetry_sdk::trace::span::SpanData` keeps span-kind-independent
/// data in one flat struct.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk: Option<SdkInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub exception_values: Vec<Exception>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub breadcrumbs: Vec<Breadcrumb>,
    #[serde(skip_serializing_if = "Attributes::is_empty", default)]
    pub contexts: Attributes,
    #[serde(skip_serializing_if = "Attributes::is_empty", default)]
    pub tags: Attributes,
    #[serde(skip_serializing_if = "Attributes::is_empty", default)]
    pub extra: Attributes,
    #[serde(skip_serializing_if = "User::is_empty", default)]
    pub user: User,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fingerprint: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionData>,

    /// Scratch space carried on the in-memory `Event` only; stripped before
    /// envelope construction and never serialized (spec.md §3).
    #[serde(skip)]
    pub sdk_processing_metadata: Attributes,

    /// Set by `captureException`/`captureEvent` when the triggering object
    /// had already been captured once; lets the client short-circuit
    /// without re-running the pipeline (spec.md §4.4 dedupe-at-entry).
    #[serde(skip)]
    pub dedupe_marker: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionData {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub transaction: String,
    pub start_timestamp: f64,
    pub spans: Vec<SpanPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_info: Option<TransactionInfo>,
    #[serde(skip_serializing_if = "Attributes::is_empty", default)]
    pub measurements: Attributes,
}

impl Event {
    pub fn new_error() -> Self {
        Event {
            event_id: new_event_id(),
            timestamp: 0.0,
            platform: None,
            release: None,
            environment: None,
            sdk: None,
            message: None,
            exception_values: Vec::new(),
            breadcrumbs: Vec::new(),
            contexts: Attributes::new(),
            tags: Attributes::new(),
            extra: Attributes::new(),
            user: User::default(),
            fingerprint: Vec::new(),
            level: None,
            transaction: None,
            sdk_processing_metadata: Attributes::new(),
            dedupe_marker: None,
        }
    }

    pub fn new_transaction(name: impl Into<String>, start_timestamp: f64) -> Self {
        let mut event = Event::new_error();
        event.transaction = Some(TransactionData {
            kind: "transaction",
            transaction: name.into(),
            start_timestamp,
            spans: Vec::new(),
            transaction_info: None,
            measurements: Attributes::new(),
        });
        event
    }

    pub fn is_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Tags this event's `sdk_processing_metadata` with a marker identifying
    /// the source exception object, for the dedupe-at-entry check in
    /// spec.md §4.4.
    pub fn mark_captured(&mut self, marker: impl Into<String>) {
        self.dedupe_marker = Some(marker.into());
    }

    /// The identity tuple the dedupe integration compares across captures:
    /// `(message, fingerprint, first exception type+value, stacktrace)`.
    pub fn dedupe_key(&self) -> DedupeKey {
        let first_exception = self.exception_values.first();
        DedupeKey {
            message: self.message.clone(),
            fingerprint: self.fingerprint.clone(),
            exception_type: first_exception.and_then(|e| e.exception_type.clone()),
            exception_value: first_exception.and_then(|e| e.value.clone()),
            stacktrace_frames: first_exception
                .and_then(|e| e.stacktrace.as_ref())
                .map(|s| s.frames.clone())
                .unwrap_or_default(),
        }
    }

    pub fn merge_tag(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.tags.insert(key.into(), value.into());
    }
}

/// Side-channel passed alongside an event to its event processors
/// (spec.md §4.4 step 1: "attach installed-integration names to the
/// hint"). Not part of the wire payload.
#[derive(Clone, Debug, Default)]
pub struct Hint {
    pub event_id: Option<String>,
    pub integrations: Vec<&'static str>,
}

/// spec.md §4.4's "dedupe integration" comparison key.
#[derive(Clone, Debug, PartialEq)]
pub struct DedupeKey {
    pub message: Option<String>,
    pub fingerprint: Vec<String>,
    pub exception_type: Option<String>,
    pub exception_value: Option<String>,
    pub stacktrace_frames: Vec<StackFrame>,
}

impl PartialEq for StackFrame {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename
            && self.function == other.function
            && self.lineno == other.lineno
            && self.colno == other.colno
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_event_serializes_without_transaction_fields() {
        let event = Event::new_error();
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"transaction\""));
    }

    #[test]
    fn transaction_event_carries_type_field() {
        let event = Event::new_transaction("GET /", 100.0);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"transaction\""));
        assert!(json.contains("\"transaction\":\"GET /\""));
    }

    #[test]
    fn dedupe_key_matches_for_identical_exceptions() {
        let mut a = Event::new_error();
        a.exception_values.push(Exception {
            exception_type: Some("TypeError".into()),
            value: Some("x is undefined".into()),
            stacktrace: None,
            mechanism: None,
        });
        let mut b = Event::new_error();
        b.exception_values.push(Exception {
            exception_type: Some("TypeError".into()),
            value: Some("x is undefined".into()),
            stacktrace: None,
            mechanism: None,
        });
        assert_eq!(a.dedupe_key(), b.dedupe_key());
    }

    #[test]
    fn sdk_processing_metadata_never_serializes() {
        let mut event = Event::new_error();
        event
            .sdk_processing_metadata
            .insert("internal".into(), Value::from(true));
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("sdk_processing_metadata"));
        assert!(!json.contains("internal"));
    }
}
