//! The span engine: recording and non-recording spans, parent/child
//! linkage, idle-span lifecycle, and the sampling algorithm.
//!
//! Grounded on `opentelemetry_sdk::trace::span::Span`
//! (`opentelemetry-sdk/src/trace/span.rs`): spans hold their mutable state
//! behind a lock, are taken-and-exported on `end`, and a `Drop` impl ends
//! them if the caller never calls `end` explicitly. The object-safety split
//! between a concrete span type and a boxed trait object mirrors
//! `opentelemetry::trace::{ObjectSafeSpan, BoxedSpan}`
//! (`opentelemetry/src/trace/mod.rs`).

pub mod idle;
pub mod sampler;

use std::any::Any;
use std::sync::{Arc, Mutex, Weak};

use tracecore_types::{Attributes, SpanId, SpanStatus, TraceId, Value};

/// `manual`, `auto.http.browser`, `auto.pageload.browser`, or any other
/// instrumentation-supplied tag — an open string set rather than a closed
/// enum (spec.md §3: "origin (enum: manual / auto.http.browser / … )").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanOrigin(String);

impl SpanOrigin {
    pub const MANUAL: &'static str = "manual";
    pub const AUTO_HTTP_BROWSER: &'static str = "auto.http.browser";
    pub const AUTO_PAGELOAD_BROWSER: &'static str = "auto.pageload.browser";

    pub fn new(value: impl Into<String>) -> Self {
        SpanOrigin(value.into())
    }

    pub fn manual() -> Self {
        SpanOrigin(Self::MANUAL.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SpanOrigin {
    fn default() -> Self {
        SpanOrigin::manual()
    }
}

/// Why a span ended other than a plain `end()` call. The idle-span
/// finalizer is the only producer of the non-`Manual` variants
/// (spec.md §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    Manual,
    Cancelled,
    DocumentHidden,
    ExternalFinish,
    FinalTimeout,
    HeartbeatFailed,
    IdleTimeout,
    InteractionInterrupted,
}

/// `{name, time, attributes}`, an instant recorded on a span (spec.md §3).
/// Events carrying `sentry.measurement_value`/`sentry.measurement_unit`
/// attributes are how measurements reach a finished transaction.
#[derive(Clone, Debug)]
pub struct TimedEvent {
    pub name: String,
    pub time: f64,
    pub attributes: Attributes,
}

/// The mutable state of a recording span.
#[derive(Clone, Debug)]
pub struct SpanData {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub root_span_id: SpanId,
    pub name: String,
    pub op: Option<String>,
    pub origin: SpanOrigin,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub status: SpanStatus,
    pub attributes: Attributes,
    pub events: Vec<TimedEvent>,
    pub sampled: bool,
    pub is_standalone: bool,
    pub children: Vec<SpanId>,
    pub dsc: Option<tracecore_types::DynamicSamplingContext>,
}

impl SpanData {
    /// `root = span.root || span`: the root lookup spec.md §3 requires to
    /// be O(1). `root_span_id` is copied from the parent at creation time
    /// rather than walked, so this is always a single field read.
    pub fn is_root(&self) -> bool {
        self.root_span_id == self.span_id
    }

    pub fn is_recording(&self) -> bool {
        self.end_time.is_none() && self.sampled
    }
}

/// Receives a span's finished state. The client implements this to turn a
/// finished root span into a transaction event and a finished standalone
/// span into its own envelope (spec.md §4.3).
pub trait SpanSink: Send + Sync {
    fn on_span_end(&self, span: SpanData);
}

/// The trait object boundary a `Scope`'s "active span" field is stored
/// behind, so both recording (`Span`) and non-recording (`NoopSpan`)
/// handles can occupy the same slot (spec.md §3).
pub trait ObjectSafeSpan: Send + Sync {
    fn trace_id(&self) -> TraceId;
    fn span_id(&self) -> SpanId;
    fn is_recording(&self) -> bool;
    fn set_attribute(&self, key: String, value: Value);
    fn set_status(&self, status: SpanStatus);
    fn add_event(&self, name: String, time: f64, attributes: Attributes);
    fn update_name(&self, name: String);
    fn end(&self, timestamp: Option<f64>, reason: EndReason);
    fn as_any(&self) -> &dyn Any;
}

/// Per-span caps on events/attributes, mirroring
/// `opentelemetry_sdk::trace::SpanLimits`'s defaults so one misbehaving
/// instrumentation call site can't grow a span without bound.
#[derive(Clone, Copy, Debug)]
pub struct SpanLimits {
    pub max_events_per_span: usize,
    pub max_attributes_per_span: usize,
}

impl Default for SpanLimits {
    fn default() -> Self {
        SpanLimits {
            max_events_per_span: 128,
            max_attributes_per_span: 128,
        }
    }
}

/// A recording span: a cheap, cloneable handle over shared mutable state.
/// Cloning (e.g. when a `Scope` is cloned and carries a weak reference to
/// the active span forward) clones the `Arc`, never the underlying data —
/// matching spec.md §4.2's "attached span ... reassigned, never
/// deep-copied".
#[derive(Clone)]
pub struct Span {
    inner: Arc<Mutex<SpanData>>,
    sink: Option<Weak<dyn SpanSink>>,
    limits: SpanLimits,
}

impl Span {
    pub fn new(data: SpanData, sink: Option<Weak<dyn SpanSink>>) -> Self {
        Span::with_limits(data, sink, SpanLimits::default())
    }

    pub fn with_limits(data: SpanData, sink: Option<Weak<dyn SpanSink>>, limits: SpanLimits) -> Self {
        Span {
            inner: Arc::new(Mutex::new(data)),
            sink,
            limits,
        }
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&SpanData) -> R) -> R {
        let data = self.inner.lock().expect("span lock poisoned");
        f(&data)
    }

    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut SpanData) -> R) -> R {
        let mut data = self.inner.lock().expect("span lock poisoned");
        f(&mut data)
    }

    pub fn root_span_id(&self) -> SpanId {
        self.with_data(|d| d.root_span_id)
    }

    pub fn is_standalone(&self) -> bool {
        self.with_data(|d| d.is_standalone)
    }

    pub fn sampled(&self) -> bool {
        self.with_data(|d| d.sampled)
    }

    /// Adds `child` to this span's children. Called by the engine when a
    /// new child span is created with this span as its parent.
    pub fn register_child(&self, child: SpanId) {
        self.with_data_mut(|d| d.children.push(child));
    }

    fn do_end(&self, timestamp: Option<f64>, reason: EndReason) {
        let finished = self.with_data_mut(|d| {
            if d.end_time.is_some() {
                return None;
            }
            let end = timestamp.unwrap_or(d.start_time);
            let end = end.max(d.start_time);
            d.end_time = Some(end);
            if reason == EndReason::FinalTimeout {
                d.status.update(SpanStatus::Error {
                    message: "deadline_exceeded".into(),
                });
            }
            Some(d.clone())
        });
        if let Some(data) = finished {
            if let Some(sink) = self.sink.as_ref().and_then(Weak::upgrade) {
                sink.on_span_end(data);
            }
        }
    }
}

impl ObjectSafeSpan for Span {
    fn trace_id(&self) -> TraceId {
        self.with_data(|d| d.trace_id)
    }

    fn span_id(&self) -> SpanId {
        self.with_data(|d| d.span_id)
    }

    fn is_recording(&self) -> bool {
        self.with_data(|d| d.is_recording())
    }

    fn set_attribute(&self, key: String, value: Value) {
        self.with_data_mut(|d| {
            if d.end_time.is_none()
                && (d.attributes.get(&key).is_some()
                    || d.attributes.len() < self.limits.max_attributes_per_span)
            {
                d.attributes.insert(key, value);
            }
        });
    }

    fn set_status(&self, status: SpanStatus) {
        self.with_data_mut(|d| {
            if d.end_time.is_none() {
                d.status.update(status);
            }
        });
    }

    fn add_event(&self, name: String, time: f64, attributes: Attributes) {
        self.with_data_mut(|d| {
            if d.end_time.is_none() && d.events.len() < self.limits.max_events_per_span {
                d.events.push(TimedEvent {
                    name,
                    time,
                    attributes,
                });
            }
        });
    }

    fn update_name(&self, name: String) {
        self.with_data_mut(|d| {
            if d.end_time.is_none() {
                d.name = name;
            }
        });
    }

    fn end(&self, timestamp: Option<f64>, reason: EndReason) {
        self.do_end(timestamp, reason);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Span {
    /// Ends the span if the caller never called `end` explicitly, mirroring
    /// `opentelemetry_sdk`'s `Span::drop` which exports on drop rather than
    /// silently discarding unfinished state.
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            self.do_end(None, EndReason::Manual);
        }
    }
}

/// A non-recording span: carries only identifiers and a zero sampled flag;
/// every mutator is a no-op (spec.md §3). Returned whenever tracing is
/// disabled or sampling rejects a new root span.
#[derive(Clone)]
pub struct NoopSpan {
    trace_id: TraceId,
    span_id: SpanId,
}

impl NoopSpan {
    pub fn new() -> Self {
        NoopSpan {
            trace_id: TraceId::INVALID,
            span_id: SpanId::INVALID,
        }
    }

    pub fn with_ids(trace_id: TraceId, span_id: SpanId) -> Self {
        NoopSpan { trace_id, span_id }
    }
}

impl Default for NoopSpan {
    fn default() -> Self {
        NoopSpan::new()
    }
}

impl ObjectSafeSpan for NoopSpan {
    fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    fn span_id(&self) -> SpanId {
        self.span_id
    }

    fn is_recording(&self) -> bool {
        false
    }

    fn set_attribute(&self, _key: String, _value: Value) {}
    fn set_status(&self, _status: SpanStatus) {}
    fn add_event(&self, _name: String, _time: f64, _attributes: Attributes) {}
    fn update_name(&self, _name: String) {}
    fn end(&self, _timestamp: Option<f64>, _reason: EndReason) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A type-erased span handle, boxed behind `Arc` so it can be cheaply
/// cloned into a `Scope` and shared across the stack strategy's push/pop
/// boundaries.
#[derive(Clone)]
pub struct BoxedSpan(Arc<dyn ObjectSafeSpan>);

impl BoxedSpan {
    pub fn new(span: impl ObjectSafeSpan + 'static) -> Self {
        BoxedSpan(Arc::new(span))
    }

    /// Recovers the concrete recording `Span`, if this handle wraps one
    /// (as opposed to a `NoopSpan`). The span engine uses this to mutate a
    /// parent's children list when starting a new child span.
    pub fn downcast_recording(&self) -> Option<Span> {
        self.0.as_any().downcast_ref::<Span>().cloned()
    }
}

impl std::ops::Deref for BoxedSpan {
    type Target = dyn ObjectSafeSpan;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_span(sampled: bool, standalone: bool) -> Span {
        let data = SpanData {
            trace_id: TraceId::new_random(),
            span_id: SpanId::new_random(),
            parent_span_id: None,
            root_span_id: SpanId::new_random(),
            name: "test".into(),
            op: None,
            origin: SpanOrigin::manual(),
            start_time: 0.0,
            end_time: None,
            status: SpanStatus::Unset,
            attributes: Attributes::new(),
            events: Vec::new(),
            sampled,
            is_standalone: standalone,
            children: Vec::new(),
            dsc: None,
        };
        Span::new(data, None)
    }

    #[test]
    fn is_recording_requires_unset_end_time_and_sampled() {
        let span = test_span(true, false);
        assert!(span.is_recording());
        span.end(Some(1.0), EndReason::Manual);
        assert!(!span.is_recording());
    }

    #[test]
    fn end_time_never_precedes_start_time() {
        let span = test_span(true, false);
        span.end(Some(-5.0), EndReason::Manual);
        assert_eq!(span.with_data(|d| d.end_time), Some(0.0));
    }

    #[test]
    fn mutators_are_noops_after_end() {
        let span = test_span(true, false);
        span.end(Some(1.0), EndReason::Manual);
        span.set_status(SpanStatus::Ok);
        assert_eq!(span.with_data(|d| d.status.clone()), SpanStatus::Unset);
    }

    #[test]
    fn final_timeout_sets_error_status() {
        let span = test_span(true, false);
        span.end(Some(1.0), EndReason::FinalTimeout);
        assert_eq!(
            span.with_data(|d| d.status.clone()),
            SpanStatus::Error {
                message: "deadline_exceeded".into()
            }
        );
    }

    #[test]
    fn noop_span_mutators_do_nothing_and_never_panic() {
        let span = NoopSpan::new();
        span.set_attribute("k".into(), Value::from("v"));
        span.set_status(SpanStatus::Ok);
        span.end(Some(1.0), EndReason::Manual);
        assert!(!span.is_recording());
    }

    #[test]
    fn boxed_span_downcasts_only_real_spans() {
        let recording = BoxedSpan::new(test_span(true, false));
        assert!(recording.downcast_recording().is_some());

        let noop = BoxedSpan::new(NoopSpan::new());
        assert!(noop.downcast_recording().is_none());
    }
}
