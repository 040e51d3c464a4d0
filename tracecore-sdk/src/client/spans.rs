//! Turns finished spans into the client's output: a root span becomes a
//! transaction event, a standalone span becomes its own envelope, and every
//! other span is held until its root ends (spec.md §4.3).
//!
//! Grounded on `opentelemetry_sdk::trace::span_processor::SimpleSpanProcessor`
//! (`opentelemetry-sdk/src/trace/span_processor.rs`): a `SpanProcessor` is
//! the thing a `Span::drop`/`end` hands its finished `SpanData` to, with no
//! assumption about how the processor reassembles a trace.

use std::sync::Arc;

use tracecore_types::{
    Attributes, DataCategory, Envelope, EnvelopeHeaders, EnvelopeItem, Event, SpanId, SpanPayload,
    TraceId, TransactionInfo, Value,
};

use crate::span::sampler::{sample_span, SamplingContext};
use crate::span::{
    BoxedSpan, EndReason, NoopSpan, ObjectSafeSpan, Span, SpanData, SpanOrigin, SpanSink,
};
use crate::transport::{DropReason, HttpSend};

use super::Client;

impl<S: HttpSend + 'static> Client<S> {
    /// Starts a new span, inheriting trace/root identity and the sampling
    /// decision from `parent` when given, or drawing a fresh sampling
    /// decision for a new root. Returns a non-recording handle when tracing
    /// is disabled or sampling rejects the span, matching
    /// `opentelemetry::trace::Tracer::start`'s contract of always returning
    /// a span, recording or not.
    pub fn start_span(
        self: &Arc<Self>,
        name: impl Into<String>,
        op: Option<String>,
        start_time: f64,
        parent: Option<&BoxedSpan>,
        origin: SpanOrigin,
        is_standalone: bool,
    ) -> BoxedSpan {
        let name = name.into();
        let span_id = SpanId::new_random();
        let parent_recording = parent.and_then(BoxedSpan::downcast_recording);

        let (trace_id, parent_span_id, root_span_id, sampled) =
            if let Some(parent_span) = &parent_recording {
                let (trace_id, parent_id, root_id, sampled) =
                    parent_span.with_data(|d| (d.trace_id, d.span_id, d.root_span_id, d.sampled));
                (trace_id, Some(parent_id), root_id, sampled)
            } else {
                if !self.options().tracing_enabled() {
                    return BoxedSpan::new(NoopSpan::new());
                }
                let attrs = Attributes::new();
                let ctx = SamplingContext {
                    name: &name,
                    parent_sampled: None,
                    attributes: &attrs,
                };
                let decision = sample_span(&self.options().sample_rate_source(), &ctx);
                let trace_id = TraceId::new_random();
                if !decision.sampled {
                    return BoxedSpan::new(NoopSpan::with_ids(trace_id, span_id));
                }
                (trace_id, None, span_id, true)
            };

        let data = SpanData {
            trace_id,
            span_id,
            parent_span_id,
            root_span_id,
            name,
            op,
            origin,
            start_time,
            end_time: None,
            status: tracecore_types::SpanStatus::Unset,
            attributes: Attributes::new(),
            events: Vec::new(),
            sampled,
            is_standalone,
            children: Vec::new(),
            dsc: None,
        };

        let sink: Arc<dyn SpanSink> = self.clone();
        let span = Span::with_limits(data, Some(Arc::downgrade(&sink)), self.options().span_limits);
        if let Some(parent_span) = parent_recording {
            parent_span.register_child(span_id);
        }
        self.emit(super::Hook::SpanStart, &span_id);
        BoxedSpan::new(span)
    }

    fn finish_standalone_span(&self, span: SpanData) {
        if !span.sampled {
            self.record_dropped_event(DropReason::SampleRate, DataCategory::Span, 1);
            return;
        }
        let payload = to_span_payload(&span);
        let item = match EnvelopeItem::json("span", &payload) {
            Ok(item) => item,
            Err(e) => {
                tracecore_types::tc_warn!(name: "client.span_serialize_failed", error = e.to_string().as_str());
                return;
            }
        };
        let mut envelope = Envelope::new(EnvelopeHeaders::default());
        envelope.push(item);
        self.send_envelope(envelope);
    }

    /// Assembles the finished root span and whatever descendants it
    /// collected into a transaction event and runs it through the regular
    /// event pipeline (spec.md §4.3/§4.4).
    fn finish_transaction(&self, root: SpanData) {
        if !root.sampled {
            self.record_dropped_event(DropReason::SampleRate, DataCategory::Transaction, 1);
            self.pending_spans
                .lock()
                .expect("pending spans lock poisoned")
                .remove(&root.span_id);
            return;
        }

        let mut spans = self
            .pending_spans
            .lock()
            .expect("pending spans lock poisoned")
            .remove(&root.span_id)
            .unwrap_or_default();

        spans.sort_by(|a, b| {
            a.start_timestamp
                .partial_cmp(&b.start_timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.span_id.cmp(&b.span_id))
        });

        const MAX_SPANS: usize = 1000;
        if spans.len() > MAX_SPANS {
            let truncated = spans.len() - MAX_SPANS;
            spans.truncate(MAX_SPANS);
            self.record_dropped_event(DropReason::QueueOverflow, DataCategory::Span, truncated as u64);
        }

        let before_send_span = self.options().before_send_span.clone();
        let spans: Vec<SpanPayload> = spans
            .into_iter()
            .filter_map(|span| match &before_send_span {
                Some(hook) => match hook(span) {
                    Some(kept) => Some(kept),
                    None => {
                        self.record_dropped_event(DropReason::BeforeSend, DataCategory::Span, 1);
                        None
                    }
                },
                None => Some(span),
            })
            .collect();

        let mut event = Event::new_transaction(root.name.clone(), root.start_time);
        event.timestamp = root.end_time.unwrap_or(root.start_time);
        if let Some(op) = &root.op {
            event.contexts.insert("trace.op", op.clone());
        }
        event
            .contexts
            .insert("trace.trace_id", root.trace_id.to_string());
        event
            .contexts
            .insert("trace.span_id", root.span_id.to_string());
        if let Some(parent) = root.parent_span_id {
            event
                .contexts
                .insert("trace.parent_span_id", parent.to_string());
        }

        let transaction = event.transaction.as_mut().expect("new_transaction sets this");
        transaction.spans = spans;
        transaction.measurements = extract_measurements(&root);
        if let Some(Value::String(source)) = root.attributes.get("sentry.source") {
            transaction.transaction_info = Some(TransactionInfo {
                source: source.clone(),
            });
        }

        self.capture_event(event);
    }
}

impl<S: HttpSend + 'static> SpanSink for Client<S> {
    fn on_span_end(&self, span: SpanData) {
        if span.is_standalone {
            self.finish_standalone_span(span);
            return;
        }
        if span.is_root() {
            self.finish_transaction(span);
            return;
        }
        let payload = to_span_payload(&span);
        self.pending_spans
            .lock()
            .expect("pending spans lock poisoned")
            .entry(span.root_span_id)
            .or_default()
            .push(payload);
    }
}

fn to_span_payload(span: &SpanData) -> SpanPayload {
    SpanPayload {
        span_id: span.span_id.to_string(),
        trace_id: span.trace_id.to_string(),
        parent_span_id: span.parent_span_id.map(|id| id.to_string()),
        op: span.op.clone(),
        description: Some(span.name.clone()),
        start_timestamp: span.start_time,
        timestamp: span.end_time.unwrap_or(span.start_time),
        status: span.status.clone(),
        data: span.attributes.clone(),
        origin: Some(span.origin.as_str().to_owned()),
    }
}

/// Pulls `sentry.measurement_value`/`sentry.measurement_unit` pairs off a
/// root span's timed events into flat `name`/`name.unit` keys, since
/// [`Attributes`] only holds scalar values rather than the `{value, unit}`
/// pair a `Measurement` is modeled as elsewhere (spec.md §4.3).
fn extract_measurements(root: &SpanData) -> Attributes {
    let mut measurements = Attributes::new();
    for event in &root.events {
        let Some(Value::F64(value)) = event.attributes.get("sentry.measurement_value") else {
            continue;
        };
        measurements.insert(event.name.clone(), *value);
        if let Some(Value::String(unit)) = event.attributes.get("sentry.measurement_unit") {
            measurements.insert(format!("{}.unit", event.name), unit.clone());
        }
    }
    measurements
}
