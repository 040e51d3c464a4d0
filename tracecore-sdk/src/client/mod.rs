//! The event pipeline: ties dedupe, inbound filtering, scope enrichment,
//! `beforeSend*` hooks, session health, and transport together behind one
//! client facade (spec.md §4.4).
//!
//! Grounded on `opentelemetry_sdk::trace::TracerProvider`
//! (`opentelemetry-sdk/src/trace/provider.rs`): one process-wide object
//! owning the export pipeline that every call site shares, reached through
//! a cheap `Arc` clone rather than a thread-local.
//!
//! Unlike a browser SDK, `capture_*` here never performs network I/O
//! itself: the synchronous part of the pipeline (filter, dedupe, scope
//! merge, `beforeSend*`) runs immediately and the resulting envelope is
//! queued, mirroring `transport::Transport`'s own choice not to spawn a
//! background worker. A host drains the queue by awaiting [`Client::flush`]
//! or [`Client::close`], or by calling [`Client::send_pending`] directly
//! from its own event loop.

pub mod dedupe;
pub mod filters;
pub mod hooks;
pub mod spans;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracecore_types::{
    DataCategory, Envelope, EnvelopeHeaders, EnvelopeItem, Event, Hint, Session, SessionStatus,
    SpanId, SpanPayload,
};

use crate::carrier::{self, SDK_VERSION};
use crate::config::ClientOptions;
use crate::scope::{EventProcessor, EventSink, Scope, ScopeData};
use crate::span::sampler::sample_span;
use crate::transport::{DropReason, HttpSend, Transport};

pub use dedupe::DedupeIntegration;
pub use hooks::{Callback, Hook, HookRegistry, Unregister};

/// Whether `_processEvent` decided to send the event or drop it, and why.
#[derive(Debug)]
pub enum ProcessOutcome {
    Queued { event_id: String },
    Dropped { reason: DropReason },
}

/// The client facade, generic over the pluggable HTTP sender (spec.md §1).
pub struct Client<S: HttpSend> {
    options: ClientOptions,
    transport: Arc<Transport<S>>,
    dedupe: DedupeIntegration,
    hooks: HookRegistry,
    integrations: Mutex<Vec<&'static str>>,
    event_processors: Mutex<Vec<EventProcessor>>,
    pending: Mutex<Vec<Envelope>>,
    session: Mutex<Option<Session>>,
    /// Finished non-root, non-standalone spans waiting for their root to
    /// end, keyed by `root_span_id`. Stands in for a span registry: rather
    /// than every `Span` holding live handles to its children, each child
    /// deposits its finished payload here and the root drains it once.
    pending_spans: Mutex<HashMap<SpanId, Vec<SpanPayload>>>,
}

impl<S: HttpSend + 'static> Client<S> {
    pub fn new(options: ClientOptions, http: S) -> Arc<Self> {
        let capacity = options.buffer_size();
        let send_client_reports = options.send_client_reports;
        Arc::new(Client {
            options,
            transport: Arc::new(Transport::new(http, capacity, send_client_reports)),
            dedupe: DedupeIntegration::new(),
            hooks: HookRegistry::new(),
            integrations: Mutex::new(vec!["Dedupe", "InboundFilters"]),
            event_processors: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            session: Mutex::new(None),
            pending_spans: Mutex::new(HashMap::new()),
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Installs this client as the global scope's event sink, so any
    /// `Scope` that inherits from the carrier's global scope can capture
    /// through it (spec.md §4.1/§4.2).
    pub fn init(self: &Arc<Self>) {
        let sink: Arc<dyn EventSink> = self.clone();
        carrier::main_carrier(SDK_VERSION)
            .with_global_scope_mut(|scope| scope.set_client(Some(Arc::downgrade(&sink))));
    }

    pub fn add_integration(&self, name: &'static str) {
        let mut integrations = self.integrations.lock().expect("integrations lock poisoned");
        if !integrations.contains(&name) {
            integrations.push(name);
        }
    }

    /// `addEventProcessor(fn)` at the client level (spec.md §4.4 step 5):
    /// runs last, after global/isolation/current scope processors.
    pub fn add_event_processor(
        &self,
        processor: impl Fn(Event, &Hint) -> Option<Event> + Send + Sync + 'static,
    ) {
        self.event_processors
            .lock()
            .expect("event processors lock poisoned")
            .push(Arc::new(processor));
    }

    pub fn get_integration_by_name(&self, name: &str) -> bool {
        self.integrations
            .lock()
            .expect("integrations lock poisoned")
            .iter()
            .any(|n| *n == name)
    }

    pub fn on(&self, hook: Hook, callback: Callback) -> Unregister<'_> {
        self.hooks.on(hook, callback)
    }

    pub fn emit(&self, hook: Hook, payload: &dyn std::any::Any) {
        self.hooks.emit(hook, payload);
    }

    pub fn record_dropped_event(&self, reason: DropReason, category: DataCategory, count: u64) {
        self.transport.record_dropped_event(reason, category, count);
    }

    /// `captureException`/`captureMessage`/`captureEvent`: merges the
    /// current + isolation + global scope into `event` and runs
    /// `_processEvent` (spec.md §4.4).
    pub fn capture_event(&self, event: Event) -> String {
        let scope_data = self.merged_scope_data();
        match self.process_event(event, &scope_data) {
            ProcessOutcome::Queued { event_id } => event_id,
            ProcessOutcome::Dropped { .. } => String::new(),
        }
    }

    pub fn capture_message(&self, message: impl Into<String>, level: tracecore_types::Level) -> String {
        let mut event = Event::new_error();
        event.message = Some(message.into());
        event.level = Some(level);
        self.capture_event(event)
    }

    pub fn capture_exception(&self, exception: tracecore_types::Exception) -> String {
        let mut event = Event::new_error();
        event.exception_values.push(exception);
        self.capture_event(event)
    }

    pub fn capture_session(&self, session: Session) {
        let mut slot = self.session.lock().expect("session lock poisoned");
        *slot = Some(session.clone());
        drop(slot);
        self.queue_session(session);
    }

    fn merged_scope_data(&self) -> ScopeData {
        let global = carrier::main_carrier(SDK_VERSION).with_global_scope(Scope::scope_data);
        let isolation = carrier::get_isolation_scope().scope_data();
        let current = carrier::get_current_scope().scope_data();
        merge_scope_layers(vec![global, isolation, current])
    }

    /// `_processEvent` (spec.md §4.4): sampling, `_prepareEvent`,
    /// `beforeSend*`, session-health update, then queues the envelope.
    fn process_event(&self, mut event: Event, scope_data: &ScopeData) -> ProcessOutcome {
        let category = if event.is_transaction() {
            DataCategory::Transaction
        } else {
            DataCategory::Error
        };

        if !event.is_transaction() {
            if let Some(rate) = self.options.sample_rate {
                let ctx = crate::span::sampler::SamplingContext {
                    name: event.message.as_deref().unwrap_or(""),
                    parent_sampled: None,
                    attributes: &event.tags,
                };
                let decision = sample_span(
                    &crate::span::sampler::SampleRateSource::Fixed(rate),
                    &ctx,
                );
                if !decision.sampled {
                    self.record_dropped_event(DropReason::SampleRate, category, 1);
                    return ProcessOutcome::Dropped {
                        reason: DropReason::SampleRate,
                    };
                }
            }
        }

        if filters::should_filter(&event, &self.options) {
            self.record_dropped_event(DropReason::EventProcessor, category, 1);
            return ProcessOutcome::Dropped {
                reason: DropReason::EventProcessor,
            };
        }

        if self.dedupe.should_drop(&event) {
            self.record_dropped_event(DropReason::EventProcessor, category, 1);
            return ProcessOutcome::Dropped {
                reason: DropReason::EventProcessor,
            };
        }

        self.prepare_event(&mut event, scope_data);
        self.hooks.emit(Hook::PreprocessEvent, &event);

        let hint = Hint {
            event_id: Some(event.event_id.clone()),
            integrations: self
                .integrations
                .lock()
                .expect("integrations lock poisoned")
                .clone(),
        };
        let client_processors = self
            .event_processors
            .lock()
            .expect("event processors lock poisoned")
            .clone();
        for processor in scope_data.event_processors.iter().chain(client_processors.iter()) {
            let span_count = event.transaction.as_ref().map(|t| t.spans.len());
            match processor(event, &hint) {
                Some(next) => event = next,
                None => {
                    self.record_dropped_event(DropReason::EventProcessor, category, 1);
                    if let Some(span_count) = span_count {
                        if span_count > 0 {
                            self.record_dropped_event(
                                DropReason::EventProcessor,
                                DataCategory::Span,
                                span_count as u64,
                            );
                        }
                    }
                    return ProcessOutcome::Dropped {
                        reason: DropReason::EventProcessor,
                    };
                }
            }
        }

        let hook = if event.is_transaction() {
            self.options.before_send_transaction.as_ref()
        } else {
            self.options.before_send.as_ref()
        };
        if let Some(hook) = hook {
            let spans_before = event.transaction.as_ref().map(|t| t.spans.len());
            let name_before = event.transaction.as_ref().map(|t| t.transaction.clone());
            match hook(event) {
                Some(mutated) => {
                    event = mutated;
                    if let (Some(before), Some(transaction)) = (spans_before, &event.transaction) {
                        if transaction.spans.len() < before {
                            self.record_dropped_event(
                                DropReason::BeforeSend,
                                DataCategory::Span,
                                (before - transaction.spans.len()) as u64,
                            );
                        }
                    }
                    if let Some(transaction) = event.transaction.as_mut() {
                        if name_before.as_deref() != Some(transaction.transaction.as_str())
                            && transaction.transaction_info.is_some()
                        {
                            transaction.transaction_info.as_mut().unwrap().source = "custom".to_string();
                        }
                    }
                }
                None => {
                    self.record_dropped_event(DropReason::BeforeSend, category, 1);
                    return ProcessOutcome::Dropped {
                        reason: DropReason::BeforeSend,
                    };
                }
            }
        }

        self.update_session_health(&event);
        self.hooks.emit(Hook::BeforeSendEvent, &event);

        let event_id = event.event_id.clone();
        self.queue_event(event);
        ProcessOutcome::Queued { event_id }
    }

    /// `_prepareEvent` steps 4/6 (spec.md §4.4): merges scope enrichment
    /// into the event without overwriting non-empty event fields, and
    /// synthesizes a trace context when the scope carries one and the
    /// event doesn't.
    fn prepare_event(&self, event: &mut Event, scope_data: &ScopeData) {
        event.tags.merge_missing(&scope_data.tags);
        event.extra.merge_missing(&scope_data.extra);
        event.contexts.merge_missing(&scope_data.contexts);
        if event.user.is_empty() {
            event.user = scope_data.user.clone();
        }
        if event.level.is_none() {
            event.level = scope_data.level;
        }
        if event.fingerprint.is_empty() {
            event.fingerprint = scope_data.fingerprint.clone();
        }
        if event.breadcrumbs.is_empty() {
            event.breadcrumbs = scope_data.breadcrumbs.clone();
        }
        if event.release.is_none() {
            event.release = self.options.release.clone();
        }
        if event.environment.is_none() {
            event.environment = self.options.environment.clone();
        }

        if event.contexts.get("trace.trace_id").is_none() {
            let ctx = &scope_data.propagation_context;
            event.contexts.insert("trace.trace_id", ctx.trace_id.to_string());
            event.contexts.insert("trace.span_id", ctx.span_id.to_string());
            if let Some(parent) = ctx.parent_span_id {
                event.contexts.insert("trace.parent_span_id", parent.to_string());
            }
        }
    }

    /// `recordDroppedEvent` + `_updateSessionFromEvent` (spec.md §4.4): an
    /// unhandled exception crashes the session; otherwise a first error
    /// moves it from `ok` to `errored`. Subsequent errors on an
    /// already-errored session neither re-transition nor re-send.
    fn update_session_health(&self, event: &Event) {
        let mut slot = self.session.lock().expect("session lock poisoned");
        let Some(session) = slot.as_mut() else {
            return;
        };
        if session.is_closed() {
            return;
        }

        let unhandled = event
            .exception_values
            .iter()
            .any(|e| e.mechanism.as_ref().is_some_and(|m| !m.handled));

        if unhandled {
            session.close(SessionStatus::Crashed, String::new(), 0.0, None);
        } else if !event.exception_values.is_empty() {
            let already_errored = session.reported_status() == SessionStatus::Errored;
            session.record_error();
            if !already_errored {
                self.queue_session(session.clone());
            }
            return;
        } else {
            return;
        }
        let session = session.clone();
        drop(slot);
        self.queue_session(session);
    }

    fn queue_event(&self, event: Event) {
        let item_type = if event.is_transaction() { "transaction" } else { "event" };
        let item = match EnvelopeItem::json(item_type, &event) {
            Ok(item) => item,
            Err(e) => {
                tracecore_types::tc_warn!(name: "client.event_serialize_failed", error = e.to_string().as_str());
                return;
            }
        };
        let mut envelope = Envelope::new(EnvelopeHeaders {
            event_id: Some(event.event_id.clone()),
            ..Default::default()
        });
        envelope.push(item);
        self.hooks.emit(Hook::BeforeEnvelope, &envelope);
        self.pending.lock().expect("pending queue poisoned").push(envelope);
        self.hooks.emit(Hook::AfterSendEvent, &event);
    }

    fn queue_session(&self, session: Session) {
        let item = match EnvelopeItem::json("session", &session) {
            Ok(item) => item,
            Err(_) => return,
        };
        let mut envelope = Envelope::new(EnvelopeHeaders::default());
        envelope.push(item);
        self.pending.lock().expect("pending queue poisoned").push(envelope);
    }

    pub fn send_envelope(&self, envelope: Envelope) {
        self.hooks.emit(Hook::BeforeEnvelope, &envelope);
        self.pending.lock().expect("pending queue poisoned").push(envelope);
    }

    /// Drains the queued envelopes (built by synchronous `capture_*` calls)
    /// to the transport, returning how many were dispatched.
    pub async fn send_pending(&self) -> usize {
        let envelopes: Vec<Envelope> = {
            let mut pending = self.pending.lock().expect("pending queue poisoned");
            std::mem::take(&mut *pending)
        };
        let url = match &self.options.dsn {
            Some(dsn) => dsn.envelope_endpoint(),
            None => return 0,
        };
        let mut sent = 0;
        for envelope in envelopes {
            let now = epoch_seconds();
            if self.transport.send(envelope, &url, now).await.sent {
                sent += 1;
            }
        }
        if let Some(report) = self.transport.take_client_report() {
            let mut envelope = Envelope::new(EnvelopeHeaders::default());
            envelope.push(report);
            self.transport.send(envelope, &url, epoch_seconds()).await;
        }
        sent
    }

    /// Drains pending envelopes and races the transport's in-flight drain
    /// against `timeout`, matching `opentelemetry_sdk::trace::TracerProvider::force_flush`'s
    /// return-whether-it-finished-in-time contract.
    pub async fn flush(&self, timeout: Duration) -> bool {
        self.hooks.emit(Hook::Flush, &());
        self.send_pending().await;
        self.transport.flush(timeout).await
    }

    pub async fn close(&self, timeout: Duration) -> bool {
        self.hooks.emit(Hook::Close, &());
        self.flush(timeout).await
    }
}

impl<S: HttpSend + 'static> EventSink for Client<S> {
    fn capture_event(&self, event: Event, _scope: &Scope) -> String {
        Client::capture_event(self, event)
    }

    fn warn_no_client(&self, what: &str) {
        tracecore_types::tc_warn!(name: "client.no_client", what = what);
    }
}

fn merge_scope_layers(layers: Vec<ScopeData>) -> ScopeData {
    let mut iter = layers.into_iter();
    let mut merged = iter.next().unwrap_or_else(empty_scope_data);
    for layer in iter {
        merged.breadcrumbs.extend(layer.breadcrumbs);
        for (k, v) in layer.tags.iter() {
            merged.tags.insert(k.to_owned(), v.clone());
        }
        for (k, v) in layer.extra.iter() {
            merged.extra.insert(k.to_owned(), v.clone());
        }
        for (k, v) in layer.contexts.iter() {
            merged.contexts.insert(k.to_owned(), v.clone());
        }
        if !layer.user.is_empty() {
            merged.user = layer.user;
        }
        if layer.level.is_some() {
            merged.level = layer.level;
        }
        if !layer.fingerprint.is_empty() {
            merged.fingerprint = layer.fingerprint;
        }
        merged.propagation_context = layer.propagation_context;
        merged.event_processors.extend(layer.event_processors);
    }
    merged
}

fn empty_scope_data() -> ScopeData {
    Scope::new().scope_data()
}

/// Wall-clock seconds since the epoch, the same unit `RateLimits`'
/// deadlines are expressed in. The transport never calls `Instant::now()`
/// itself (it has no clock dependency of its own per `ratelimit.rs`); the
/// client supplies it here, same as `Transport::flush` uses `Instant::now()`
/// directly at this layer.
fn epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
