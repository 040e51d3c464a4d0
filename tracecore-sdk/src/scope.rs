//! The scope: the enrichment data (tags, user, breadcrumbs, ...) attached
//! to the current execution context, per spec.md §4.2.
//!
//! Grounded on `opentelemetry::Context` (`opentelemetry/src/context/mod.rs`)
//! for "an immutable-looking, cheaply cloned bag of key/value state carried
//! through a call stack", generalized here to the much richer mutable
//! enrichment state a `Scope` carries (breadcrumbs, dedupe-relevant fields,
//! event processors) instead of OTel's type-indexed entry map.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use tracecore_types::{
    Attributes, Event, Hint, Level, PropagationContext, Session, User, Value,
};

use crate::span::BoxedSpan;

pub const DEFAULT_BREADCRUMB_CAP: usize = 100;

/// `addEventProcessor(fn)`'s stored form: a value-transforming callback run
/// over an event and its [`Hint`], returning `None` to drop it. Kept as an
/// `Arc` (rather than `Box`) so a `Scope`, which must stay cheaply `Clone`,
/// can carry its processor list without deep-copying the closures.
pub type EventProcessor = Arc<dyn Fn(Event, &Hint) -> Option<Event> + Send + Sync>;

/// What a scope delegates captures to. Implemented by `Client`; kept as a
/// trait here (rather than importing `crate::client::Client` directly) to
/// avoid a cyclic module dependency, the same way `opentelemetry::Context`
/// stays decoupled from any particular SDK by dealing only in trait
/// objects.
pub trait EventSink: Send + Sync {
    fn capture_event(&self, event: Event, scope: &Scope) -> String;
    fn warn_no_client(&self, what: &str);
}

/// A context update passed to `Scope::update`: either another scope to
/// copy from, or a plain partial set of fields.
pub enum CaptureContext {
    Scope(Scope),
    Partial(PartialContext),
}

#[derive(Default)]
pub struct PartialContext {
    pub tags: Attributes,
    pub extra: Attributes,
    pub contexts: Attributes,
    pub user: Option<User>,
    pub level: Option<Level>,
    pub fingerprint: Option<Vec<String>>,
    pub propagation_context: Option<PropagationContext>,
}

#[derive(Clone)]
pub struct Scope {
    breadcrumbs: VecDeque<tracecore_types::Breadcrumb>,
    breadcrumb_cap: usize,
    user: User,
    tags: Attributes,
    extra: Attributes,
    contexts: Attributes,
    level: Option<Level>,
    transaction_name: Option<String>,
    fingerprint: Vec<String>,
    propagation_context: PropagationContext,
    attached_span: Option<BoxedSpan>,
    session: Option<Session>,
    client: Option<Weak<dyn EventSink>>,
    last_event_id: Option<String>,
    sdk_processing_metadata: Attributes,
    dispatching: bool,
    event_processors: Vec<EventProcessor>,
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            breadcrumbs: VecDeque::new(),
            breadcrumb_cap: DEFAULT_BREADCRUMB_CAP,
            user: User::default(),
            tags: Attributes::new(),
            extra: Attributes::new(),
            contexts: Attributes::new(),
            level: None,
            transaction_name: None,
            fingerprint: Vec::new(),
            propagation_context: PropagationContext::new(),
            attached_span: None,
            session: None,
            client: None,
            last_event_id: None,
            sdk_processing_metadata: Attributes::new(),
            dispatching: false,
            event_processors: Vec::new(),
        }
    }

    pub fn set_user(&mut self, user: User) {
        self.user = user;
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn set_tags(&mut self, tags: Attributes) {
        for (k, v) in tags.iter() {
            self.tags.insert(k.clone(), v.clone());
        }
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(key.into(), value.into());
    }

    pub fn set_extras(&mut self, extras: Attributes) {
        for (k, v) in extras.iter() {
            self.extra.insert(k.clone(), v.clone());
        }
    }

    /// `setContext(key, obj|null)`: `None` removes the keyed context.
    pub fn set_context(&mut self, key: impl Into<String>, value: Option<Value>) {
        let key = key.into();
        match value {
            Some(v) => {
                self.contexts.insert(key, v);
            }
            None => {
                self.contexts.remove(&key);
            }
        }
    }

    pub fn set_level(&mut self, level: Option<Level>) {
        self.level = level;
    }

    pub fn set_transaction_name(&mut self, name: Option<String>) {
        self.transaction_name = name;
    }

    pub fn transaction_name(&self) -> Option<&str> {
        self.transaction_name.as_deref()
    }

    pub fn set_fingerprint(&mut self, fingerprint: Vec<String>) {
        self.fingerprint = fingerprint;
    }

    pub fn set_session(&mut self, session: Option<Session>) {
        self.session = session;
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub fn set_propagation_context(&mut self, ctx: PropagationContext) {
        self.propagation_context = ctx;
    }

    pub fn propagation_context(&self) -> &PropagationContext {
        &self.propagation_context
    }

    pub fn set_client(&mut self, client: Option<Weak<dyn EventSink>>) {
        self.client = client;
    }

    pub fn set_last_event_id(&mut self, id: Option<String>) {
        self.last_event_id = id;
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    pub fn set_sdk_processing_metadata(&mut self, merge: Attributes) {
        for (k, v) in merge.iter() {
            self.sdk_processing_metadata.insert(k.clone(), v.clone());
        }
    }

    pub fn set_attached_span(&mut self, span: Option<BoxedSpan>) {
        self.attached_span = span;
    }

    pub fn attached_span(&self) -> Option<&BoxedSpan> {
        self.attached_span.as_ref()
    }

    /// Adds a breadcrumb, truncating from the front if the cap is
    /// exceeded. A cap of zero or less means "do not record"
    /// (spec.md §4.2).
    pub fn add_breadcrumb(&mut self, breadcrumb: tracecore_types::Breadcrumb, max: Option<usize>) {
        let cap = max.unwrap_or(self.breadcrumb_cap);
        if cap == 0 {
            return;
        }
        self.breadcrumbs.push_back(breadcrumb);
        while self.breadcrumbs.len() > cap {
            self.breadcrumbs.pop_front();
        }
    }

    pub fn clear_breadcrumbs(&mut self) {
        self.breadcrumbs.clear();
    }

    pub fn breadcrumbs(&self) -> impl Iterator<Item = &tracecore_types::Breadcrumb> {
        self.breadcrumbs.iter()
    }

    /// `addEventProcessor(fn)` (spec.md §4.2): appends to this scope's
    /// ordered processor list. Run in registration order, global scope
    /// before isolation scope before current scope, by the client's event
    /// pipeline (spec.md §4.4 step 5).
    pub fn add_event_processor(
        &mut self,
        processor: impl Fn(Event, &Hint) -> Option<Event> + Send + Sync + 'static,
    ) {
        self.event_processors.push(Arc::new(processor));
    }

    pub fn event_processors(&self) -> &[EventProcessor] {
        &self.event_processors
    }

    /// `update(captureContext)`: merges tags/extra/contexts (shallow),
    /// replaces user when non-empty, replaces level/fingerprint/
    /// propagationContext when provided (spec.md §4.2).
    pub fn update(&mut self, ctx: CaptureContext) {
        match ctx {
            CaptureContext::Scope(other) => {
                self.merge_shallow(&other.tags, &other.extra, &other.contexts);
                if !other.user.is_empty() {
                    self.user = other.user;
                }
                if other.level.is_some() {
                    self.level = other.level;
                }
                if !other.fingerprint.is_empty() {
                    self.fingerprint = other.fingerprint;
                }
                self.propagation_context = other.propagation_context;
            }
            CaptureContext::Partial(partial) => {
                self.merge_shallow(&partial.tags, &partial.extra, &partial.contexts);
                if let Some(user) = partial.user {
                    if !user.is_empty() {
                        self.user = user;
                    }
                }
                if partial.level.is_some() {
                    self.level = partial.level;
                }
                if let Some(fingerprint) = partial.fingerprint {
                    self.fingerprint = fingerprint;
                }
                if let Some(ctx) = partial.propagation_context {
                    self.propagation_context = ctx;
                }
            }
        }
    }

    fn merge_shallow(&mut self, tags: &Attributes, extra: &Attributes, contexts: &Attributes) {
        for (k, v) in tags.iter() {
            self.tags.insert(k.clone(), v.clone());
        }
        for (k, v) in extra.iter() {
            self.extra.insert(k.clone(), v.clone());
        }
        for (k, v) in contexts.iter() {
            self.contexts.insert(k.clone(), v.clone());
        }
    }

    /// Resets all enrichment fields but preserves the attached client
    /// (spec.md §4.2).
    pub fn clear(&mut self) {
        let client = self.client.take();
        *self = Scope::new();
        self.client = client;
    }

    /// A structural snapshot used by the client's prepare-event pipeline
    /// (spec.md §4.2, `getScopeData`).
    pub fn scope_data(&self) -> ScopeData {
        ScopeData {
            breadcrumbs: self.breadcrumbs.iter().cloned().collect(),
            user: self.user.clone(),
            tags: self.tags.clone(),
            extra: self.extra.clone(),
            contexts: self.contexts.clone(),
            level: self.level,
            fingerprint: self.fingerprint.clone(),
            propagation_context: self.propagation_context.clone(),
            sdk_processing_metadata: self.sdk_processing_metadata.clone(),
            event_processors: self.event_processors.clone(),
        }
    }

    fn capture(&mut self, mut event: Event, event_id_hint: Option<String>) -> String {
        let event_id = event_id_hint.unwrap_or_else(|| event.event_id.clone());
        event.event_id = event_id.clone();
        self.last_event_id = Some(event_id.clone());

        match self.client.as_ref().and_then(Weak::upgrade) {
            Some(client) => {
                client.capture_event(event, self);
            }
            None => {
                tracecore_types::tc_warn!(name: "scope.no_client", event_id = event_id.as_str());
            }
        }
        event_id
    }

    pub fn capture_event(&mut self, event: Event, event_id_hint: Option<String>) -> String {
        self.capture(event, event_id_hint)
    }

    pub fn capture_message(
        &mut self,
        message: impl Into<String>,
        level: Level,
        event_id_hint: Option<String>,
    ) -> String {
        let mut event = Event::new_error();
        event.message = Some(message.into());
        event.level = Some(level);
        self.capture(event, event_id_hint)
    }

    pub fn capture_exception(
        &mut self,
        exception: tracecore_types::Exception,
        event_id_hint: Option<String>,
    ) -> String {
        let mut event = Event::new_error();
        event.exception_values.push(exception);
        self.capture(event, event_id_hint)
    }

    pub fn dispatching(&self) -> bool {
        self.dispatching
    }

    /// Re-entrancy guard for listener notification: a listener that
    /// mutates the scope during dispatch does not trigger nested dispatch
    /// (spec.md §4.2).
    pub fn with_dispatch_guard(&mut self, f: impl FnOnce(&mut Scope)) {
        if self.dispatching {
            return;
        }
        self.dispatching = true;
        f(self);
        self.dispatching = false;
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::new()
    }
}

/// The structural snapshot returned by `Scope::scope_data`.
pub struct ScopeData {
    pub breadcrumbs: Vec<tracecore_types::Breadcrumb>,
    pub user: User,
    pub tags: Attributes,
    pub extra: Attributes,
    pub contexts: Attributes,
    pub level: Option<Level>,
    pub fingerprint: Vec<String>,
    pub propagation_context: PropagationContext,
    pub sdk_processing_metadata: Attributes,
    pub event_processors: Vec<EventProcessor>,
}

pub fn downgrade_sink(sink: &Arc<dyn EventSink>) -> Weak<dyn EventSink> {
    Arc::downgrade(sink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breadcrumb_cap_truncates_from_front() {
        let mut scope = Scope::new();
        for i in 0..5 {
            scope.add_breadcrumb(
                tracecore_types::Breadcrumb {
                    timestamp: format!("t{i}"),
                    category: None,
                    message: Some(i.to_string()),
                    level: None,
                    data: Attributes::new(),
                },
                Some(3),
            );
        }
        let messages: Vec<_> = scope
            .breadcrumbs()
            .map(|b| b.message.clone().unwrap())
            .collect();
        assert_eq!(messages, vec!["2", "3", "4"]);
    }

    #[test]
    fn zero_cap_records_nothing() {
        let mut scope = Scope::new();
        scope.add_breadcrumb(
            tracecore_types::Breadcrumb {
                timestamp: "t".into(),
                category: None,
                message: Some("x".into()),
                level: None,
                data: Attributes::new(),
            },
            Some(0),
        );
        assert_eq!(scope.breadcrumbs().count(), 0);
    }

    #[test]
    fn clear_preserves_client_but_resets_enrichment() {
        let mut scope = Scope::new();
        scope.set_tag("env", "prod");
        scope.set_transaction_name(Some("GET /".into()));
        scope.clear();
        assert_eq!(scope.transaction_name(), None);
        assert!(scope.tags.is_empty());
    }

    #[test]
    fn update_from_partial_merges_shallow_and_replaces_user() {
        let mut scope = Scope::new();
        scope.set_tag("a", "1");
        let mut partial = PartialContext::default();
        partial.tags.insert("b".into(), Value::from("2"));
        partial.user = Some(User {
            id: Some("u1".into()),
            ..Default::default()
        });
        scope.update(CaptureContext::Partial(partial));
        assert_eq!(scope.tags.get("a").unwrap().as_str(), Some("1"));
        assert_eq!(scope.tags.get("b").unwrap().as_str(), Some("2"));
        assert_eq!(scope.user().id.as_deref(), Some("u1"));
    }

    #[test]
    fn set_context_none_removes_key() {
        let mut scope = Scope::new();
        scope.set_context("device", Some(Value::from("phone")));
        assert!(scope.contexts.get("device").is_some());
        scope.set_context("device", None);
        assert!(scope.contexts.get("device").is_none());
    }

    #[test]
    fn dispatch_guard_prevents_nested_dispatch() {
        let mut scope = Scope::new();
        let mut nested_ran = false;
        scope.with_dispatch_guard(|inner| {
            inner.with_dispatch_guard(|_| {
                nested_ran = true;
            });
        });
        assert!(!nested_ran);
    }

    #[test]
    fn event_processors_run_in_registration_order() {
        let mut scope = Scope::new();
        scope.add_event_processor(|mut event, _hint| {
            event.merge_tag("first", "ran");
            Some(event)
        });
        scope.add_event_processor(|mut event, _hint| {
            event.merge_tag("second", "ran");
            Some(event)
        });
        let data = scope.scope_data();
        assert_eq!(data.event_processors.len(), 2);
        let mut event = Event::new_error();
        for processor in data.event_processors.iter() {
            event = processor(event, &Hint::default()).unwrap();
        }
        assert_eq!(event.tags.get("first").unwrap().as_str(), Some("ran"));
        assert_eq!(event.tags.get("second").unwrap().as_str(), Some("ran"));
    }

    #[test]
    fn event_processor_returning_none_is_visible_to_the_caller() {
        let mut scope = Scope::new();
        scope.add_event_processor(|_event, _hint| None);
        let data = scope.scope_data();
        assert!(data.event_processors[0](Event::new_error(), &Hint::default()).is_none());
    }
}
