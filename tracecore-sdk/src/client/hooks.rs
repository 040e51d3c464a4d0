//! Hook registry for client-lifecycle callbacks (spec.md §4.4), modeled on
//! `opentelemetry_sdk`'s `SpanProcessor` chain: listeners are plain
//! `Fn`-trait objects registered under a named hook and invoked in
//! registration order. A callback that panics or returns an error does not
//! stop the others; it is logged and swallowed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracecore_types::tc_warn;

/// The fixed set of hook names the client emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Hook {
    SpanStart,
    SpanEnd,
    IdleSpanEnableAutoFinish,
    BeforeEnvelope,
    BeforeSendEvent,
    PreprocessEvent,
    AfterSendEvent,
    BeforeAddBreadcrumb,
    CreateDsc,
    BeforeSendFeedback,
    BeforeSampling,
    StartPageLoadSpan,
    StartNavigationSpan,
    Flush,
    Close,
    ApplyFrameMetadata,
}

impl Hook {
    fn as_str(self) -> &'static str {
        match self {
            Hook::SpanStart => "spanStart",
            Hook::SpanEnd => "spanEnd",
            Hook::IdleSpanEnableAutoFinish => "idleSpanEnableAutoFinish",
            Hook::BeforeEnvelope => "beforeEnvelope",
            Hook::BeforeSendEvent => "beforeSendEvent",
            Hook::PreprocessEvent => "preprocessEvent",
            Hook::AfterSendEvent => "afterSendEvent",
            Hook::BeforeAddBreadcrumb => "beforeAddBreadcrumb",
            Hook::CreateDsc => "createDsc",
            Hook::BeforeSendFeedback => "beforeSendFeedback",
            Hook::BeforeSampling => "beforeSampling",
            Hook::StartPageLoadSpan => "startPageLoadSpan",
            Hook::StartNavigationSpan => "startNavigationSpan",
            Hook::Flush => "flush",
            Hook::Close => "close",
            Hook::ApplyFrameMetadata => "applyFrameMetadata",
        }
    }
}

pub type Callback = Arc<dyn Fn(&dyn std::any::Any) + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    listeners: Mutex<HashMap<Hook, Vec<(u64, Callback)>>>,
    next_id: Mutex<u64>,
}

/// Opaque token returned by [`HookRegistry::on`]; drop it or pass it to
/// nothing — call the returned closure to unregister.
pub struct Unregister<'a> {
    registry: &'a HookRegistry,
    hook: Hook,
    id: u64,
}

impl<'a> Unregister<'a> {
    pub fn unregister(self) {
        let mut listeners = self.registry.listeners.lock().expect("hooks lock poisoned");
        if let Some(callbacks) = listeners.get_mut(&self.hook) {
            callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        HookRegistry {
            listeners: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        }
    }

    pub fn on(&self, hook: Hook, callback: Callback) -> Unregister<'_> {
        let id = {
            let mut next_id = self.next_id.lock().expect("hooks id lock poisoned");
            let id = *next_id;
            *next_id += 1;
            id
        };
        let mut listeners = self.listeners.lock().expect("hooks lock poisoned");
        listeners.entry(hook).or_default().push((id, callback));
        Unregister {
            registry: self,
            hook,
            id,
        }
    }

    /// Invokes every listener registered for `hook`, in registration order.
    /// Listeners never see each other's return values; `emit` is for
    /// side-effecting notifications, not value-transforming hooks.
    pub fn emit(&self, hook: Hook, payload: &dyn std::any::Any) {
        let callbacks = {
            let listeners = self.listeners.lock().expect("hooks lock poisoned");
            listeners.get(&hook).cloned().unwrap_or_default()
        };
        for (_, callback) in callbacks {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(payload);
            }));
            if result.is_err() {
                tc_warn!(name: "hooks.callback_panicked", hook = hook.as_str());
            }
        }
    }

    pub fn listener_count(&self, hook: Hook) -> usize {
        let listeners = self.listeners.lock().expect("hooks lock poisoned");
        listeners.get(&hook).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listeners_fire_in_registration_order() {
        let registry = HookRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = order.clone();
        registry.on(
            Hook::SpanStart,
            Arc::new(move |_: &dyn std::any::Any| order_a.lock().unwrap().push(1)),
        );
        let order_b = order.clone();
        registry.on(
            Hook::SpanStart,
            Arc::new(move |_: &dyn std::any::Any| order_b.lock().unwrap().push(2)),
        );

        registry.emit(Hook::SpanStart, &());
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unregister_removes_the_listener() {
        let registry = HookRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let token = registry.on(
            Hook::Flush,
            Arc::new(move |_: &dyn std::any::Any| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        registry.emit(Hook::Flush, &());
        token.unregister();
        registry.emit(Hook::Flush, &());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_stop_later_listeners() {
        let registry = HookRegistry::new();
        registry.on(
            Hook::Close,
            Arc::new(|_: &dyn std::any::Any| panic!("boom")),
        );
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        registry.on(
            Hook::Close,
            Arc::new(move |_: &dyn std::any::Any| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        registry.emit(Hook::Close, &());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unrelated_hooks_do_not_fire_each_other() {
        let registry = HookRegistry::new();
        registry.on(Hook::SpanStart, Arc::new(|_: &dyn std::any::Any| {
            panic!("should not fire");
        }));
        registry.emit(Hook::SpanEnd, &());
        assert_eq!(registry.listener_count(Hook::SpanEnd), 0);
    }
}
