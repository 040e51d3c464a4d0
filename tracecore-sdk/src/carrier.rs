//! The process-wide carrier and the pluggable async-context strategy.
//!
//! Grounded on `opentelemetry::global::trace` (`opentelemetry/src/global/trace.rs`):
//! a `once_cell`-backed `RwLock<GLOBAL_...>` singleton that late-bound code
//! installs into once, plus `opentelemetry::Context`/`ContextStack`
//! (`opentelemetry/src/context/mod.rs`) for the thread-local stack-of-scopes
//! default strategy below.

use std::cell::RefCell;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::scope::Scope;
use crate::span::{BoxedSpan, NoopSpan};

/// Per-SDK-version carrier state: top and isolation scopes, the currently
/// active session, and the last captured event id. Keyed by SDK version
/// string on the host global so that two copies of this crate coexisting in
/// one process (e.g. via two dependency versions) never trample each
/// other's state (spec.md §4.1).
pub struct Carrier {
    pub global_scope: RwLock<Scope>,
}

impl Carrier {
    fn new() -> Self {
        Carrier {
            global_scope: RwLock::new(Scope::new()),
        }
    }
}

struct VersionedCarrier {
    version: &'static str,
    carrier: Carrier,
}

static MAIN_CARRIER: Lazy<RwLock<Vec<VersionedCarrier>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// The SDK version this build of the crate publishes itself under. A second
/// copy of `tracecore-sdk` compiled at a different version gets its own
/// sub-carrier rather than colliding with this one.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns (initializing if necessary) this process's carrier for the given
/// SDK version. Never returns null/None: the first call for a version
/// lazily creates its sub-carrier (spec.md §4.1, "getMainCarrier never
/// returns null").
pub fn main_carrier(version: &'static str) -> Arc<CarrierHandle> {
    {
        let carriers = MAIN_CARRIER.read().expect("main carrier lock poisoned");
        if carriers.iter().any(|c| c.version == version) {
            return Arc::new(CarrierHandle { version });
        }
    }
    let mut carriers = MAIN_CARRIER.write().expect("main carrier lock poisoned");
    if !carriers.iter().any(|c| c.version == version) {
        carriers.push(VersionedCarrier {
            version,
            carrier: Carrier::new(),
        });
    }
    Arc::new(CarrierHandle { version })
}

/// A handle identifying one version's sub-carrier; operations look the
/// carrier up by version on each call rather than holding the lock guard
/// across calls.
pub struct CarrierHandle {
    version: &'static str,
}

impl CarrierHandle {
    pub fn with_global_scope<R>(&self, f: impl FnOnce(&Scope) -> R) -> R {
        let carriers = MAIN_CARRIER.read().expect("main carrier lock poisoned");
        let entry = carriers
            .iter()
            .find(|c| c.version == self.version)
            .expect("carrier initialized by main_carrier");
        let scope = entry.carrier.global_scope.read().expect("scope lock poisoned");
        f(&scope)
    }

    pub fn with_global_scope_mut<R>(&self, f: impl FnOnce(&mut Scope) -> R) -> R {
        let carriers = MAIN_CARRIER.read().expect("main carrier lock poisoned");
        let entry = carriers
            .iter()
            .find(|c| c.version == self.version)
            .expect("carrier initialized by main_carrier");
        let mut scope = entry.carrier.global_scope.write().expect("scope lock poisoned");
        f(&mut scope)
    }
}

/// The pluggable strategy for propagating the current scope and active span
/// through a task's lifetime (spec.md §4.1). The default implementation
/// below is a thread-local stack; a host platform may install a richer one
/// (e.g. bound to an async-task-local) by replacing `GLOBAL_STRATEGY`.
pub trait AsyncContextStrategy: Send + Sync {
    fn get_current_scope(&self) -> Scope;
    fn get_isolation_scope(&self) -> Scope;
    fn with_scope(&self, f: &mut dyn FnMut(&mut Scope));
    fn with_set_scope(&self, scope: Scope, f: &mut dyn FnMut());
    fn with_active_span(&self, span: Option<BoxedSpan>, f: &mut dyn FnMut());
    fn get_active_span(&self) -> Option<BoxedSpan>;
}

thread_local! {
    static CURRENT_STACK: RefCell<Vec<Scope>> = RefCell::new(vec![Scope::new()]);
    static ISOLATION_STACK: RefCell<Vec<Scope>> = RefCell::new(vec![Scope::new()]);
    static ACTIVE_SPAN_STACK: RefCell<Vec<Option<BoxedSpan>>> = RefCell::new(vec![None]);
}

/// Default stack-based strategy: `withScope` pushes a clone of the current
/// scope, runs the callback, then pops — matching `opentelemetry::Context`'s
/// push-by-position/pop-by-position discipline, which stays correct even
/// when guards are dropped out of order.
#[derive(Default)]
pub struct StackStrategy;

impl AsyncContextStrategy for StackStrategy {
    fn get_current_scope(&self) -> Scope {
        CURRENT_STACK.with(|stack| stack.borrow().last().expect("stack never empty").clone())
    }

    fn get_isolation_scope(&self) -> Scope {
        ISOLATION_STACK.with(|stack| stack.borrow().last().expect("stack never empty").clone())
    }

    fn with_scope(&self, f: &mut dyn FnMut(&mut Scope)) {
        CURRENT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let mut top = stack.last().expect("stack never empty").clone();
            f(&mut top);
            let len = stack.len();
            stack[len - 1] = top;
        });
    }

    fn with_set_scope(&self, scope: Scope, f: &mut dyn FnMut()) {
        CURRENT_STACK.with(|stack| stack.borrow_mut().push(scope));
        f();
        CURRENT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }

    fn with_active_span(&self, span: Option<BoxedSpan>, f: &mut dyn FnMut()) {
        ACTIVE_SPAN_STACK.with(|stack| stack.borrow_mut().push(span));
        f();
        ACTIVE_SPAN_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }

    fn get_active_span(&self) -> Option<BoxedSpan> {
        ACTIVE_SPAN_STACK.with(|stack| stack.borrow().last().and_then(|s| s.clone()))
    }
}

static GLOBAL_STRATEGY: Lazy<RwLock<Box<dyn AsyncContextStrategy>>> =
    Lazy::new(|| RwLock::new(Box::new(StackStrategy)));

/// Installs a custom async-context strategy. Idempotent in the sense that
/// any call simply replaces the previous strategy; callers are expected to
/// do this once, early (spec.md §4.1: "installing a strategy is idempotent
/// and process-global").
pub fn set_async_context_strategy(strategy: Box<dyn AsyncContextStrategy>) {
    let mut slot = GLOBAL_STRATEGY.write().expect("strategy lock poisoned");
    *slot = strategy;
}

pub fn get_current_scope() -> Scope {
    GLOBAL_STRATEGY.read().expect("strategy lock poisoned").get_current_scope()
}

pub fn get_isolation_scope() -> Scope {
    GLOBAL_STRATEGY.read().expect("strategy lock poisoned").get_isolation_scope()
}

pub fn with_scope(mut f: impl FnMut(&mut Scope)) {
    GLOBAL_STRATEGY.read().expect("strategy lock poisoned").with_scope(&mut f)
}

pub fn with_set_scope(scope: Scope, mut f: impl FnMut()) {
    GLOBAL_STRATEGY.read().expect("strategy lock poisoned").with_set_scope(scope, &mut f)
}

pub fn with_active_span(span: Option<BoxedSpan>, mut f: impl FnMut()) {
    GLOBAL_STRATEGY.read().expect("strategy lock poisoned").with_active_span(span, &mut f)
}

pub fn get_active_span() -> BoxedSpan {
    GLOBAL_STRATEGY
        .read()
        .expect("strategy lock poisoned")
        .get_active_span()
        .unwrap_or_else(|| BoxedSpan::new(NoopSpan::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_carrier_never_panics_and_is_reusable() {
        let a = main_carrier("1.0.0-test-a");
        let b = main_carrier("1.0.0-test-a");
        a.with_global_scope_mut(|scope| scope.set_transaction_name(Some("t".into())));
        assert_eq!(
            b.with_global_scope(|scope| scope.transaction_name().map(|s| s.to_owned())),
            Some("t".into())
        );
    }

    #[test]
    fn versions_do_not_collide() {
        let a = main_carrier("1.0.0-test-b1");
        let b = main_carrier("1.0.0-test-b2");
        a.with_global_scope_mut(|scope| scope.set_transaction_name(Some("a".into())));
        b.with_global_scope_mut(|scope| scope.set_transaction_name(Some("b".into())));
        assert_eq!(
            a.with_global_scope(|scope| scope.transaction_name().map(|s| s.to_owned())),
            Some("a".into())
        );
        assert_eq!(
            b.with_global_scope(|scope| scope.transaction_name().map(|s| s.to_owned())),
            Some("b".into())
        );
    }

    #[test]
    fn with_set_scope_pops_on_exit() {
        let before = get_current_scope();
        let mut pushed = Scope::new();
        pushed.set_transaction_name(Some("inner".into()));
        with_set_scope(pushed, || {
            assert_eq!(
                get_current_scope().transaction_name().map(|s| s.to_owned()),
                Some("inner".into())
            );
        });
        assert_eq!(
            get_current_scope().transaction_name(),
            before.transaction_name()
        );
    }
}
