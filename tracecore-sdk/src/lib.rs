//! `tracecore-sdk`: the span engine, scope/async-context propagation, and
//! event pipeline behind the tracecore client SDK.
//!
//! Mirrors the `opentelemetry`/`opentelemetry-sdk` split in spirit: this
//! crate holds all behavior, while `tracecore-types` holds the wire-level
//! data model it operates on.

pub mod carrier;
pub mod client;
pub mod config;
pub mod scope;
pub mod span;
#[cfg(any(feature = "testing", test))]
pub mod testing;
pub mod transport;

pub use client::Client;
pub use config::{ClientOptions, ClientOptionsBuilder, Pattern};
pub use scope::{EventProcessor, EventSink, Scope, ScopeData};
pub use span::{
    BoxedSpan, EndReason, NoopSpan, ObjectSafeSpan, Span, SpanData, SpanLimits, SpanOrigin, SpanSink,
};
pub use transport::{DropReason, HttpRequest, HttpResponse, HttpSend, Transport, TransportError};
