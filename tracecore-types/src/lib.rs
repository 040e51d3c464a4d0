//! Wire-level data model for the tracecore client SDK.
//!
//! This crate holds no behavior beyond parsing, serialization and small
//! invariant-preserving mutators — construction (span context, sampling,
//! scope bookkeeping, envelope assembly and dispatch) lives in
//! `tracecore-sdk`, mirroring the split between `opentelemetry` (types,
//! traits) and `opentelemetry-sdk` (behavior) in the upstream project this
//! workspace is modeled on.

pub mod dsn;
pub mod envelope;
pub mod error;
pub mod event;
pub mod ids;
#[macro_use]
pub mod macros;
pub mod propagation;
pub mod ratelimit;
pub mod session;
pub mod status;
pub mod value;

pub use dsn::Dsn;
pub use error::{Error, Result};
pub use event::{
    Breadcrumb, DedupeKey, Event, Exception, ExceptionMechanism, Hint, Level, Measurement, SdkInfo,
    SdkPackage, SpanPayload, StackFrame, Stacktrace, TransactionData, TransactionInfo, User,
};
pub use envelope::{Envelope, EnvelopeHeaders, EnvelopeItem, ItemHeaders, ItemPayload};
pub use ids::{IdParseError, SpanId, TraceId};
pub use propagation::{Baggage, DynamicSamplingContext, PropagationContext, SentryTraceHeader};
pub use ratelimit::{DataCategory, RateLimits};
pub use session::{AbnormalMechanism, Session, SessionAttributes, SessionStatus};
pub use status::SpanStatus;
pub use value::{Attributes, Value};
