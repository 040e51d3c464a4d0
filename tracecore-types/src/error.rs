//! Crate-wide error type.
//!
//! Shaped after `opentelemetry_sdk::error::OTelSdkError` — a small,
//! non-exhaustive set of variants meant for logging, not for programmatic
//! branching by callers (see `opentelemetry-sdk/src/error.rs`).

use thiserror::Error;

/// Errors surfaced by the data-model layer: DSN parsing and rate-limit
/// header parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid dsn: {0}")]
    InvalidDsn(String),

    #[error("invalid rate limit header: {0}")]
    InvalidRateLimitHeader(String),

    #[error("sample rate must be in [0, 1], got {0}")]
    InvalidSampleRate(f64),

    #[error("envelope serialization failed: {0}")]
    Envelope(String),
}

pub type Result<T> = std::result::Result<T, Error>;
