//! Internal diagnostic logging.
//!
//! These macros (`tc_info!`, `tc_warn!`, `tc_debug!`, `tc_error!`) are for use
//! **inside tracecore itself** — the pipeline, the transport, the span
//! engine. They are not meant as a general-purpose logging facade for
//! application code. When the `internal-logs` feature is disabled they
//! compile away to nothing.

/// Logs an informational diagnostic from within tracecore.
#[macro_export]
macro_rules! tc_info {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        { tracing::info!(name: $name, target: env!("CARGO_PKG_NAME"), ""); }
        #[cfg(not(feature = "internal-logs"))]
        { let _ = $name; }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        { tracing::info!(name: $name, target: env!("CARGO_PKG_NAME"), $($key = $value),+, ""); }
        #[cfg(not(feature = "internal-logs"))]
        { let _ = ($name, $($value),+); }
    };
}

/// Logs a warning diagnostic from within tracecore (dropped event, invalid
/// config value, rate-limit applied, etc).
#[macro_export]
macro_rules! tc_warn {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        { tracing::warn!(name: $name, target: env!("CARGO_PKG_NAME"), ""); }
        #[cfg(not(feature = "internal-logs"))]
        { let _ = $name; }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        { tracing::warn!(name: $name, target: env!("CARGO_PKG_NAME"), $($key = $value),+, ""); }
        #[cfg(not(feature = "internal-logs"))]
        { let _ = ($name, $($value),+); }
    };
}

/// Logs a debug diagnostic from within tracecore.
#[macro_export]
macro_rules! tc_debug {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        { tracing::debug!(name: $name, target: env!("CARGO_PKG_NAME"), ""); }
        #[cfg(not(feature = "internal-logs"))]
        { let _ = $name; }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        { tracing::debug!(name: $name, target: env!("CARGO_PKG_NAME"), $($key = $value),+, ""); }
        #[cfg(not(feature = "internal-logs"))]
        { let _ = ($name, $($value),+); }
    };
}

/// Logs an error diagnostic from within tracecore (swallowed hook panic,
/// transport network error, etc). tracecore never panics on behalf of the
/// host application; this is the replacement for that.
#[macro_export]
macro_rules! tc_error {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        { tracing::error!(name: $name, target: env!("CARGO_PKG_NAME"), ""); }
        #[cfg(not(feature = "internal-logs"))]
        { let _ = $name; }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        { tracing::error!(name: $name, target: env!("CARGO_PKG_NAME"), $($key = $value),+, ""); }
        #[cfg(not(feature = "internal-logs"))]
        { let _ = ($name, $($value),+); }
    };
}
