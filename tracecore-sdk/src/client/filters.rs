//! The inbound-filter integration (spec.md §4.4): drops events matching
//! `ignoreErrors`/`ignoreTransactions`/`allowUrls`/`denyUrls`, internal
//! `SentryError`s, or events judged "useless" (no message, no top-level
//! exception type/value, no stacktrace).

use tracecore_types::Event;

use crate::config::ClientOptions;

pub fn should_filter(event: &Event, options: &ClientOptions) -> bool {
    if options.disable_error_defaults {
        return false;
    }
    if options.ignore_internal && is_internal_sentry_error(event) {
        return true;
    }
    if matches_ignore_errors(event, options) {
        return true;
    }
    if let Some(tx) = event.transaction.as_ref() {
        if options
            .ignore_transactions
            .iter()
            .any(|p| p.matches(&tx.transaction))
        {
            return true;
        }
    }
    if matches_url_filters(event, options) {
        return true;
    }
    if !event.is_transaction() && is_useless(event) {
        return true;
    }
    false
}

fn is_internal_sentry_error(event: &Event) -> bool {
    event
        .exception_values
        .first()
        .and_then(|e| e.exception_type.as_deref())
        == Some("SentryError")
}

fn matches_ignore_errors(event: &Event, options: &ClientOptions) -> bool {
    if options.ignore_errors.is_empty() {
        return false;
    }
    let message = event.message.as_deref().unwrap_or_default();
    let exception_value = event
        .exception_values
        .first()
        .and_then(|e| e.value.as_deref())
        .unwrap_or_default();
    options
        .ignore_errors
        .iter()
        .any(|p| p.matches(message) || p.matches(exception_value))
}

fn matches_url_filters(event: &Event, options: &ClientOptions) -> bool {
    let frame_url = event
        .exception_values
        .first()
        .and_then(|e| e.stacktrace.as_ref())
        .and_then(|s| s.frames.last())
        .and_then(|f| f.filename.as_deref());

    let Some(url) = frame_url else {
        return false;
    };

    if options.deny_urls.iter().any(|p| p.matches(url)) {
        return true;
    }
    if !options.allow_urls.is_empty() && !options.allow_urls.iter().any(|p| p.matches(url)) {
        return true;
    }
    false
}

/// An event with no message, no first-exception type/value, and no
/// stacktrace carries nothing actionable (spec.md §4.4).
fn is_useless(event: &Event) -> bool {
    if event.message.is_some() {
        return false;
    }
    match event.exception_values.first() {
        Some(e) => e.exception_type.is_none() && e.value.is_none() && e.stacktrace.is_none(),
        None => true,
    }
}
