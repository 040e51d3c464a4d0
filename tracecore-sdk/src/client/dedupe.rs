//! The dedupe integration: drops an event that repeats the most recently
//! captured one by message/fingerprint/stacktrace or
//! exception-type+value/fingerprint/stacktrace (spec.md §4.4).
//!
//! Transactions and replays bypass dedupe entirely; callers should not
//! invoke `should_drop` for those event kinds.

use std::sync::Mutex;

use tracecore_types::{DedupeKey, Event};

/// Holds the identity of the most recently captured (non-transaction)
/// event. A single slot, written by one pipeline task at a time
/// (spec.md §5: "the dedupe integration's previous event is a single slot").
pub struct DedupeIntegration {
    previous: Mutex<Option<DedupeKey>>,
}

impl DedupeIntegration {
    pub fn new() -> Self {
        DedupeIntegration {
            previous: Mutex::new(None),
        }
    }

    /// Returns `true` if `event` should be dropped as a repeat of the
    /// previously captured event; otherwise remembers it as the new
    /// "most recent" and returns `false`.
    pub fn should_drop(&self, event: &Event) -> bool {
        if event.is_transaction() {
            return false;
        }
        let key = event.dedupe_key();
        let mut previous = self.previous.lock().expect("dedupe lock poisoned");
        let is_repeat = previous.as_ref().is_some_and(|prev| is_same_event(prev, &key));
        if !is_repeat {
            *previous = Some(key);
        }
        is_repeat
    }
}

impl Default for DedupeIntegration {
    fn default() -> Self {
        DedupeIntegration::new()
    }
}

fn is_same_event(a: &DedupeKey, b: &DedupeKey) -> bool {
    let same_message = a.message.is_some()
        && a.message == b.message
        && a.fingerprint == b.fingerprint
        && a.stacktrace_frames == b.stacktrace_frames;
    let same_exception = a.exception_type.is_some()
        && a.exception_type == b.exception_type
        && a.exception_value == b.exception_value
        && a.fingerprint == b.fingerprint
        && a.stacktrace_frames == b.stacktrace_frames;
    same_message || same_exception
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracecore_types::Exception;

    fn error_with_message(msg: &str) -> Event {
        let mut event = Event::new_error();
        event.message = Some(msg.to_owned());
        event
    }

    fn error_with_exception(ty: &str, value: &str) -> Event {
        let mut event = Event::new_error();
        event.exception_values.push(Exception {
            exception_type: Some(ty.to_owned()),
            value: Some(value.to_owned()),
            stacktrace: None,
            mechanism: None,
        });
        event
    }

    #[test]
    fn repeated_message_is_dropped() {
        let dedupe = DedupeIntegration::new();
        assert!(!dedupe.should_drop(&error_with_message("boom")));
        assert!(dedupe.should_drop(&error_with_message("boom")));
    }

    #[test]
    fn same_message_with_different_stacktrace_is_not_dropped() {
        let dedupe = DedupeIntegration::new();
        let mut first = error_with_message("boom");
        first.exception_values.push(Exception {
            exception_type: None,
            value: None,
            stacktrace: Some(tracecore_types::Stacktrace {
                frames: vec![tracecore_types::StackFrame {
                    filename: Some("a.rs".into()),
                    function: None,
                    lineno: Some(1),
                    colno: None,
                }],
            }),
            mechanism: None,
        });
        let mut second = error_with_message("boom");
        second.exception_values.push(Exception {
            exception_type: None,
            value: None,
            stacktrace: Some(tracecore_types::Stacktrace {
                frames: vec![tracecore_types::StackFrame {
                    filename: Some("b.rs".into()),
                    function: None,
                    lineno: Some(2),
                    colno: None,
                }],
            }),
            mechanism: None,
        });
        assert!(!dedupe.should_drop(&first));
        assert!(!dedupe.should_drop(&second));
    }

    #[test]
    fn different_message_is_not_dropped() {
        let dedupe = DedupeIntegration::new();
        assert!(!dedupe.should_drop(&error_with_message("boom")));
        assert!(!dedupe.should_drop(&error_with_message("bang")));
    }

    #[test]
    fn repeated_exception_type_and_value_is_dropped() {
        let dedupe = DedupeIntegration::new();
        assert!(!dedupe.should_drop(&error_with_exception("TypeError", "x undefined")));
        assert!(dedupe.should_drop(&error_with_exception("TypeError", "x undefined")));
    }

    #[test]
    fn transactions_bypass_dedupe() {
        let dedupe = DedupeIntegration::new();
        let tx = Event::new_transaction("GET /", 0.0);
        assert!(!dedupe.should_drop(&tx));
        assert!(!dedupe.should_drop(&tx));
    }
}
