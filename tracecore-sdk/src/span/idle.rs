//! Idle-span lifecycle: a root span with auto-finish semantics driven by
//! three wall-clock deadlines (spec.md §4.3).
//!
//! Deadlines are modeled as explicit seconds-since-epoch values checked by
//! `poll`, rather than scheduled OS timers — this crate has no bundled
//! async runtime (the host may be a browser event loop or a server
//! runtime), matching `opentelemetry_sdk`'s own avoidance of runtime-coupled
//! timers in favor of an explicitly driven `BatchSpanProcessor` tick
//! (`opentelemetry-sdk/src/trace/span_processor.rs`).

use super::{EndReason, ObjectSafeSpan, Span};

#[derive(Clone, Copy, Debug)]
pub struct IdleSpanConfig {
    pub idle_timeout_secs: f64,
    pub final_timeout_secs: f64,
    pub child_span_timeout_secs: f64,
    pub disable_auto_finish: bool,
}

impl Default for IdleSpanConfig {
    fn default() -> Self {
        IdleSpanConfig {
            idle_timeout_secs: 1.0,
            final_timeout_secs: 30.0,
            child_span_timeout_secs: 15.0,
            disable_auto_finish: false,
        }
    }
}

/// Timer bookkeeping for one idle span. `poll(now)` is the host's
/// responsibility to call periodically (e.g. from its own event loop);
/// it returns the reason to end the span, if any deadline has fired.
pub struct IdleSpanTimers {
    config: IdleSpanConfig,
    started_at: f64,
    final_deadline: f64,
    idle_deadline: Option<f64>,
    child_span_deadline: Option<f64>,
    active_children: u32,
    auto_finish_enabled: bool,
    discarded_children: u32,
}

impl IdleSpanTimers {
    pub fn new(started_at: f64, config: IdleSpanConfig) -> Self {
        let auto_finish_enabled = !config.disable_auto_finish;
        let mut timers = IdleSpanTimers {
            config,
            started_at,
            final_deadline: started_at + config.final_timeout_secs,
            idle_deadline: None,
            child_span_deadline: None,
            active_children: 0,
            auto_finish_enabled,
            discarded_children: 0,
        };
        if auto_finish_enabled {
            timers.idle_deadline = Some(started_at + config.idle_timeout_secs);
        }
        timers
    }

    /// The client's `idleSpanEnableAutoFinish` hook target reaches this:
    /// arms the idle/child-span timers that were suppressed at creation
    /// (spec.md §4.3, `disableAutoFinish`).
    pub fn enable_auto_finish(&mut self, now: f64) {
        self.auto_finish_enabled = true;
        if self.active_children == 0 {
            self.idle_deadline = Some(now + self.config.idle_timeout_secs);
        }
    }

    /// Call when a child span starts: cancels the idle timer, (re)arms the
    /// child-span timer.
    pub fn on_child_start(&mut self, now: f64) {
        self.active_children += 1;
        self.idle_deadline = None;
        if self.auto_finish_enabled {
            self.child_span_deadline = Some(now + self.config.child_span_timeout_secs);
        }
    }

    /// Call when a child span ends: on the last child, restarts the idle
    /// timer relative to that child's end timestamp.
    pub fn on_child_end(&mut self, child_end: f64) {
        self.active_children = self.active_children.saturating_sub(1);
        if self.active_children == 0 && self.auto_finish_enabled {
            self.idle_deadline = Some(child_end + self.config.idle_timeout_secs);
            self.child_span_deadline = None;
        } else if self.auto_finish_enabled {
            self.child_span_deadline = Some(child_end + self.config.child_span_timeout_secs);
        }
    }

    /// Checks all three deadlines against `now`, returning the reason the
    /// span should end if any has fired. Callers should stop polling once
    /// a reason is returned.
    pub fn poll(&self, now: f64) -> Option<EndReason> {
        if now >= self.final_deadline {
            return Some(EndReason::FinalTimeout);
        }
        if let Some(deadline) = self.child_span_deadline {
            if now >= deadline {
                return Some(EndReason::HeartbeatFailed);
            }
        }
        if let Some(deadline) = self.idle_deadline {
            if self.active_children == 0 && now >= deadline {
                return Some(EndReason::IdleTimeout);
            }
        }
        None
    }

    /// The reported end time per spec.md §4.3's formula:
    /// `min(start + finalTimeout, max(start, min(observedEnd, latestChildEnd)))`.
    pub fn clamp_end_time(&self, observed_end: f64, latest_child_end: Option<f64>) -> f64 {
        let inner = match latest_child_end {
            Some(child_end) => observed_end.min(child_end),
            None => observed_end,
        };
        let inner = inner.max(self.started_at);
        inner.min(self.started_at + self.config.final_timeout_secs)
    }

    /// A child that started after the idle span's effective end, or that is
    /// still running past `finalTimeout + idleTimeout` from its own start,
    /// is detached rather than force-ended; increments the discard counter
    /// that becomes the `sentry.idle_span_discarded_spans` attribute.
    pub fn should_discard_child(&self, child_start: f64, effective_end: f64) -> bool {
        let started_after_end = child_start > effective_end;
        let overran = child_start
            + self.config.final_timeout_secs
            + self.config.idle_timeout_secs
            < effective_end;
        started_after_end || overran
    }

    pub fn record_discard(&mut self) {
        self.discarded_children += 1;
    }

    pub fn discarded_count(&self) -> u32 {
        self.discarded_children
    }
}

/// Force-ends every child still recording with status `cancelled`, per the
/// idle span's end contract.
pub fn force_end_remaining_children(children: &[Span], end_time: f64) {
    for child in children {
        if child.is_recording() {
            child.with_data_mut(|d| {
                d.status.update(tracecore_types::SpanStatus::Error {
                    message: "cancelled".into(),
                });
            });
            child.end(Some(end_time), EndReason::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timer_fires_when_no_children_and_timeout_elapsed() {
        let timers = IdleSpanTimers::new(0.0, IdleSpanConfig::default());
        assert_eq!(timers.poll(1.0), Some(EndReason::IdleTimeout));
    }

    #[test]
    fn idle_timer_is_cancelled_while_children_active() {
        let mut timers = IdleSpanTimers::new(0.0, IdleSpanConfig::default());
        timers.on_child_start(0.1);
        assert_eq!(timers.poll(5.0), None);
    }

    #[test]
    fn child_span_timeout_fires_without_activity() {
        let mut timers = IdleSpanTimers::new(0.0, IdleSpanConfig::default());
        timers.on_child_start(0.0);
        assert_eq!(timers.poll(15.0), Some(EndReason::HeartbeatFailed));
    }

    #[test]
    fn final_timeout_overrides_everything() {
        let config = IdleSpanConfig {
            final_timeout_secs: 5.0,
            ..IdleSpanConfig::default()
        };
        let mut timers = IdleSpanTimers::new(0.0, config);
        timers.on_child_start(0.0);
        assert_eq!(timers.poll(5.0), Some(EndReason::FinalTimeout));
    }

    #[test]
    fn disabled_auto_finish_suppresses_idle_timer_until_enabled() {
        let config = IdleSpanConfig {
            disable_auto_finish: true,
            ..IdleSpanConfig::default()
        };
        let mut timers = IdleSpanTimers::new(0.0, config);
        assert_eq!(timers.poll(100.0), None);
        timers.enable_auto_finish(100.0);
        assert_eq!(timers.poll(100.5), None);
        assert_eq!(timers.poll(101.5), Some(EndReason::IdleTimeout));
    }

    #[test]
    fn clamp_end_time_never_exceeds_final_timeout() {
        let timers = IdleSpanTimers::new(0.0, IdleSpanConfig::default());
        assert_eq!(timers.clamp_end_time(1000.0, None), 30.0);
    }

    #[test]
    fn clamp_end_time_uses_earliest_of_observed_and_latest_child() {
        let timers = IdleSpanTimers::new(0.0, IdleSpanConfig::default());
        assert_eq!(timers.clamp_end_time(5.0, Some(3.0)), 3.0);
    }

    #[test]
    fn children_starting_after_effective_end_are_discarded() {
        let timers = IdleSpanTimers::new(0.0, IdleSpanConfig::default());
        assert!(timers.should_discard_child(10.0, 5.0));
        assert!(!timers.should_discard_child(3.0, 5.0));
    }
}
