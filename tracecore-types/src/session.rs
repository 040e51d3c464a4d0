//! Release-health sessions: `{started, status, errors, duration?, attrs}`,
//! per spec.md §4.4's session-tracking behavior.
//!
//! Grounded on `opentelemetry_sdk::trace::span::SpanData` for the shape of a
//! small, serializable record updated in place over its lifetime and then
//! handed to a transport.

use serde::{Deserialize, Serialize};

use crate::ids::new_event_id;

/// `Ok -> (Exited | Crashed | Abnormal)`, a one-way transition enforced by
/// `Session::close`. `Errored` is not a transition target of `close`; it is
/// the status reported for an in-flight session that has recorded at least
/// one error but has not yet been closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Ok,
    Errored,
    Exited,
    Crashed,
    Abnormal,
}

impl SessionStatus {
    fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Exited | SessionStatus::Crashed | SessionStatus::Abnormal)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionAttributes {
    pub release: String,
    pub environment: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Why an `Abnormal` session ended without a normal exit or crash report,
/// e.g. `"anr_foreground"`. Opaque passthrough string, never interpreted.
pub type AbnormalMechanism = String;

/// A release-health session. `started`/`timestamp` are stored as RFC 3339
/// strings rather than a tz-aware clock type, matching the wire format spec.md
/// §6 envelopes carry over HTTP.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub sid: String,
    pub did: Option<String>,
    pub started: String,
    pub status: SessionStatus,
    pub errors: u32,
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub attrs: SessionAttributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abnormal_mechanism: Option<AbnormalMechanism>,
    #[serde(skip)]
    init: bool,
}

impl Session {
    pub fn new(started: impl Into<String>, attrs: SessionAttributes) -> Self {
        Session {
            sid: new_event_id(),
            did: None,
            started: started.into(),
            status: SessionStatus::Ok,
            errors: 0,
            duration: None,
            timestamp: None,
            attrs,
            abnormal_mechanism: None,
            init: true,
        }
    }

    /// The status to report on the wire: an `Ok` session with recorded
    /// errors reports as `Errored` without mutating the stored status, so a
    /// later `close` can still observe the session was never terminal.
    pub fn reported_status(&self) -> SessionStatus {
        if self.status == SessionStatus::Ok && self.errors > 0 {
            SessionStatus::Errored
        } else {
            self.status
        }
    }

    /// Whether this session update must carry the envelope item header's
    /// `init: true` marker (only the very first update of a session does).
    pub fn is_initial_update(&self) -> bool {
        self.init
    }

    pub fn mark_sent(&mut self) {
        self.init = false;
    }

    /// Increments the error count. `reported_status` picks this up as
    /// `Errored` without mutating `status` itself, so a still-open session
    /// remains closable with any terminal status afterwards.
    pub fn record_error(&mut self) {
        self.errors = self.errors.saturating_add(1);
    }

    /// Closes the session with a terminal status. A session already closed
    /// cannot be closed again ("Ok -> terminal" is one-way).
    pub fn close(
        &mut self,
        status: SessionStatus,
        now: impl Into<String>,
        elapsed_secs: f64,
        abnormal_mechanism: Option<AbnormalMechanism>,
    ) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        let now = now.into();
        self.duration = Some(elapsed_secs);
        self.timestamp = Some(now);
        self.abnormal_mechanism = abnormal_mechanism;
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> SessionAttributes {
        SessionAttributes {
            release: "1.0.0".into(),
            environment: Some("production".into()),
            ip_address: None,
            user_agent: None,
        }
    }

    #[test]
    fn new_session_is_ok_and_marked_initial() {
        let session = Session::new("2026-01-01T00:00:00Z", attrs());
        assert_eq!(session.status, SessionStatus::Ok);
        assert!(session.is_initial_update());
    }

    #[test]
    fn mark_sent_clears_initial_flag() {
        let mut session = Session::new("2026-01-01T00:00:00Z", attrs());
        session.mark_sent();
        assert!(!session.is_initial_update());
    }

    #[test]
    fn close_is_one_way() {
        let mut session = Session::new("2026-01-01T00:00:00Z", attrs());
        session.close(SessionStatus::Crashed, "2026-01-01T00:01:00Z", 60.0, None);
        assert_eq!(session.status, SessionStatus::Crashed);
        session.close(SessionStatus::Exited, "2026-01-01T00:02:00Z", 120.0, None);
        assert_eq!(session.status, SessionStatus::Crashed);
        assert_eq!(session.duration, Some(60.0));
    }

    #[test]
    fn record_error_increments_without_closing() {
        let mut session = Session::new("2026-01-01T00:00:00Z", attrs());
        session.record_error();
        session.record_error();
        assert_eq!(session.errors, 2);
        assert_eq!(session.status, SessionStatus::Ok);
        assert_eq!(session.reported_status(), SessionStatus::Errored);
    }

    #[test]
    fn abnormal_close_records_mechanism() {
        let mut session = Session::new("2026-01-01T00:00:00Z", attrs());
        session.close(
            SessionStatus::Abnormal,
            "2026-01-01T00:05:00Z",
            300.0,
            Some("anr_foreground".into()),
        );
        assert_eq!(session.abnormal_mechanism.as_deref(), Some("anr_foreground"));
    }
}
