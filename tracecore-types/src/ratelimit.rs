//! Rate-limit bookkeeping: parses `X-Sentry-Rate-Limits`/`Retry-After`
//! response headers and tracks per-category disable-until deadlines.
//!
//! Grounded on `opentelemetry_sdk::trace::span_limits::SpanLimits` for the
//! "small struct of numeric ceilings with documented defaults" shape, and on
//! the header-parsing style of `opentelemetry-http/src/lib.rs`'s
//! `HeaderExtractor`.

use std::collections::HashMap;

/// An item category, as referenced by rate-limit headers and client reports.
/// `All` stands for the header's empty-category-list wildcard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataCategory {
    All,
    Error,
    Transaction,
    Session,
    Attachment,
    ClientReport,
    Span,
}

impl DataCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            DataCategory::All => "",
            DataCategory::Error => "error",
            DataCategory::Transaction => "transaction",
            DataCategory::Session => "session",
            DataCategory::Attachment => "attachment",
            DataCategory::ClientReport => "internal",
            DataCategory::Span => "span",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "error" => DataCategory::Error,
            "transaction" => DataCategory::Transaction,
            "session" => DataCategory::Session,
            "attachment" => DataCategory::Attachment,
            "internal" => DataCategory::ClientReport,
            "span" => DataCategory::Span,
            _ => return None,
        })
    }
}

/// Per-category "disabled until" deadlines, expressed in seconds-from-now at
/// parse time rather than as absolute timestamps, since this crate has no
/// system clock dependency of its own; callers add this to their own `now`.
#[derive(Clone, Debug, Default)]
pub struct RateLimits {
    until: HashMap<DataCategory, f64>,
    until_all: Option<f64>,
}

impl RateLimits {
    pub fn new() -> Self {
        RateLimits::default()
    }

    /// Merges the `X-Sentry-Rate-Limits` header value, which is a
    /// comma-separated list of `RETRY_AFTER:CATEGORIES:SCOPE` entries
    /// (spec.md §4.5). Unknown categories and malformed entries are skipped
    /// rather than failing the whole parse.
    pub fn update_from_header(&mut self, header: &str, seconds_from_now: impl Fn() -> f64) {
        for entry in header.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let mut fields = entry.split(':');
            let retry_after: f64 = match fields.next().and_then(|s| s.trim().parse().ok()) {
                Some(v) => v,
                None => continue,
            };
            let categories = fields.next().unwrap_or("");
            let deadline = seconds_from_now() + retry_after;

            if categories.trim().is_empty() {
                self.until_all = Some(match self.until_all {
                    Some(existing) => existing.max(deadline),
                    None => deadline,
                });
                continue;
            }
            for cat in categories.split(';') {
                if let Some(cat) = DataCategory::parse(cat.trim()) {
                    let slot = self.until.entry(cat).or_insert(f64::NEG_INFINITY);
                    if deadline > *slot {
                        *slot = deadline;
                    }
                }
            }
        }
    }

    /// Merges a bare `Retry-After` header (seconds, applies to all
    /// categories) used as a fallback when `X-Sentry-Rate-Limits` is absent.
    pub fn update_from_retry_after(&mut self, retry_after_secs: f64, now: f64) {
        let deadline = now + retry_after_secs;
        self.until_all = Some(match self.until_all {
            Some(existing) => existing.max(deadline),
            None => deadline,
        });
    }

    /// True when `category` is currently rate-limited at time `now`, per
    /// spec.md's "`now < max(limits[category], limits.all)`" rule.
    pub fn is_rate_limited(&self, category: DataCategory, now: f64) -> bool {
        let cat_deadline = self.until.get(&category).copied().unwrap_or(f64::NEG_INFINITY);
        let all_deadline = self.until_all.unwrap_or(f64::NEG_INFINITY);
        now < cat_deadline.max(all_deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_category_limit() {
        let mut limits = RateLimits::new();
        limits.update_from_header("60:error:key", || 0.0);
        assert!(limits.is_rate_limited(DataCategory::Error, 30.0));
        assert!(!limits.is_rate_limited(DataCategory::Error, 61.0));
        assert!(!limits.is_rate_limited(DataCategory::Transaction, 30.0));
    }

    #[test]
    fn parses_multi_category_limit() {
        let mut limits = RateLimits::new();
        limits.update_from_header("60:error;transaction:key", || 0.0);
        assert!(limits.is_rate_limited(DataCategory::Error, 10.0));
        assert!(limits.is_rate_limited(DataCategory::Transaction, 10.0));
    }

    #[test]
    fn empty_category_applies_to_all() {
        let mut limits = RateLimits::new();
        limits.update_from_header("120::key", || 0.0);
        assert!(limits.is_rate_limited(DataCategory::Span, 100.0));
        assert!(limits.is_rate_limited(DataCategory::Session, 100.0));
    }

    #[test]
    fn retry_after_applies_globally() {
        let mut limits = RateLimits::new();
        limits.update_from_retry_after(30.0, 0.0);
        assert!(limits.is_rate_limited(DataCategory::Error, 10.0));
        assert!(!limits.is_rate_limited(DataCategory::Error, 31.0));
    }

    #[test]
    fn multiple_entries_take_the_max_deadline() {
        let mut limits = RateLimits::new();
        limits.update_from_header("10:error:key, 60:error:key", || 0.0);
        assert!(limits.is_rate_limited(DataCategory::Error, 30.0));
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let mut limits = RateLimits::new();
        limits.update_from_header("not-a-number:error:key", || 0.0);
        assert!(!limits.is_rate_limited(DataCategory::Error, 0.0));
    }
}
