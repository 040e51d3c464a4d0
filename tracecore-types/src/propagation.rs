//! Cross-process trace propagation: `PropagationContext`, the Dynamic
//! Sampling Context (DSC), and the `sentry-trace`/`baggage` wire formats.
//!
//! Grounded on `opentelemetry::trace::SpanContext` (the immutable,
//! serializable half of a span, spec.md's `PropagationContext` analog) and
//! `opentelemetry::baggage::Baggage` (`opentelemetry/src/baggage.rs`) for the
//! "preserve unrecognized keys" behavior of `Baggage` below.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::ids::{IdParseError, SpanId, TraceId};

/// `{traceId, spanId, parentSpanId?, sampled?, dsc?}`, generated fresh when a
/// scope has no inherited trace information (spec.md §3).
#[derive(Clone, Debug, PartialEq)]
pub struct PropagationContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub sampled: Option<bool>,
    pub dsc: Option<DynamicSamplingContext>,
}

impl PropagationContext {
    /// A fresh, local propagation context: used when a scope is created with
    /// no parent information to inherit.
    pub fn new() -> Self {
        PropagationContext {
            trace_id: TraceId::new_random(),
            span_id: SpanId::new_random(),
            parent_span_id: None,
            sampled: None,
            dsc: None,
        }
    }

    /// Builds a propagation context from an incoming `sentry-trace` header
    /// value, generating a fresh one if `header` is `None` or unparsable
    /// (spec.md §6, "Trace parent incoming").
    pub fn from_incoming(header: Option<&str>, baggage: Option<&str>) -> Self {
        let mut ctx = match header.and_then(|h| SentryTraceHeader::parse(h).ok()) {
            Some(parsed) => PropagationContext {
                trace_id: parsed.trace_id,
                span_id: SpanId::new_random(),
                parent_span_id: Some(parsed.span_id),
                sampled: parsed.sampled,
                dsc: None,
            },
            None => PropagationContext::new(),
        };
        if let Some(raw) = baggage {
            let bag = Baggage::parse(raw);
            if let Some(dsc) = DynamicSamplingContext::from_baggage(&bag) {
                ctx.dsc = Some(dsc);
            }
        }
        ctx
    }
}

impl Default for PropagationContext {
    fn default() -> Self {
        PropagationContext::new()
    }
}

/// A parsed `sentry-trace` header: `TRACE_ID-SPAN_ID[-FLAG]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SentryTraceHeader {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: Option<bool>,
}

impl SentryTraceHeader {
    pub fn parse(value: &str) -> Result<Self, IdParseError> {
        let mut parts = value.trim().splitn(3, '-');
        let trace_id = parts
            .next()
            .ok_or(IdParseError::InvalidHex)?
            .parse::<TraceId>()?;
        let span_id = parts
            .next()
            .ok_or(IdParseError::InvalidHex)?
            .parse::<SpanId>()?;
        let sampled = match parts.next() {
            Some("1") => Some(true),
            Some("0") => Some(false),
            _ => None,
        };
        Ok(SentryTraceHeader {
            trace_id,
            span_id,
            sampled,
        })
    }
}

impl fmt::Display for SentryTraceHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.trace_id, self.span_id)?;
        match self.sampled {
            Some(true) => write!(f, "-1"),
            Some(false) => write!(f, "-0"),
            None => Ok(()),
        }
    }
}

/// `{trace_id, public_key, environment?, release?, transaction?, sample_rate?,
/// sampled?}`. Frozen onto a root span the moment it is first computed and
/// never recomputed (spec.md §3).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DynamicSamplingContext {
    pub trace_id: Option<String>,
    pub public_key: Option<String>,
    pub environment: Option<String>,
    pub release: Option<String>,
    pub transaction: Option<String>,
    pub sample_rate: Option<String>,
    pub sampled: Option<String>,
}

impl DynamicSamplingContext {
    const SENTRY_PREFIX: &'static str = "sentry-";

    pub fn to_baggage(&self) -> Baggage {
        let mut entries = Vec::new();
        macro_rules! push {
            ($key:literal, $field:expr) => {
                if let Some(v) = &$field {
                    entries.push((format!("{}{}", Self::SENTRY_PREFIX, $key), v.clone()));
                }
            };
        }
        push!("trace_id", self.trace_id);
        push!("public_key", self.public_key);
        push!("environment", self.environment);
        push!("release", self.release);
        push!("transaction", self.transaction);
        push!("sample_rate", self.sample_rate);
        push!("sampled", self.sampled);
        Baggage { entries }
    }

    pub fn from_baggage(baggage: &Baggage) -> Option<Self> {
        let get = |key: &str| -> Option<String> {
            baggage
                .entries
                .iter()
                .find(|(k, _)| k == &format!("{}{}", Self::SENTRY_PREFIX, key))
                .map(|(_, v)| v.clone())
        };
        let dsc = DynamicSamplingContext {
            trace_id: get("trace_id"),
            public_key: get("public_key"),
            environment: get("environment"),
            release: get("release"),
            transaction: get("transaction"),
            sample_rate: get("sample_rate"),
            sampled: get("sampled"),
        };
        if dsc == DynamicSamplingContext::default() {
            None
        } else {
            Some(dsc)
        }
    }
}

/// A W3C `baggage` header: an ordered list of key/value pairs. Unlike a
/// `HashMap`, entries whose keys this SDK doesn't recognize (no `sentry-`
/// prefix) are preserved rather than dropped, matching
/// `opentelemetry::baggage::Baggage`'s behavior of round-tripping third-party
/// baggage members untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Baggage {
    entries: Vec<(String, String)>,
}

impl Baggage {
    pub fn parse(header: &str) -> Self {
        let mut entries = Vec::new();
        for member in header.split(',') {
            let member = member.trim();
            if member.is_empty() {
                continue;
            }
            // A baggage list-member may carry `;property` metadata after the
            // value; we don't model properties, so strip them.
            let member = member.split(';').next().unwrap_or(member);
            if let Some((k, v)) = member.split_once('=') {
                entries.push((
                    k.trim().to_owned(),
                    percent_decode(v.trim()),
                ));
            }
        }
        Baggage { entries }
    }

    pub fn header_value(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, percent_encode(v)))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The subset of entries whose key has no `sentry-` prefix, preserved
    /// for round-tripping to a downstream outbound request.
    pub fn foreign_entries(&self) -> BTreeMap<&str, &str> {
        self.entries
            .iter()
            .filter(|(k, _)| !k.starts_with("sentry-"))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(hex);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl FromStr for Baggage {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Baggage::parse(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentry_trace_round_trips() {
        let header = SentryTraceHeader {
            trace_id: TraceId::new_random(),
            span_id: SpanId::new_random(),
            sampled: Some(true),
        };
        let s = header.to_string();
        let parsed = SentryTraceHeader::parse(&s).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn sentry_trace_without_flag_parses() {
        let parsed = SentryTraceHeader::parse(
            "1234567890abcdef1234567890abcdef-1234567890abcdef",
        )
        .unwrap();
        assert_eq!(parsed.sampled, None);
    }

    #[test]
    fn from_incoming_falls_back_to_fresh_context() {
        let ctx = PropagationContext::from_incoming(None, None);
        assert!(ctx.trace_id.is_valid());
        assert!(ctx.parent_span_id.is_none());
    }

    #[test]
    fn from_incoming_inherits_trace_and_parent() {
        let header = SentryTraceHeader {
            trace_id: TraceId::new_random(),
            span_id: SpanId::new_random(),
            sampled: Some(true),
        };
        let s = header.to_string();
        let ctx = PropagationContext::from_incoming(Some(&s), None);
        assert_eq!(ctx.trace_id, header.trace_id);
        assert_eq!(ctx.parent_span_id, Some(header.span_id));
        assert_eq!(ctx.sampled, Some(true));
    }

    #[test]
    fn baggage_preserves_foreign_keys() {
        let bag = Baggage::parse("sentry-trace_id=abc,other-vendor=xyz");
        assert_eq!(bag.get("sentry-trace_id"), Some("abc"));
        assert_eq!(bag.foreign_entries().get("other-vendor"), Some(&"xyz"));
    }

    #[test]
    fn dsc_to_and_from_baggage_round_trips() {
        let dsc = DynamicSamplingContext {
            trace_id: Some("abc".into()),
            public_key: Some("pub".into()),
            environment: Some("prod".into()),
            release: None,
            transaction: Some("GET /".into()),
            sample_rate: Some("0.5".into()),
            sampled: Some("true".into()),
        };
        let bag = dsc.to_baggage();
        let parsed = DynamicSamplingContext::from_baggage(&bag).unwrap();
        assert_eq!(parsed, dsc);
    }

    #[test]
    fn empty_baggage_yields_no_dsc() {
        let bag = Baggage::parse("other-vendor=xyz");
        assert!(DynamicSamplingContext::from_baggage(&bag).is_none());
    }
}
