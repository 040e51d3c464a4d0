//! HTTP header propagation over `http::HeaderMap`: reading an incoming
//! request's `sentry-trace`/`baggage` headers into a `PropagationContext`,
//! and writing an active span's trace context onto an outbound request.
//!
//! Grounded on `opentelemetry-http`'s `HeaderInjector`/`HeaderExtractor`
//! (`opentelemetry-http/src/lib.rs`): thin wrappers around `http::HeaderMap`
//! translating to/from a header-name/value vocabulary, kept in their own
//! crate so any HTTP client integration can opt in without pulling in a
//! concrete transport.

use http::HeaderMap;

use tracecore_sdk::{BoxedSpan, ClientOptions, ObjectSafeSpan};
use tracecore_types::{PropagationContext, SentryTraceHeader};

pub const SENTRY_TRACE_HEADER: &str = "sentry-trace";
pub const BAGGAGE_HEADER: &str = "baggage";

/// Reads `sentry-trace`/`baggage` off an incoming request into a
/// `PropagationContext` (spec.md §6, "Trace parent incoming").
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl<'a> HeaderExtractor<'a> {
    pub fn propagation_context(&self) -> PropagationContext {
        let trace = self.0.get(SENTRY_TRACE_HEADER).and_then(|v| v.to_str().ok());
        let baggage = self.0.get(BAGGAGE_HEADER).and_then(|v| v.to_str().ok());
        PropagationContext::from_incoming(trace, baggage)
    }
}

/// Writes a span's `sentry-trace`/`baggage` headers onto an outbound
/// request, gated by `tracePropagationTargets` (spec.md §6).
pub struct HeaderInjector<'a>(pub &'a mut HeaderMap);

impl<'a> HeaderInjector<'a> {
    /// No-op unless `target_url` is same-origin or matches a configured
    /// propagation target, and unless `span` is a recording span — a
    /// `NoopSpan` never produces a `sentry-trace` header.
    pub fn inject(
        &mut self,
        span: &BoxedSpan,
        options: &ClientOptions,
        target_url: &str,
        same_origin: bool,
    ) {
        if !options.should_propagate_to(target_url, same_origin) {
            return;
        }
        let Some(recording) = span.downcast_recording() else {
            return;
        };
        let (trace_id, span_id, sampled, dsc) =
            recording.with_data(|d| (d.trace_id, d.span_id, d.sampled, d.dsc.clone()));

        let header = SentryTraceHeader {
            trace_id,
            span_id,
            sampled: Some(sampled),
        };
        self.set(SENTRY_TRACE_HEADER, header.to_string());

        if let Some(dsc) = dsc {
            self.set(BAGGAGE_HEADER, dsc.to_baggage().header_value());
        }
    }

    /// Sets a single header. Does nothing if the key or value are not valid
    /// header inputs, matching `opentelemetry_http::HeaderInjector::set`.
    pub fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(val) = http::header::HeaderValue::from_str(&value) {
                self.0.insert(name, val);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracecore_sdk::testing::TestTransport;
    use tracecore_sdk::span::SpanOrigin;
    use tracecore_sdk::{Client, NoopSpan};
    use tracecore_types::Dsn;

    fn traced_client() -> Arc<Client<TestTransport>> {
        let options = ClientOptions::builder()
            .dsn(Some(Dsn::parse("https://public@example.ingest.sentry.io/1").unwrap()))
            .traces_sample_rate(Some(1.0))
            .build();
        Client::new(options, TestTransport::new())
    }

    #[test]
    fn extractor_falls_back_to_fresh_context_with_no_headers() {
        let headers = HeaderMap::new();
        let ctx = HeaderExtractor(&headers).propagation_context();
        assert!(ctx.parent_span_id.is_none());
    }

    #[test]
    fn extractor_reads_sentry_trace_and_baggage() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "sentry-trace",
            "1234567890abcdef1234567890abcdef-1234567890abcdef-1"
                .parse()
                .unwrap(),
        );
        headers.insert("baggage", "sentry-trace_id=abc123".parse().unwrap());
        let ctx = HeaderExtractor(&headers).propagation_context();
        assert!(ctx.parent_span_id.is_some());
        assert_eq!(ctx.sampled, Some(true));
        assert_eq!(ctx.dsc.unwrap().trace_id, Some("abc123".into()));
    }

    #[test]
    fn injector_writes_sentry_trace_for_a_recording_span() {
        let client = traced_client();
        let span = client.start_span(
            "GET /",
            None,
            0.0,
            None,
            SpanOrigin::manual(),
            false,
        );
        let options = client.options().clone();
        let mut headers = HeaderMap::new();
        HeaderInjector(&mut headers).inject(&span, &options, "https://example.com", true);
        assert!(headers.contains_key(SENTRY_TRACE_HEADER));
    }

    #[test]
    fn injector_skips_targets_outside_trace_propagation_targets() {
        let client = traced_client();
        let span = client.start_span(
            "GET /",
            None,
            0.0,
            None,
            SpanOrigin::manual(),
            false,
        );
        let options = client.options().clone();
        let mut headers = HeaderMap::new();
        HeaderInjector(&mut headers).inject(&span, &options, "https://other.com", false);
        assert!(!headers.contains_key(SENTRY_TRACE_HEADER));
    }

    #[test]
    fn injector_is_a_noop_for_a_noop_span() {
        let span = BoxedSpan::new(NoopSpan::new());
        let options = ClientOptions::default();
        let mut headers = HeaderMap::new();
        HeaderInjector(&mut headers).inject(&span, &options, "anything", true);
        assert!(!headers.contains_key(SENTRY_TRACE_HEADER));
    }
}
