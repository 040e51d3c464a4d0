//! Transport & rate limits: a bounded-concurrency send path, rate-limit
//! header parsing, and client-report (dropped-event) accounting, per
//! spec.md §4.5.
//!
//! Grounded on `opentelemetry-http`'s `HttpClient` trait
//! (`opentelemetry-http/src/lib.rs`): a small async trait the host supplies
//! an implementation of, so this crate never links a concrete HTTP stack.

pub mod client_report;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::task::Poll;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::poll_fn;

use tracecore_types::{DataCategory, Envelope, RateLimits};

use client_report::ClientReportAggregator;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
}

#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub url: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// The pluggable send primitive (spec.md §1: "the send primitive itself is
/// a pluggable collaborator"). The host supplies a concrete implementation
/// backed by whatever HTTP client it already uses.
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

fn item_category(item_type: &str) -> DataCategory {
    match item_type {
        "event" => DataCategory::Error,
        "transaction" => DataCategory::Transaction,
        "session" | "sessions" => DataCategory::Session,
        "attachment" => DataCategory::Attachment,
        "span" => DataCategory::Span,
        "client_report" => DataCategory::ClientReport,
        _ => DataCategory::All,
    }
}

/// Outcome of a single `Transport::send` call.
#[derive(Debug, Default)]
pub struct SendOutcome {
    pub sent: bool,
    pub status: Option<u16>,
}

/// Why an item (or a whole envelope) was dropped before reaching the wire,
/// fed into `recordDroppedEvent` bookkeeping (spec.md §4.4/§4.5/§7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
    BeforeSend,
    EventProcessor,
    SampleRate,
    RatelimitBackoff,
    QueueOverflow,
    NetworkError,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::BeforeSend => "before_send",
            DropReason::EventProcessor => "event_processor",
            DropReason::SampleRate => "sample_rate",
            DropReason::RatelimitBackoff => "ratelimit_backoff",
            DropReason::QueueOverflow => "queue_overflow",
            DropReason::NetworkError => "network_error",
        }
    }
}

/// A permit on the bounded in-flight count; releases its slot on drop.
struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The transport: owns the bounded send buffer, the per-category rate
/// limits, and the in-memory dropped-event aggregator.
pub struct Transport<S: HttpSend> {
    http: S,
    capacity: usize,
    in_flight: AtomicUsize,
    rate_limits: Mutex<RateLimits>,
    client_reports: ClientReportAggregator,
    send_client_reports: bool,
}

impl<S: HttpSend> Transport<S> {
    pub fn new(http: S, capacity: usize, send_client_reports: bool) -> Self {
        Transport {
            http,
            capacity,
            in_flight: AtomicUsize::new(0),
            rate_limits: Mutex::new(RateLimits::new()),
            client_reports: ClientReportAggregator::new(),
            send_client_reports,
        }
    }

    pub fn record_dropped_event(&self, reason: DropReason, category: DataCategory, count: u64) {
        if self.send_client_reports {
            self.client_reports.record(reason, category, count);
        }
    }

    fn try_acquire(&self) -> Option<InFlightGuard<'_>> {
        loop {
            let current = self.in_flight.load(Ordering::SeqCst);
            if current >= self.capacity {
                return None;
            }
            if self
                .in_flight
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(InFlightGuard { counter: &self.in_flight });
            }
        }
    }

    /// Filters rate-limited items, enqueues the remaining envelope, and
    /// dispatches it to the pluggable `HttpSend`. Never returns an error to
    /// the caller — failures are recorded as drops per spec.md §4.5/§7.
    pub async fn send(&self, mut envelope: Envelope, url: &str, now: f64) -> SendOutcome {
        let limits = self.rate_limits.lock().expect("rate limit lock poisoned");
        let before = envelope.items.len();
        envelope.items.retain(|item| {
            let category = item_category(&item.headers.item_type);
            !limits.is_rate_limited(category, now)
        });
        let dropped = before - envelope.items.len();
        drop(limits);
        if dropped > 0 {
            self.record_dropped_event(DropReason::RatelimitBackoff, DataCategory::All, dropped as u64);
        }

        if envelope.is_empty() {
            return SendOutcome::default();
        }

        let guard = match self.try_acquire() {
            Some(guard) => guard,
            None => {
                self.record_dropped_event(
                    DropReason::QueueOverflow,
                    DataCategory::All,
                    envelope.items.len() as u64,
                );
                return SendOutcome::default();
            }
        };

        let body = match envelope.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracecore_types::tc_warn!(name: "transport.serialize_failed", error = e.to_string().as_str());
                drop(guard);
                return SendOutcome::default();
            }
        };

        let request = HttpRequest {
            url: url.to_owned(),
            body,
            headers: Vec::new(),
        };

        let result = self.http.send(request).await;
        drop(guard);

        match result {
            Ok(response) => {
                self.apply_rate_limit_headers(&response, now);
                if !(200..300).contains(&response.status) {
                    tracecore_types::tc_warn!(name: "transport.non_2xx_status", status = response.status);
                }
                SendOutcome {
                    sent: true,
                    status: Some(response.status),
                }
            }
            Err(e) => {
                self.record_dropped_event(
                    DropReason::NetworkError,
                    DataCategory::All,
                    envelope.items.len() as u64,
                );
                tracecore_types::tc_warn!(name: "transport.network_error", error = e.to_string().as_str());
                SendOutcome::default()
            }
        }
    }

    fn apply_rate_limit_headers(&self, response: &HttpResponse, now: f64) {
        let mut limits = self.rate_limits.lock().expect("rate limit lock poisoned");
        let header = response
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("x-sentry-rate-limits"));
        if let Some((_, value)) = header {
            limits.update_from_header(value, || now);
            return;
        }
        let retry_after = response
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
            .and_then(|(_, v)| v.trim().parse::<f64>().ok());
        match retry_after {
            Some(secs) => limits.update_from_retry_after(secs, now),
            None if response.status == 429 => limits.update_from_retry_after(60.0, now),
            None => {}
        }
    }

    /// Resolves to `true` once the buffer drains within `timeout`, else
    /// `false` (spec.md §4.5, §5 "races buffer drain against t ms").
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        poll_fn(|cx| {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                Poll::Ready(true)
            } else if Instant::now() >= deadline {
                Poll::Ready(false)
            } else {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        })
        .await
    }

    pub fn take_client_report(&self) -> Option<tracecore_types::EnvelopeItem> {
        self.client_reports.take_as_item(|| 0.0)
    }

    pub fn rate_limits_snapshot(&self) -> RateLimits {
        self.rate_limits.lock().expect("rate limit lock poisoned").clone()
    }
}

/// A type-erased boxed future, used where `Transport<S>` would otherwise
/// need to be generic all the way up into `Client`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[cfg(test)]
mod tests {
    use super::*;
    use tracecore_types::{EnvelopeHeaders, EnvelopeItem};

    struct RecordingHttp {
        response: HttpResponse,
    }

    #[async_trait]
    impl HttpSend for RecordingHttp {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Ok(self.response.clone())
        }
    }

    struct FailingHttp;

    #[async_trait]
    impl HttpSend for FailingHttp {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Err(TransportError::Network("connection refused".into()))
        }
    }

    fn envelope_with_event() -> Envelope {
        let mut envelope = Envelope::new(EnvelopeHeaders::default());
        envelope.push(EnvelopeItem::json("event", serde_json::json!({"event_id": "abc"})).unwrap());
        envelope
    }

    #[tokio::test]
    async fn successful_send_reports_status() {
        let transport = Transport::new(
            RecordingHttp {
                response: HttpResponse {
                    status: 200,
                    headers: Vec::new(),
                },
            },
            64,
            true,
        );
        let outcome = transport.send(envelope_with_event(), "https://example.com", 0.0).await;
        assert!(outcome.sent);
        assert_eq!(outcome.status, Some(200));
    }

    #[tokio::test]
    async fn network_error_records_drop_and_does_not_panic() {
        let transport = Transport::new(FailingHttp, 64, true);
        let outcome = transport.send(envelope_with_event(), "https://example.com", 0.0).await;
        assert!(!outcome.sent);
    }

    #[tokio::test]
    async fn rate_limited_category_is_filtered_out_before_send() {
        let transport = Transport::new(
            RecordingHttp {
                response: HttpResponse {
                    status: 200,
                    headers: Vec::new(),
                },
            },
            64,
            true,
        );
        transport
            .rate_limits
            .lock()
            .unwrap()
            .update_from_header("60:error:key", || 0.0);
        let outcome = transport.send(envelope_with_event(), "https://example.com", 10.0).await;
        assert!(!outcome.sent);
    }

    #[tokio::test]
    async fn response_rate_limit_header_is_applied() {
        let transport = Transport::new(
            RecordingHttp {
                response: HttpResponse {
                    status: 429,
                    headers: vec![("x-sentry-rate-limits".into(), "60:error:key".into())],
                },
            },
            64,
            true,
        );
        transport.send(envelope_with_event(), "https://example.com", 0.0).await;
        assert!(transport.rate_limits_snapshot().is_rate_limited(DataCategory::Error, 30.0));
    }

    #[tokio::test]
    async fn bare_429_without_headers_defaults_to_60_seconds() {
        let transport = Transport::new(
            RecordingHttp {
                response: HttpResponse {
                    status: 429,
                    headers: Vec::new(),
                },
            },
            64,
            true,
        );
        transport.send(envelope_with_event(), "https://example.com", 0.0).await;
        assert!(transport.rate_limits_snapshot().is_rate_limited(DataCategory::Error, 30.0));
        assert!(!transport.rate_limits_snapshot().is_rate_limited(DataCategory::Error, 61.0));
    }

    #[tokio::test]
    async fn flush_resolves_true_when_idle() {
        let transport = Transport::new(
            RecordingHttp {
                response: HttpResponse {
                    status: 200,
                    headers: Vec::new(),
                },
            },
            64,
            true,
        );
        assert!(transport.flush(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn buffer_overflow_drops_and_does_not_send() {
        let transport = Transport::new(
            RecordingHttp {
                response: HttpResponse {
                    status: 200,
                    headers: Vec::new(),
                },
            },
            1,
            true,
        );
        let _guard = transport.try_acquire().unwrap();
        let outcome = transport.send(envelope_with_event(), "https://example.com", 0.0).await;
        assert!(!outcome.sent);
    }
}
