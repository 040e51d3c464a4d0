//! `ClientOptions`: the recognized configuration surface from spec.md §6,
//! plus the ambient tuning knobs (buffer size, debug logging) the teacher
//! keeps in the same place.
//!
//! Grounded on `opentelemetry_sdk::trace::config::Config`/`Builder`
//! (`opentelemetry-sdk/src/trace/config.rs`): a plain options struct with
//! sensible defaults, built through a `with_*`-method builder rather than
//! requiring every field up front.

use std::sync::Arc;

use regex::Regex;

use tracecore_types::{Dsn, Event, SpanPayload};

use crate::span::sampler::{SampleRateSource, SampleRateValue, SamplingContext};
use crate::span::SpanLimits;

pub type BeforeSendHook = Arc<dyn Fn(Event) -> Option<Event> + Send + Sync>;
pub type BeforeSendSpanHook = Arc<dyn Fn(SpanPayload) -> Option<SpanPayload> + Send + Sync>;

/// A `string | RegExp` filter entry, as used by `ignoreErrors`,
/// `ignoreTransactions`, `allowUrls`, `denyUrls`, and
/// `tracePropagationTargets` (spec.md §6).
#[derive(Clone)]
pub enum Pattern {
    Substring(String),
    Regex(Arc<Regex>),
}

impl Pattern {
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Pattern::Regex(Arc::new(Regex::new(pattern)?)))
    }

    pub fn matches(&self, haystack: &str) -> bool {
        match self {
            Pattern::Substring(needle) => haystack.contains(needle.as_str()),
            Pattern::Regex(re) => re.is_match(haystack),
        }
    }
}

impl From<&str> for Pattern {
    fn from(value: &str) -> Self {
        Pattern::Substring(value.to_owned())
    }
}

#[derive(Clone, Default)]
pub struct TransportOptions {
    pub buffer_size: Option<usize>,
}

#[derive(Clone)]
pub struct ClientOptions {
    pub dsn: Option<Dsn>,
    pub release: Option<String>,
    pub environment: Option<String>,
    pub dist: Option<String>,
    pub sample_rate: Option<f64>,
    pub traces_sample_rate: Option<f64>,
    pub traces_sampler: Option<Arc<dyn Fn(&SamplingContext<'_>) -> SampleRateValue + Send + Sync>>,
    pub before_send: Option<BeforeSendHook>,
    pub before_send_transaction: Option<BeforeSendHook>,
    pub before_send_span: Option<BeforeSendSpanHook>,
    pub enable_tracing: bool,
    pub trace_propagation_targets: Vec<Pattern>,
    pub ignore_errors: Vec<Pattern>,
    pub ignore_transactions: Vec<Pattern>,
    pub allow_urls: Vec<Pattern>,
    pub deny_urls: Vec<Pattern>,
    pub disable_error_defaults: bool,
    pub ignore_internal: bool,
    pub send_client_reports: bool,
    pub tunnel: Option<String>,
    pub debug: bool,
    pub transport_options: TransportOptions,
    pub parent_span_is_always_root_span: bool,
    pub sdk_name: String,
    pub sdk_version: String,
    pub max_breadcrumbs: usize,
    pub span_limits: SpanLimits,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            dsn: None,
            release: None,
            environment: None,
            dist: None,
            sample_rate: None,
            traces_sample_rate: None,
            traces_sampler: None,
            before_send: None,
            before_send_transaction: None,
            before_send_span: None,
            enable_tracing: false,
            trace_propagation_targets: Vec::new(),
            ignore_errors: Vec::new(),
            ignore_transactions: Vec::new(),
            allow_urls: Vec::new(),
            deny_urls: Vec::new(),
            disable_error_defaults: false,
            ignore_internal: true,
            send_client_reports: true,
            tunnel: None,
            debug: false,
            transport_options: TransportOptions::default(),
            parent_span_is_always_root_span: false,
            sdk_name: "tracecore".to_owned(),
            sdk_version: env!("CARGO_PKG_VERSION").to_owned(),
            max_breadcrumbs: crate::scope::DEFAULT_BREADCRUMB_CAP,
            span_limits: SpanLimits::default(),
        }
    }
}

impl ClientOptions {
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::default()
    }

    /// Whether tracing is enabled at all: either a rate or a dynamic
    /// sampler is configured, or `enableTracing` opts in with no rate set
    /// (spec.md §6).
    pub fn tracing_enabled(&self) -> bool {
        self.traces_sampler.is_some() || self.traces_sample_rate.is_some() || self.enable_tracing
    }

    pub fn sample_rate_source(&self) -> SampleRateSource {
        if let Some(sampler) = &self.traces_sampler {
            SampleRateSource::Dynamic(sampler.clone())
        } else if let Some(rate) = self.traces_sample_rate {
            SampleRateSource::Fixed(rate)
        } else if self.enable_tracing {
            SampleRateSource::Fixed(1.0)
        } else {
            SampleRateSource::Disabled
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.transport_options.buffer_size.unwrap_or(64)
    }

    pub fn should_propagate_to(&self, target: &str, same_origin: bool) -> bool {
        same_origin || self.trace_propagation_targets.iter().any(|p| p.matches(target))
    }
}

#[derive(Default)]
pub struct ClientOptionsBuilder {
    options: ClientOptions,
}

macro_rules! setter {
    ($name:ident, $field:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.options.$field = value;
            self
        }
    };
}

impl ClientOptionsBuilder {
    setter!(dsn, dsn, Option<Dsn>);
    setter!(release, release, Option<String>);
    setter!(environment, environment, Option<String>);
    setter!(sample_rate, sample_rate, Option<f64>);
    setter!(traces_sample_rate, traces_sample_rate, Option<f64>);
    setter!(enable_tracing, enable_tracing, bool);
    setter!(send_client_reports, send_client_reports, bool);
    setter!(tunnel, tunnel, Option<String>);
    setter!(debug, debug, bool);

    pub fn traces_sampler(
        mut self,
        sampler: impl Fn(&SamplingContext<'_>) -> SampleRateValue + Send + Sync + 'static,
    ) -> Self {
        self.options.traces_sampler = Some(Arc::new(sampler));
        self
    }

    pub fn trace_propagation_targets(mut self, targets: Vec<Pattern>) -> Self {
        self.options.trace_propagation_targets = targets;
        self
    }

    pub fn ignore_errors(mut self, patterns: Vec<Pattern>) -> Self {
        self.options.ignore_errors = patterns;
        self
    }

    pub fn ignore_transactions(mut self, patterns: Vec<Pattern>) -> Self {
        self.options.ignore_transactions = patterns;
        self
    }

    pub fn allow_urls(mut self, patterns: Vec<Pattern>) -> Self {
        self.options.allow_urls = patterns;
        self
    }

    pub fn deny_urls(mut self, patterns: Vec<Pattern>) -> Self {
        self.options.deny_urls = patterns;
        self
    }

    pub fn before_send(mut self, hook: impl Fn(Event) -> Option<Event> + Send + Sync + 'static) -> Self {
        self.options.before_send = Some(Arc::new(hook));
        self
    }

    pub fn before_send_transaction(
        mut self,
        hook: impl Fn(Event) -> Option<Event> + Send + Sync + 'static,
    ) -> Self {
        self.options.before_send_transaction = Some(Arc::new(hook));
        self
    }

    pub fn before_send_span(
        mut self,
        hook: impl Fn(SpanPayload) -> Option<SpanPayload> + Send + Sync + 'static,
    ) -> Self {
        self.options.before_send_span = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> ClientOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_enabled_when_sample_rate_set() {
        let opts = ClientOptions::builder().traces_sample_rate(Some(0.5)).build();
        assert!(opts.tracing_enabled());
    }

    #[test]
    fn tracing_disabled_by_default() {
        let opts = ClientOptions::default();
        assert!(!opts.tracing_enabled());
    }

    #[test]
    fn buffer_size_defaults_to_64() {
        let opts = ClientOptions::default();
        assert_eq!(opts.buffer_size(), 64);
    }

    #[test]
    fn pattern_substring_matches() {
        let pattern = Pattern::from("example.com");
        assert!(pattern.matches("https://api.example.com/users"));
    }

    #[test]
    fn pattern_regex_matches() {
        let pattern = Pattern::regex(r"^https://api\.").unwrap();
        assert!(pattern.matches("https://api.example.com"));
        assert!(!pattern.matches("https://cdn.example.com"));
    }

    #[test]
    fn propagation_targets_or_same_origin() {
        let opts = ClientOptions::builder()
            .build();
        assert!(opts.should_propagate_to("anything", true));
        assert!(!opts.should_propagate_to("https://other.com", false));
    }
}
