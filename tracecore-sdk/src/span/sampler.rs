//! The span sampling algorithm: `sampleSpan(options, ctx) -> (sampled, rate?)`
//! from spec.md §4.3.
//!
//! Grounded on `opentelemetry_sdk::trace::sampler::{ShouldSample, Sampler}`
//! (`opentelemetry-sdk/src/trace/sampler.rs`): a small enum covering the
//! fixed-rate and inherit-from-parent cases, plus a closure-based escape
//! hatch for the dynamic case (`tracesSampler`).

use rand::Rng;

use tracecore_types::Attributes;

/// Inputs to a `tracesSampler` callback: the span's name, the parent's
/// sampling decision (if any), its attributes, and whether it would become
/// a transaction.
pub struct SamplingContext<'a> {
    pub name: &'a str,
    pub parent_sampled: Option<bool>,
    pub attributes: &'a Attributes,
}

/// A parsed sample rate source, mirroring the `tracesSampleRate` /
/// `tracesSampler` configuration split.
pub enum SampleRateSource {
    /// No sampling configured; tracing is disabled entirely.
    Disabled,
    /// A fixed numeric rate in `[0, 1]`.
    Fixed(f64),
    /// A dynamic callback consulted per root span.
    Dynamic(std::sync::Arc<dyn Fn(&SamplingContext<'_>) -> SampleRateValue + Send + Sync>),
}

/// What a `tracesSampler` callback (or a raw config value) may return:
/// a boolean, a number, or a numeric string — all three are accepted
/// per spec.md §4.3 step 3.
#[derive(Clone, Debug)]
pub enum SampleRateValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl SampleRateValue {
    /// Parses into `[0, 1]`, returning `None` (and the caller should warn
    /// and refuse to sample) for anything out of range or unparsable.
    fn parse(&self) -> Option<f64> {
        let rate = match self {
            SampleRateValue::Bool(b) => {
                return Some(if *b { 1.0 } else { 0.0 });
            }
            SampleRateValue::Number(n) => *n,
            SampleRateValue::String(s) => s.trim().parse::<f64>().ok()?,
        };
        if (0.0..=1.0).contains(&rate) {
            Some(rate)
        } else {
            None
        }
    }
}

/// The outcome of `sample_span`: whether the new span records, and (when
/// tracing is enabled) the rate that was used to decide.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingDecision {
    pub sampled: bool,
    pub rate: Option<f64>,
}

/// Implements spec.md §4.3's sampling algorithm steps 1-5.
pub fn sample_span(source: &SampleRateSource, ctx: &SamplingContext<'_>) -> SamplingDecision {
    let rate_value = match source {
        SampleRateSource::Disabled => {
            return SamplingDecision {
                sampled: false,
                rate: None,
            };
        }
        SampleRateSource::Dynamic(sampler) => sampler(ctx),
        SampleRateSource::Fixed(rate) => {
            if let Some(parent_sampled) = ctx.parent_sampled {
                SampleRateValue::Bool(parent_sampled)
            } else {
                SampleRateValue::Number(*rate)
            }
        }
    };

    let rate = match rate_value.parse() {
        Some(r) => r,
        None => {
            return SamplingDecision {
                sampled: false,
                rate: None,
            };
        }
    };

    if rate <= 0.0 {
        return SamplingDecision {
            sampled: false,
            rate: Some(rate),
        };
    }

    let draw: f64 = rand::thread_rng().gen_range(0.0..1.0);
    SamplingDecision {
        sampled: draw < rate,
        rate: Some(rate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_source_never_samples() {
        let ctx = SamplingContext {
            name: "GET /",
            parent_sampled: None,
            attributes: &Attributes::new(),
        };
        let decision = sample_span(&SampleRateSource::Disabled, &ctx);
        assert!(!decision.sampled);
        assert_eq!(decision.rate, None);
    }

    #[test]
    fn fixed_rate_one_always_samples() {
        let ctx = SamplingContext {
            name: "GET /",
            parent_sampled: None,
            attributes: &Attributes::new(),
        };
        let decision = sample_span(&SampleRateSource::Fixed(1.0), &ctx);
        assert!(decision.sampled);
    }

    #[test]
    fn fixed_rate_zero_never_samples() {
        let ctx = SamplingContext {
            name: "GET /",
            parent_sampled: None,
            attributes: &Attributes::new(),
        };
        let decision = sample_span(&SampleRateSource::Fixed(0.0), &ctx);
        assert!(!decision.sampled);
        assert_eq!(decision.rate, Some(0.0));
    }

    #[test]
    fn parent_sampled_is_inherited_over_fixed_rate() {
        let ctx = SamplingContext {
            name: "GET /",
            parent_sampled: Some(true),
            attributes: &Attributes::new(),
        };
        let decision = sample_span(&SampleRateSource::Fixed(0.0), &ctx);
        assert!(decision.sampled);
    }

    #[test]
    fn out_of_range_rate_is_rejected() {
        let ctx = SamplingContext {
            name: "GET /",
            parent_sampled: None,
            attributes: &Attributes::new(),
        };
        let decision = sample_span(&SampleRateSource::Fixed(1.5), &ctx);
        assert!(!decision.sampled);
        assert_eq!(decision.rate, None);
    }

    #[test]
    fn dynamic_sampler_is_consulted_with_context() {
        let source = SampleRateSource::Dynamic(std::sync::Arc::new(|ctx: &SamplingContext<'_>| {
            if ctx.name == "GET /health" {
                SampleRateValue::Number(0.0)
            } else {
                SampleRateValue::Number(1.0)
            }
        }));
        let health_ctx = SamplingContext {
            name: "GET /health",
            parent_sampled: None,
            attributes: &Attributes::new(),
        };
        assert!(!sample_span(&source, &health_ctx).sampled);

        let other_ctx = SamplingContext {
            name: "GET /orders",
            parent_sampled: None,
            attributes: &Attributes::new(),
        };
        assert!(sample_span(&source, &other_ctx).sampled);
    }

    #[test]
    fn numeric_string_rate_is_accepted() {
        let ctx = SamplingContext {
            name: "GET /",
            parent_sampled: None,
            attributes: &Attributes::new(),
        };
        let decision = sample_span(&SampleRateSource::Fixed(0.0), &ctx);
        let _ = decision;
        assert_eq!(SampleRateValue::String("0.5".into()).parse(), Some(0.5));
        assert_eq!(SampleRateValue::String("nope".into()).parse(), None);
    }
}
