//! Span status.
//!
//! Grounded on `opentelemetry::trace::Status` (`Unset`/`Ok`/`Error{description}`)
//! in `opentelemetry/src/trace/span.rs`, including its total order — setting
//! `Ok` is final and `Unset` never overrides a prior non-`Unset` status.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error { message: String },
}

impl SpanStatus {
    /// Rank used to enforce the "Ok > Error > Unset" total order from
    /// spec.md §4.3: a status update is only applied when its rank is
    /// strictly greater than the current one.
    fn rank(&self) -> u8 {
        match self {
            SpanStatus::Unset => 0,
            SpanStatus::Error { .. } => 1,
            SpanStatus::Ok => 2,
        }
    }

    /// Applies `new` over `self` following the total order, in place.
    pub fn update(&mut self, new: SpanStatus) {
        if new.rank() > self.rank() {
            *self = new;
        }
    }
}

impl Default for SpanStatus {
    fn default() -> Self {
        SpanStatus::Unset
    }
}
