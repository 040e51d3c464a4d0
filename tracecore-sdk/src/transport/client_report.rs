//! In-memory dropped-event accounting and the `client_report` envelope item
//! it produces, per spec.md §4.5 (`_flushOutcomes`).

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use tracecore_types::{DataCategory, EnvelopeItem};

use super::DropReason;

#[derive(Serialize)]
struct DiscardedEvent {
    reason: &'static str,
    category: &'static str,
    quantity: u64,
}

#[derive(Serialize)]
struct ClientReportPayload {
    timestamp: f64,
    discarded_events: Vec<DiscardedEvent>,
}

/// Aggregates `(reason, category) -> count` in memory, reset each time it
/// is drained into an envelope item.
pub struct ClientReportAggregator {
    counts: Mutex<HashMap<(DropReason, DataCategory), u64>>,
}

impl ClientReportAggregator {
    pub fn new() -> Self {
        ClientReportAggregator {
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, reason: DropReason, category: DataCategory, count: u64) {
        if count == 0 {
            return;
        }
        let mut counts = self.counts.lock().expect("client report lock poisoned");
        *counts.entry((reason, category)).or_insert(0) += count;
    }

    /// Drains the aggregator into a `client_report` envelope item, or
    /// `None` if nothing was dropped since the last drain.
    pub fn take_as_item(&self, now: impl Fn() -> f64) -> Option<EnvelopeItem> {
        let mut counts = self.counts.lock().expect("client report lock poisoned");
        if counts.is_empty() {
            return None;
        }
        let discarded_events = counts
            .drain()
            .map(|((reason, category), quantity)| DiscardedEvent {
                reason: reason.as_str(),
                category: category.as_str(),
                quantity,
            })
            .collect();
        let payload = ClientReportPayload {
            timestamp: now(),
            discarded_events,
        };
        EnvelopeItem::json("client_report", payload).ok()
    }
}

impl Default for ClientReportAggregator {
    fn default() -> Self {
        ClientReportAggregator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_aggregator_yields_no_item() {
        let agg = ClientReportAggregator::new();
        assert!(agg.take_as_item(|| 0.0).is_none());
    }

    #[test]
    fn records_are_aggregated_by_reason_and_category() {
        let agg = ClientReportAggregator::new();
        agg.record(DropReason::BeforeSend, DataCategory::Error, 1);
        agg.record(DropReason::BeforeSend, DataCategory::Error, 2);
        agg.record(DropReason::RatelimitBackoff, DataCategory::Transaction, 5);
        let item = agg.take_as_item(|| 100.0).unwrap();
        assert_eq!(item.headers.item_type, "client_report");
    }

    #[test]
    fn draining_clears_the_aggregator() {
        let agg = ClientReportAggregator::new();
        agg.record(DropReason::QueueOverflow, DataCategory::Span, 3);
        assert!(agg.take_as_item(|| 0.0).is_some());
        assert!(agg.take_as_item(|| 0.0).is_none());
    }

    #[test]
    fn zero_count_records_are_ignored() {
        let agg = ClientReportAggregator::new();
        agg.record(DropReason::NetworkError, DataCategory::Error, 0);
        assert!(agg.take_as_item(|| 0.0).is_none());
    }
}
