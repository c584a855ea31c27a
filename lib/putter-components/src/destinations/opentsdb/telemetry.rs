use metrics::{counter, Counter};

/// Counters describing the destination's progress.
#[derive(Clone)]
pub struct ShipperTelemetry {
    events_received: Counter,
    events_dropped_decode: Counter,
    fragments_sent: Counter,
    batches_sent: Counter,
    batches_failed: Counter,
    fragments_requeued: Counter,
    fragments_abandoned: Counter,
    bytes_sent: Counter,
}

impl ShipperTelemetry {
    /// Registers the counters with the global recorder.
    pub fn register() -> Self {
        Self {
            events_received: counter!("putter_events_received_total"),
            events_dropped_decode: counter!("putter_events_dropped_total", "reason" => "decode_error"),
            fragments_sent: counter!("putter_fragments_sent_total"),
            batches_sent: counter!("putter_batches_sent_total"),
            batches_failed: counter!("putter_batches_failed_total"),
            fragments_requeued: counter!("putter_fragments_requeued_total"),
            fragments_abandoned: counter!("putter_fragments_abandoned_total"),
            bytes_sent: counter!("putter_bytes_sent_total"),
        }
    }

    pub fn events_received(&self) -> &Counter {
        &self.events_received
    }

    pub fn events_dropped_decode(&self) -> &Counter {
        &self.events_dropped_decode
    }

    pub fn fragments_sent(&self) -> &Counter {
        &self.fragments_sent
    }

    pub fn batches_sent(&self) -> &Counter {
        &self.batches_sent
    }

    pub fn batches_failed(&self) -> &Counter {
        &self.batches_failed
    }

    pub fn fragments_requeued(&self) -> &Counter {
        &self.fragments_requeued
    }

    pub fn fragments_abandoned(&self) -> &Counter {
        &self.fragments_abandoned
    }

    pub fn bytes_sent(&self) -> &Counter {
        &self.bytes_sent
    }
}
