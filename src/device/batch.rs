use std::mem;
use chrono::{DateTime, Local};

/// Samples received since the last flush, as three parallel lists.
#[derive(Debug)]
pub struct SampleBatch {
    payloads: Vec<Vec<u8>>,
    timestamps: Vec<DateTime<Local>>,
    // microseconds since the previous sample
    delays: Vec<i64>,
    last_packet_time: DateTime<Local>,
}

/// A completed batch, moved out of a [`SampleBatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct Samples {
    pub payloads: Vec<Vec<u8>>,
    pub timestamps: Vec<DateTime<Local>>,
    pub delays: Vec<i64>,
}

impl SampleBatch {
    /// `start` is used as the previous packet time of the first sample.
    pub fn new(start: DateTime<Local>) -> Self {
        SampleBatch {
            payloads: Vec::new(),
            timestamps: Vec::new(),
            delays: Vec::new(),
            last_packet_time: start,
        }
    }

    pub fn len(&self) -> usize {
        self.assert_consistent();
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, payload: Vec<u8>, now: DateTime<Local>) {
        let delay = (now - self.last_packet_time).num_microseconds().unwrap_or(i64::MAX);

        self.payloads.push(payload);
        self.timestamps.push(now);
        self.delays.push(delay);
        self.last_packet_time = now;
        self.assert_consistent();
    }

    /// Move the samples out if at least `threshold` have been collected, leaving the batch empty.
    /// The previous packet time carries over to the next batch.
    pub fn take_if_full(&mut self, threshold: usize) -> Option<Samples> {
        if self.len() < threshold {
            return None;
        }

        Some(Samples {
            payloads: mem::take(&mut self.payloads),
            timestamps: mem::take(&mut self.timestamps),
            delays: mem::take(&mut self.delays),
        })
    }

    fn assert_consistent(&self) {
        assert!(
            self.payloads.len() == self.timestamps.len() && self.payloads.len() == self.delays.len(),
            "sample batch lists diverged: {} payloads, {} timestamps, {} delays",
            self.payloads.len(),
            self.timestamps.len(),
            self.delays.len(),
        );
    }
}
