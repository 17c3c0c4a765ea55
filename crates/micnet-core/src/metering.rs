//! Bounded metering-sample pipeline.
//!
//! Each channel owns one [`MeterQueue`]. Inbound meter messages push
//! samples; consumers either peek the most recent sample or drain the whole
//! queue. The queue is bounded so that a consumer that stops draining does
//! not grow memory without limit: at capacity, a block of the oldest
//! samples is discarded to make room.

use std::collections::VecDeque;

use crate::types::MeteringData;

/// Maximum number of samples retained per channel.
pub const MAX_METER_SAMPLES: usize = 1024;

/// Number of oldest samples discarded in one step when the queue is full.
const PURGE_BLOCK: usize = 16;

/// Bounded FIFO of metering samples with a last-sample cache.
#[derive(Debug, Default)]
pub struct MeterQueue {
    samples: VecDeque<MeteringData>,
    last: Option<MeteringData>,
}

impl MeterQueue {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(MAX_METER_SAMPLES),
            last: None,
        }
    }

    /// Enqueue a sample, discarding the oldest [`PURGE_BLOCK`] samples
    /// first if the queue is full. The last-sample cache always reflects
    /// the newest push regardless of truncation.
    pub fn push(&mut self, sample: MeteringData) {
        if self.samples.len() >= MAX_METER_SAMPLES {
            tracing::trace!(
                dropped = PURGE_BLOCK,
                "meter queue full, purging oldest samples"
            );
            self.samples.drain(..PURGE_BLOCK);
        }
        self.samples.push_back(sample);
        self.last = Some(sample);
    }

    /// The most recently enqueued sample, if any sample has ever arrived.
    pub fn last(&self) -> Option<MeteringData> {
        self.last
    }

    /// Remove and return all queued samples, oldest first.
    pub fn drain(&mut self) -> Vec<MeteringData> {
        self.samples.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiversityIndicator;

    fn sample(audio: f32) -> MeteringData {
        MeteringData {
            rssi_a: 0.5,
            rssi_b: 0.4,
            audio_level: audio,
            diversity: DiversityIndicator::ANTENNA_A,
        }
    }

    #[test]
    fn empty_queue_has_no_last_sample() {
        let q = MeterQueue::new();
        assert!(q.last().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn push_updates_last_and_len() {
        let mut q = MeterQueue::new();
        q.push(sample(0.1));
        q.push(sample(0.2));
        assert_eq!(q.len(), 2);
        assert_eq!(q.last().unwrap().audio_level, 0.2);
    }

    #[test]
    fn overflow_drops_oldest_block_before_accepting() {
        let mut q = MeterQueue::new();
        for i in 0..MAX_METER_SAMPLES {
            q.push(sample(i as f32));
        }
        assert_eq!(q.len(), MAX_METER_SAMPLES);

        // One more push purges 16 and then accepts, netting -15.
        q.push(sample(9999.0));
        assert_eq!(q.len(), MAX_METER_SAMPLES - 16 + 1);

        // The oldest surviving sample is the 17th pushed.
        let drained = q.drain();
        assert_eq!(drained[0].audio_level, 16.0);
        assert_eq!(drained.last().unwrap().audio_level, 9999.0);
    }

    #[test]
    fn last_reflects_newest_across_truncation() {
        let mut q = MeterQueue::new();
        for i in 0..(MAX_METER_SAMPLES + 100) {
            q.push(sample(i as f32));
            assert_eq!(q.last().unwrap().audio_level, i as f32);
        }
    }

    #[test]
    fn drain_empties_queue_but_keeps_last() {
        let mut q = MeterQueue::new();
        q.push(sample(0.7));
        let drained = q.drain();
        assert_eq!(drained.len(), 1);
        assert!(q.is_empty());
        assert_eq!(q.last().unwrap().audio_level, 0.7);
    }
}
