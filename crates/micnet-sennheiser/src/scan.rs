//! Client-driven RF spectrum scan.
//!
//! SSC receivers have no scan primitive, so the sweep is driven from this
//! side: tune the channel to each step frequency, dwell one polling
//! period, and average the RSSI reported by the meter subscription while
//! parked there. Steps are aligned to the 25 kHz tuning grid.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use micnet_core::{FrequencyRange, RfScanState, ScanPublisher};
use serde_json::json;

use crate::commands::path_tree;
use crate::link::SscLink;

/// Hardware tuning grid; scan steps are rounded down to a multiple.
pub(crate) const FREQUENCY_GRID_HZ: u64 = 25_000;

/// Running RSSI accumulator for the frequency currently parked on.
///
/// Present only while a sweep is collecting; the meter path feeds it from
/// the receive loop while the scan worker advances `current_hz`.
#[derive(Debug, Default)]
pub(crate) struct ScanCollector {
    pub current_hz: u64,
    sums: HashMap<u64, (f64, u32)>,
}

impl ScanCollector {
    /// Record one raw RSSI reading (dBm) against the current frequency.
    pub fn record(&mut self, dbm: f32) {
        let entry = self.sums.entry(self.current_hz).or_insert((0.0, 0));
        entry.0 += dbm as f64;
        entry.1 += 1;
    }

    /// The averaged level for `freq_hz`, if any reading arrived.
    fn average(&mut self, freq_hz: u64) -> Option<f32> {
        self.sums
            .remove(&freq_hz)
            .map(|(sum, count)| (sum / count as f64) as f32)
    }
}

/// Drive one sweep to completion. The caller has already claimed the
/// channel's [`micnet_core::ScanSlot`].
pub(crate) async fn run_scan(
    link: Arc<SscLink>,
    rx_key: String,
    collector: Arc<Mutex<Option<ScanCollector>>>,
    publisher: ScanPublisher,
    range: FrequencyRange,
    step_hz: u64,
    dwell: Duration,
    restore_hz: Option<u64>,
) {
    let expected = (range.span_hz() / step_hz) as usize + 1;
    publisher.update(|d| d.state = RfScanState::Running);
    *lock(&collector) = Some(ScanCollector {
        current_hz: range.start_hz,
        ..Default::default()
    });

    let mut freq = range.start_hz;
    let mut visited = 0usize;
    while freq <= range.end_hz {
        if let Some(c) = lock(&collector).as_mut() {
            c.current_hz = freq;
        }
        link.send_json(&path_tree(&[&rx_key, "frequency"], json!(freq / 1000)));
        tokio::time::sleep(dwell).await;

        let level = lock(&collector).as_mut().and_then(|c| c.average(freq));
        visited += 1;
        publisher.update(|d| {
            if let Some(level) = level {
                d.samples.push((freq, level));
            }
            d.progress = (visited as f32 / expected as f32).min(1.0);
        });
        freq += step_hz;
    }

    *lock(&collector) = None;
    publisher.complete();
    tracing::debug!(uid = %link.uid, %range, "RF sweep finished");

    if let Some(hz) = restore_hz {
        link.send_json(&path_tree(&[&rx_key, "frequency"], json!(hz / 1000)));
    }
}

fn lock(collector: &Mutex<Option<ScanCollector>>) -> std::sync::MutexGuard<'_, Option<ScanCollector>> {
    collector.lock().unwrap_or_else(|poison| poison.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_averages_per_frequency() {
        let mut c = ScanCollector {
            current_hz: 830_000_000,
            ..Default::default()
        };
        c.record(-90.0);
        c.record(-80.0);
        c.current_hz = 830_025_000;
        c.record(-70.0);
        assert_eq!(c.average(830_000_000), Some(-85.0));
        assert_eq!(c.average(830_025_000), Some(-70.0));
        assert_eq!(c.average(830_050_000), None);
    }
}
