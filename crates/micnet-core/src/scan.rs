//! RF spectrum-scan state shared across vendor backends.
//!
//! Vendor drivers run the actual sweep (receiver-driven or client-driven)
//! on a worker task; progress is published through a [`tokio::sync::watch`]
//! channel so that any number of observers can follow the same scan. A
//! channel holds one [`ScanSlot`]; asking it to start while a sweep is in
//! flight hands back the existing handle instead of starting a second one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::types::FrequencyRange;

/// Lifecycle of one spectrum sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfScanState {
    /// Requested, protocol negotiation not yet complete.
    Started,
    /// Sweeping; samples are accumulating.
    Running,
    /// Sweep finished normally; samples are final.
    Completed,
    /// Sweep aborted (protocol timeout or device error).
    Failure,
}

impl RfScanState {
    /// Whether the scan has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(self, RfScanState::Completed | RfScanState::Failure)
    }
}

/// The accumulated result of one spectrum sweep over a channel.
///
/// Replaced wholesale when a new scan starts, mutated in place while the
/// sweep runs.
#[derive(Debug, Clone, PartialEq)]
pub struct RfScanData {
    /// The swept frequency range.
    pub range: FrequencyRange,
    /// Step between sample frequencies, in Hz.
    pub step_hz: u64,
    /// Ordered `(frequency_hz, strength_dbm)` samples.
    pub samples: Vec<(u64, f32)>,
    /// Completion fraction `0.0..=1.0`.
    pub progress: f32,
    pub state: RfScanState,
    /// Human-readable status, set on failure.
    pub status: Option<String>,
}

impl RfScanData {
    pub fn new(range: FrequencyRange, step_hz: u64) -> Self {
        Self {
            range,
            step_hz,
            samples: Vec::new(),
            progress: 0.0,
            state: RfScanState::Started,
            status: None,
        }
    }

    /// Number of sample points a full sweep of `range` at `step_hz` yields.
    pub fn expected_samples(&self) -> usize {
        if self.step_hz == 0 {
            return 0;
        }
        (self.range.span_hz() / self.step_hz) as usize + 1
    }
}

/// A cloneable observer handle onto an in-flight or finished scan.
#[derive(Debug, Clone)]
pub struct RfScanHandle {
    scan_id: u64,
    rx: watch::Receiver<RfScanData>,
}

impl RfScanHandle {
    /// Identifier of the underlying sweep. Two handles observing the same
    /// sweep report the same id.
    pub fn scan_id(&self) -> u64 {
        self.scan_id
    }

    /// The most recently published scan state.
    pub fn latest(&self) -> RfScanData {
        self.rx.borrow().clone()
    }

    /// Wait until the scan reaches a terminal state and return it.
    ///
    /// If the scan worker is dropped without finishing, the last published
    /// state is returned with `state` forced to [`RfScanState::Failure`].
    pub async fn wait(mut self) -> RfScanData {
        loop {
            let current = self.rx.borrow_and_update().clone();
            if current.state.is_terminal() {
                return current;
            }
            if self.rx.changed().await.is_err() {
                let mut last = self.rx.borrow().clone();
                if !last.state.is_terminal() {
                    last.state = RfScanState::Failure;
                    last.status = Some("scan worker terminated".into());
                }
                return last;
            }
        }
    }
}

/// The scan worker's write side.
///
/// Held only by the task driving the sweep; dropping it without publishing
/// a terminal state makes observers resolve to `Failure`.
#[derive(Debug)]
pub struct ScanPublisher {
    tx: watch::Sender<RfScanData>,
}

impl ScanPublisher {
    /// Mutate the scan data in place and notify observers.
    pub fn update(&self, f: impl FnOnce(&mut RfScanData)) {
        self.tx.send_modify(f);
    }

    /// Publish a terminal `Completed` state.
    pub fn complete(&self) {
        self.tx.send_modify(|d| {
            d.state = RfScanState::Completed;
            d.progress = 1.0;
        });
    }

    /// Publish a terminal `Failure` state with a status message.
    pub fn fail(&self, status: impl Into<String>) {
        let status = status.into();
        self.tx.send_modify(|d| {
            d.state = RfScanState::Failure;
            d.status = Some(status);
        });
    }
}

/// Per-channel scan de-duplication slot.
///
/// `start` either returns the handle of the sweep already in flight, or
/// creates a fresh publisher/handle pair for the caller to drive.
#[derive(Debug, Clone, Default)]
pub struct ScanSlot {
    inner: Arc<SlotInner>,
}

#[derive(Debug, Default)]
struct SlotInner {
    current: Mutex<Option<RfScanHandle>>,
    next_id: AtomicU64,
}

/// Outcome of [`ScanSlot::start`].
#[derive(Debug)]
pub enum ScanStart {
    /// A sweep is already running; observe it through this handle.
    InFlight(RfScanHandle),
    /// No sweep was running. The caller owns the publisher and must drive
    /// the sweep to a terminal state.
    New(ScanPublisher, RfScanHandle),
}

impl ScanSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a sweep, or join the one in flight.
    pub fn start(&self, range: FrequencyRange, step_hz: u64) -> ScanStart {
        let mut current = self
            .inner
            .current
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if let Some(handle) = current.as_ref() {
            if !handle.latest().state.is_terminal() {
                return ScanStart::InFlight(handle.clone());
            }
        }
        let scan_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(RfScanData::new(range, step_hz));
        let handle = RfScanHandle { scan_id, rx };
        *current = Some(handle.clone());
        ScanStart::New(ScanPublisher { tx }, handle)
    }

    /// The latest scan data published on this channel, if a sweep has ever
    /// been started.
    pub fn data(&self) -> Option<RfScanData> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .as_ref()
            .map(|h| h.latest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> FrequencyRange {
        FrequencyRange::new(578_000_000, 578_001_000)
    }

    #[test]
    fn expected_samples_counts_endpoints() {
        let data = RfScanData::new(FrequencyRange::new(0, 1000), 250);
        assert_eq!(data.expected_samples(), 5);
        let zero_step = RfScanData::new(range(), 0);
        assert_eq!(zero_step.expected_samples(), 0);
    }

    #[test]
    fn starting_twice_returns_same_in_flight_handle() {
        let slot = ScanSlot::new();
        let first = match slot.start(range(), 25_000) {
            ScanStart::New(_publisher, handle) => handle,
            ScanStart::InFlight(_) => panic!("first start must be new"),
        };
        let second = match slot.start(range(), 25_000) {
            ScanStart::InFlight(handle) => handle,
            ScanStart::New(..) => panic!("second start must join in-flight scan"),
        };
        assert_eq!(first.scan_id(), second.scan_id());
    }

    #[test]
    fn completed_scan_allows_a_new_sweep() {
        let slot = ScanSlot::new();
        let publisher = match slot.start(range(), 25_000) {
            ScanStart::New(publisher, _) => publisher,
            ScanStart::InFlight(_) => panic!(),
        };
        publisher.complete();
        match slot.start(range(), 25_000) {
            ScanStart::New(..) => {}
            ScanStart::InFlight(_) => panic!("terminal scan must not be joined"),
        }
    }

    #[tokio::test]
    async fn wait_resolves_on_completion() {
        let slot = ScanSlot::new();
        let (publisher, handle) = match slot.start(range(), 25_000) {
            ScanStart::New(publisher, handle) => (publisher, handle),
            ScanStart::InFlight(_) => panic!(),
        };
        let waiter = tokio::spawn(handle.wait());
        publisher.update(|d| {
            d.state = RfScanState::Running;
            d.samples.push((578_000_000, -90.0));
        });
        publisher.complete();
        let done = waiter.await.unwrap();
        assert_eq!(done.state, RfScanState::Completed);
        assert_eq!(done.samples.len(), 1);
        assert_eq!(done.progress, 1.0);
    }

    #[tokio::test]
    async fn dropped_publisher_resolves_to_failure() {
        let slot = ScanSlot::new();
        let (publisher, handle) = match slot.start(range(), 25_000) {
            ScanStart::New(publisher, handle) => (publisher, handle),
            ScanStart::InFlight(_) => panic!(),
        };
        drop(publisher);
        let done = handle.wait().await;
        assert_eq!(done.state, RfScanState::Failure);
    }

    #[test]
    fn scan_data_visible_through_slot() {
        let slot = ScanSlot::new();
        assert!(slot.data().is_none());
        let publisher = match slot.start(range(), 25_000) {
            ScanStart::New(publisher, _) => publisher,
            ScanStart::InFlight(_) => panic!(),
        };
        publisher.fail("reserve timed out");
        let data = slot.data().unwrap();
        assert_eq!(data.state, RfScanState::Failure);
        assert_eq!(data.status.as_deref(), Some("reserve timed out"));
    }
}
