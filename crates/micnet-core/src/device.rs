//! The vendor-agnostic device abstraction.
//!
//! Every vendor backend exposes its hardware through these traits so that
//! application code can hold `Arc<dyn WirelessMicReceiver>` and remain
//! vendor-agnostic. Getters return the last-known cached value as a
//! snapshot; setters are fire-and-forget: they format and enqueue a
//! protocol command and return immediately, with confirmed state arriving
//! asynchronously through inbound messages and change events.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::events::MicEvent;
use crate::scan::{RfScanData, RfScanHandle};
use crate::types::{
    ChannelSnapshot, FrequencyRange, IpConfig, LockMode, MeteringData, ReceiverSnapshot, Uid,
};

/// A physical wireless-microphone base unit with one or more channels.
pub trait WirelessMicReceiver: Send + Sync {
    /// Stable identity, independent of network address.
    fn uid(&self) -> Uid;

    /// The device's current control endpoint.
    fn address(&self) -> SocketAddr;

    fn num_channels(&self) -> usize;

    /// The channel at `index` (0-based), or `None` past the end.
    fn channel(&self, index: usize) -> Option<Arc<dyn WirelessMic>>;

    /// All channels, in index order.
    fn channels(&self) -> Vec<Arc<dyn WirelessMic>>;

    /// Copy of all cached receiver-level properties.
    fn snapshot(&self) -> ReceiverSnapshot;

    /// When a liveness signal for this device was last observed.
    fn last_seen(&self) -> Instant;

    /// Push a static or DHCP IP configuration to the device.
    fn set_ip_config(&self, config: IpConfig) -> Result<()>;

    /// Ask the device to identify itself physically (flash its display).
    fn identify(&self) -> Result<()>;

    /// Ask the device to reboot.
    fn reboot(&self) -> Result<()>;
}

/// One tunable RF receive path on a receiver, paired with a transmitter.
pub trait WirelessMic: Send + Sync {
    fn uid(&self) -> Uid;

    /// UID of the owning receiver.
    fn receiver_uid(&self) -> Uid;

    /// 0-based index of this channel on its receiver.
    fn channel_index(&self) -> usize;

    /// Copy of all cached channel-level properties.
    fn snapshot(&self) -> ChannelSnapshot;

    fn set_name(&self, name: &str) -> Result<()>;
    fn set_gain(&self, db: i32) -> Result<()>;
    fn set_sensitivity(&self, db: i32) -> Result<()>;
    fn set_output_gain(&self, db: i32) -> Result<()>;
    fn set_mute(&self, mute: bool) -> Result<()>;
    fn set_frequency(&self, hz: u64) -> Result<()>;
    fn set_group_channel(&self, group: i32, channel: i32) -> Result<()>;
    fn set_lock_mode(&self, mode: LockMode) -> Result<()>;

    /// The most recent metering sample, without consuming the queue.
    fn last_meter(&self) -> Option<MeteringData>;

    /// Drain all queued metering samples, oldest first.
    fn drain_meters(&self) -> Vec<MeteringData>;

    /// Begin a spectrum sweep, or join the one already in flight on this
    /// channel (both callers get handles onto the same sweep).
    fn start_rf_scan(&self, range: FrequencyRange, step_hz: u64) -> Result<RfScanHandle>;

    /// The latest scan result, if a sweep has ever been started.
    fn rf_scan_data(&self) -> Option<RfScanData>;
}

/// A vendor backend: owns the socket(s), discovery, and device registry.
#[async_trait]
pub trait ReceiverManager: Send + Sync {
    /// All currently registered receivers.
    fn receivers(&self) -> Vec<Arc<dyn WirelessMicReceiver>>;

    /// Look up a receiver by UID.
    fn receiver(&self, uid: Uid) -> Option<Arc<dyn WirelessMicReceiver>>;

    /// Look up a channel by its own UID.
    fn mic(&self, uid: Uid) -> Option<Arc<dyn WirelessMic>>;

    /// Subscribe to add/remove and property-changed events.
    fn subscribe(&self) -> broadcast::Receiver<MicEvent>;

    /// Stop all background tasks and release the socket.
    async fn shutdown(&self);
}
