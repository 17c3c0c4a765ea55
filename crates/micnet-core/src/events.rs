//! Asynchronous device event types.
//!
//! Events are emitted by vendor managers through a [`tokio::sync::broadcast`]
//! channel as receivers appear, disappear, or report state changes. External
//! notification layers subscribe to these instead of polling.

use crate::types::Uid;

/// Capacity of the per-manager broadcast event channel.
///
/// Slow consumers that fall more than this many events behind will observe
/// a `Lagged` error and miss events, which is acceptable for UI-style
/// subscribers that re-read snapshots on reconnect.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A receiver-level property that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverProp {
    ModelName,
    Manufacturer,
    FirmwareVersion,
    FreqBand,
    FrequencyRanges,
    IpAddress,
    Subnet,
    Gateway,
    IpMode,
    MacAddress,
}

/// A channel-level property that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelProp {
    Name,
    Gain,
    Sensitivity,
    OutputGain,
    Mute,
    Frequency,
    Group,
    ChannelNumber,
    LockMode,
    TransmitterType,
    BatteryLevel,
    TransmitterConnected,
    RfScan,
}

/// An event emitted by a vendor manager.
///
/// Delivered best-effort over a bounded broadcast channel. Every variant
/// carries the UID of the entity it concerns; consumers fetch the new value
/// through a snapshot rather than from the event itself, so a missed event
/// never leaves a subscriber with stale data after the next read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MicEvent {
    /// A new receiver was discovered and registered.
    ReceiverAdded { uid: Uid },

    /// A receiver was evicted (stale) or the manager shut down.
    ReceiverRemoved { uid: Uid },

    /// A receiver-level property changed.
    ReceiverPropertyChanged { uid: Uid, prop: ReceiverProp },

    /// A channel-level property changed.
    ChannelPropertyChanged { uid: Uid, prop: ChannelProp },
}
