//! # micnet-core
//!
//! Core abstractions for the micnet wireless-microphone control library:
//! the [`WirelessMicReceiver`]/[`WirelessMic`] traits every vendor backend
//! implements, the shared value types (UIDs, frequency ranges, metering
//! samples, scan results), the [`Error`] type, and the event model.
//!
//! Vendor protocol drivers live in their own crates (`micnet-shure`,
//! `micnet-sennheiser`); application code usually depends on the `micnet`
//! facade crate, which re-exports everything here.

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod metering;
pub mod scan;
pub mod types;

pub use config::ManagerConfig;
pub use device::{ReceiverManager, WirelessMic, WirelessMicReceiver};
pub use error::{Error, Result};
pub use events::{ChannelProp, MicEvent, ReceiverProp, EVENT_CHANNEL_CAPACITY};
pub use metering::{MeterQueue, MAX_METER_SAMPLES};
pub use scan::{RfScanData, RfScanHandle, RfScanState, ScanPublisher, ScanSlot, ScanStart};
pub use types::{
    ChannelSnapshot, DiversityIndicator, FrequencyRange, IpConfig, IpMode, LockMode, MacAddress,
    MeteringData, ReceiverSnapshot, Uid,
};
