//! # micnet -- Wireless Microphone Fleet Control
//!
//! `micnet` is an asynchronous Rust library for monitoring and controlling
//! networked wireless microphone receivers from Shure and Sennheiser. It is
//! built for venue control software, monitoring dashboards, and RF
//! coordination tools that need live state from every receiver on the
//! network without polling hardware by hand.
//!
//! ## Quick Start
//!
//! Add `micnet` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! micnet = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! Start a manager and watch the fleet:
//!
//! ```no_run
//! use micnet::{
//!     ManagerConfig, MicEvent, ReceiverManager, WirelessMicManager, WirelessMicReceiver,
//! };
//!
//! #[tokio::main]
//! async fn main() -> micnet::Result<()> {
//!     let manager = WirelessMicManager::start(ManagerConfig::default()).await?;
//!     let mut events = manager.subscribe();
//!     loop {
//!         match events.recv().await {
//!             Ok(MicEvent::ReceiverAdded { uid }) => {
//!                 if let Some(receiver) = manager.receiver(uid) {
//!                     println!("found {:?}", receiver.snapshot().model_name);
//!                 }
//!             }
//!             Ok(event) => println!("{event:?}"),
//!             Err(_) => break,
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                | Purpose                                        |
//! |----------------------|------------------------------------------------|
//! | `micnet-core`        | Traits, types, events, errors, metering        |
//! | `micnet-mdns`        | DNS codec + async multicast mDNS client        |
//! | `micnet-shure`       | Shure UHF-R sNet binary/text protocol driver   |
//! | `micnet-sennheiser`  | Sennheiser SSC JSON-over-UDP protocol driver   |
//! | **`micnet`**         | This facade crate -- re-exports everything     |
//!
//! Both vendor drivers implement the [`ReceiverManager`],
//! [`WirelessMicReceiver`], and [`WirelessMic`] traits, so application code
//! can stay vendor-agnostic. [`WirelessMicManager`] runs every enabled
//! vendor backend behind one registry and one event stream.
//!
//! ## Feature Flags
//!
//! Each vendor backend is gated behind a feature flag:
//!
//! | Feature      | Enables                              | Default |
//! |--------------|--------------------------------------|---------|
//! | `shure`      | [`shure`] module (sNet protocol)     | yes     |
//! | `sennheiser` | [`sennheiser`] module (SSC protocol) | yes     |
//!
//! ## Events
//!
//! All drivers emit [`MicEvent`]s through a broadcast channel: receivers
//! appearing and disappearing, receiver property changes, and channel
//! property changes. Cached state is read synchronously through snapshots;
//! setters are fire-and-forget protocol commands.

pub use micnet_core::*;

/// Shure UHF-R protocol backend.
///
/// Provides [`ShureUhfrManager`](shure::ShureUhfrManager), which discovers
/// receivers with sNet broadcast probes on UDP port 2201 and speaks the
/// framed `"* CMD ... *"` text grammar.
#[cfg(feature = "shure")]
pub mod shure {
    pub use micnet_shure::*;
}

/// Sennheiser SSC protocol backend.
///
/// Provides [`SennheiserSscManager`](sennheiser::SennheiserSscManager),
/// which discovers receivers via mDNS (`_ssc._udp.local`) and speaks
/// JSON-over-UDP with subscription renewal.
#[cfg(feature = "sennheiser")]
pub mod sennheiser {
    pub use micnet_sennheiser::*;
}

mod manager;

pub use manager::WirelessMicManager;
