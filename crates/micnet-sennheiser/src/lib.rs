//! # micnet-sennheiser
//!
//! Sennheiser Sound Control (SSC) support for micnet: JSON-over-UDP
//! control of EW-DX-class receivers discovered via mDNS.
//!
//! | Module     | Responsibility                                          |
//! |------------|---------------------------------------------------------|
//! | `commands` | SSC message construction and value mapping              |
//! | `link`     | Shared outbound/event plumbing per receiver             |
//! | `manager`  | Discovery, routing, subscription renewal, registry      |
//! | `receiver` | Per-device JSON dispatch and receiver state             |
//! | `channel`  | Per-channel state, setters, metering                    |
//! | `scan`     | Client-driven RF spectrum sweeps                        |
//!
//! Devices advertise under `_ssc._udp.local`; state flows back through
//! subscriptions the manager renews on a fixed interval. All state is
//! cached locally and read through the `micnet-core` traits.

mod channel;
pub mod commands;
mod link;
mod manager;
mod receiver;
mod scan;

pub use channel::SennheiserChannel;
pub use manager::{SennheiserSscManager, SENNHEISER_TYPE_TAG, SSC_PORT, SSC_SERVICE};
pub use receiver::SennheiserReceiver;
