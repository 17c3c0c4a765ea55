//! # micnet-shure
//!
//! Shure UHF-R backend for micnet, speaking the "sNet" protocol: UDP
//! datagrams on port 2201 framed with a 16-byte big-endian header and a
//! CRC-16 checksum, carrying ASCII command bodies of the form
//! `"* REPORT 1 MUTE ON *"`.
//!
//! [`ShureUhfrManager`] owns the socket and discovers receivers by
//! broadcasting probes; each [`ShureReceiver`] carries two
//! [`ShureChannel`]s implementing the vendor-agnostic
//! [`micnet_core::WirelessMic`] trait.
//!
//! | module     | concern                                         |
//! |------------|-------------------------------------------------|
//! | `snet`     | datagram framing and CRC-16                     |
//! | `commands` | the `"* ... *"` ASCII command grammar           |
//! | `manager`  | socket, discovery, liveness, registry           |
//! | `receiver` | receiver-level state and routing                |
//! | `channel`  | channel state, metering, setters, RF scans      |

mod channel;
pub mod commands;
mod link;
mod manager;
mod receiver;
mod scan;
pub mod snet;

pub use channel::ShureChannel;
pub use manager::{ShureUhfrManager, CONTROL_PORT, SHURE_TYPE_TAG};
pub use receiver::ShureReceiver;
