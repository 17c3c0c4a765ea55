//! Shared plumbing between a receiver, its channels, and the manager's
//! socket loops.

use std::net::SocketAddr;

use micnet_core::{MicEvent, Uid};
use tokio::sync::{broadcast, mpsc};

use crate::snet;

/// Capacity of the manager's outbound datagram queue. Senders never
/// block: when the queue is full the datagram is dropped with a warning.
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// One datagram waiting for the transmit loop.
#[derive(Debug)]
pub(crate) struct OutboundDatagram {
    pub addr: SocketAddr,
    pub payload: Vec<u8>,
}

/// Handle a receiver and its channels use to reach the wire and the
/// event feed. Cheap to share; owns no tasks.
#[derive(Debug)]
pub(crate) struct ReceiverLink {
    pub uid: Uid,
    pub snet_id: u32,
    pub addr: SocketAddr,
    pub out_tx: mpsc::Sender<OutboundDatagram>,
    pub event_tx: broadcast::Sender<MicEvent>,
}

impl ReceiverLink {
    /// Frame `body` as an sNet message and enqueue it. Fire-and-forget:
    /// a full queue drops the command.
    pub fn send_text(&self, body: &str) {
        tracing::trace!(uid = %self.uid, body, "sending command");
        let payload = snet::encode_message(self.snet_id, body);
        let datagram = OutboundDatagram {
            addr: self.addr,
            payload,
        };
        if self.out_tx.try_send(datagram).is_err() {
            tracing::warn!(uid = %self.uid, body, "outbound queue full, dropping command");
        }
    }

    /// Publish an event; subscribers may or may not exist.
    pub fn emit(&self, event: MicEvent) {
        let _ = self.event_tx.send(event);
    }
}
