//! Shared plumbing between an SSC receiver, its channels, and the
//! manager's socket loops.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};

use micnet_core::{MicEvent, Uid};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

/// Capacity of the manager's outbound datagram queue. Senders never
/// block: when the queue is full the message is dropped with a warning.
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
pub(crate) struct SscLink {
    pub uid: Uid,
    pub addr: SocketAddr,
    pub out_tx: mpsc::Sender<OutboundDatagram>,
    pub event_tx: broadcast::Sender<MicEvent>,
    next_xid: AtomicU32,
}

impl SscLink {
    pub fn new(
        uid: Uid,
        addr: SocketAddr,
        out_tx: mpsc::Sender<OutboundDatagram>,
        event_tx: broadcast::Sender<MicEvent>,
    ) -> Self {
        Self {
            uid,
            addr,
            out_tx,
            event_tx,
            next_xid: AtomicU32::new(1),
        }
    }

    /// The next subscription transaction id.
    pub fn next_xid(&self) -> u32 {
        self.next_xid.fetch_add(1, Ordering::Relaxed)
    }

    /// Serialize `message` and enqueue it. Fire-and-forget: a full
    /// queue drops the message.
    pub fn send_json(&self, message: &Value) {
        tracing::trace!(uid = %self.uid, %message, "sending SSC message");
        let datagram = OutboundDatagram {
            addr: self.addr,
            payload: message.to_string().into_bytes(),
        };
        if self.out_tx.try_send(datagram).is_err() {
            tracing::warn!(uid = %self.uid, "outbound queue full, dropping SSC message");
        }
    }

    /// Publish an event; subscribers may or may not exist.
    pub fn emit(&self, event: MicEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use micnet_core::EVENT_CHANNEL_CAPACITY;
    use serde_json::json;

    fn test_link(queue: usize) -> (SscLink, mpsc::Receiver<OutboundDatagram>) {
        let (out_tx, out_rx) = mpsc::channel(queue);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let link = SscLink::new(
            Uid::combine(1, 2),
            "127.0.0.1:45".parse().unwrap(),
            out_tx,
            event_tx,
        );
        (link, out_rx)
    }

    #[test]
    fn xids_increase_monotonically() {
        let (link, _out) = test_link(4);
        let first = link.next_xid();
        assert_eq!(link.next_xid(), first + 1);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (link, mut out) = test_link(2);
        link.send_json(&json!({"rx1": {"mute": true}}));
        link.send_json(&json!({"rx1": {"mute": false}}));
        link.send_json(&json!({"rx2": {"mute": true}}));
        assert!(out.try_recv().is_ok());
        assert!(out.try_recv().is_ok());
        assert!(out.try_recv().is_err());
    }
}
