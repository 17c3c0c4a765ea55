//! Async multicast mDNS client.
//!
//! Binds an ephemeral UDP socket (on the preferred interface when one is
//! configured), sends PTR queries to the mDNS group with the
//! unicast-response bit set, and delivers decoded responses through an
//! [`mpsc`] channel. Only responses whose transaction id matches a query
//! this client sent are delivered; everything else on the wire is ignored.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use micnet_core::{Error, Result};

use crate::codec::{encode_query, DnsMessage, RecordType};

/// The well-known mDNS multicast group and port.
pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_PORT: u16 = 5353;

const MAX_UDP_SIZE: usize = 0x2000;

/// Active-query map hygiene: once more than this many ids are pending,
/// ids older than [`QUERY_EXPIRY`] are purged.
const MAX_ACTIVE_QUERIES: usize = 32;
const QUERY_EXPIRY: Duration = Duration::from_secs(10);

/// Capacity of the decoded-message delivery channel.
const MESSAGE_CHANNEL_CAPACITY: usize = 64;

/// An mDNS discovery client.
///
/// Dropping the client does not stop the receive task; call
/// [`shutdown`](MdnsClient::shutdown).
#[derive(Debug)]
pub struct MdnsClient {
    socket: Arc<UdpSocket>,
    active: Arc<Mutex<HashMap<u16, Instant>>>,
    cancel: CancellationToken,
    rx_task: JoinHandle<()>,
}

impl MdnsClient {
    /// Bind a socket and start the receive loop. Returns the client and
    /// the stream of decoded response messages.
    pub async fn bind(preferred_nic: Option<Ipv4Addr>) -> Result<(Self, mpsc::Receiver<DnsMessage>)> {
        let local = SocketAddr::from((preferred_nic.unwrap_or(Ipv4Addr::UNSPECIFIED), 0));
        let socket = Arc::new(UdpSocket::bind(local).await?);
        tracing::info!(local = %socket.local_addr()?, "mDNS client bound");

        let active: Arc<Mutex<HashMap<u16, Instant>>> = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let (msg_tx, msg_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);

        let rx_task = tokio::spawn(rx_loop(
            Arc::clone(&socket),
            Arc::clone(&active),
            msg_tx,
            cancel.clone(),
        ));

        Ok((
            Self {
                socket,
                active,
                cancel,
                rx_task,
            },
            msg_rx,
        ))
    }

    /// Send a query for `name` to the multicast group. Returns the
    /// transaction id the responses will carry.
    pub async fn send_query(&self, name: &str, rtype: RecordType) -> Result<u16> {
        let id = self.register_query()?;
        let datagram = encode_query(id, name, rtype);
        self.socket
            .send_to(&datagram, (MDNS_GROUP, MDNS_PORT))
            .await?;
        tracing::trace!(name, id, "sent mDNS query");
        Ok(id)
    }

    /// Allocate an unused transaction id and record it as active,
    /// purging expired ids when the map has grown past its bound.
    fn register_query(&self) -> Result<u16> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut rng = rand::thread_rng();
        let mut id = rng.gen::<u16>();
        let mut attempts = 0;
        while active.contains_key(&id) {
            id = rng.gen::<u16>();
            attempts += 1;
            if attempts > 64 {
                return Err(Error::Transport("no free mDNS transaction ids".into()));
            }
        }
        active.insert(id, Instant::now());
        if active.len() > MAX_ACTIVE_QUERIES {
            let now = Instant::now();
            active.retain(|_, sent| now.duration_since(*sent) <= QUERY_EXPIRY);
        }
        Ok(id)
    }

    /// Stop the receive loop and release the socket.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.rx_task.abort();
    }
}

async fn rx_loop(
    socket: Arc<UdpSocket>,
    active: Arc<Mutex<HashMap<u16, Instant>>>,
    msg_tx: mpsc::Sender<DnsMessage>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_UDP_SIZE];
    loop {
        let (len, src) = tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "mDNS socket read failed");
                    continue;
                }
            },
        };

        let msg = match DnsMessage::parse(&buf[..len]) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(%src, error = %e, "dropping undecodable mDNS datagram");
                continue;
            }
        };

        // Only deliver responses we asked for; consume the id.
        let ours = {
            let mut active = active.lock().unwrap_or_else(|poison| poison.into_inner());
            active.remove(&msg.header.transaction_id).is_some()
        };
        if !ours {
            tracing::trace!(
                id = msg.header.transaction_id,
                %src,
                "ignoring mDNS message for unknown transaction"
            );
            continue;
        }

        if msg_tx.send(msg).await.is_err() {
            // Consumer dropped the stream; nothing left to deliver to.
            break;
        }
    }
    tracing::debug!("mDNS receive loop stopped");
}
