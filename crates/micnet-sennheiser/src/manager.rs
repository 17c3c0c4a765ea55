//! The SSC fleet manager: mDNS discovery, socket ownership, subscription
//! renewal, and the device registry.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use micnet_core::{
    ManagerConfig, MicEvent, ReceiverManager, Result, Uid, WirelessMic, WirelessMicReceiver,
    EVENT_CHANNEL_CAPACITY,
};
use micnet_mdns::{DnsMessage, DnsRdata, MdnsClient, RecordType};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::SennheiserChannel;
use crate::link::{OutboundDatagram, SscLink, OUTBOUND_QUEUE_CAPACITY};
use crate::receiver::SennheiserReceiver;

/// Vendor tag hashed into every Sennheiser UID ("SENN").
pub const SENNHEISER_TYPE_TAG: u32 = 0x5345_4E4E;

/// UDP port SSC receivers listen on.
pub const SSC_PORT: u16 = 45;

/// mDNS service name SSC receivers advertise under.
pub const SSC_SERVICE: &str = "_ssc._udp.local";

/// How often the segment is re-queried for receivers.
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);

/// A receiver silent for this long is evicted.
const STALE_TIMEOUT: Duration = Duration::from_secs(5);

/// Subscriptions live for ten seconds; renew at half that.
const RENEW_INTERVAL: Duration = Duration::from_secs(5);

const MAX_UDP_SIZE: usize = 0x2000;

/// Identity a receiver advertises over mDNS.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeviceIdentity {
    id: u64,
    model: String,
    addr: Ipv4Addr,
    port: u16,
}

/// Pull a device identity out of an mDNS response: the TXT record carries
/// `id=<hex>` and `model=<name>`, the A record the address, and the SRV
/// record the control port (defaulting to [`SSC_PORT`] when absent).
fn parse_identity(msg: &DnsMessage) -> Option<DeviceIdentity> {
    let mut id = None;
    let mut model = None;
    let mut addr = None;
    let mut port = SSC_PORT;
    for answer in &msg.answers {
        match &answer.rdata {
            Some(DnsRdata::Txt(entries)) => {
                for entry in entries {
                    if let Some(hex) = entry.strip_prefix("id=") {
                        id = u64::from_str_radix(hex, 16).ok();
                    } else if let Some(name) = entry.strip_prefix("model=") {
                        model = Some(name.to_owned());
                    }
                }
            }
            Some(DnsRdata::A(ip)) => addr = Some(*ip),
            Some(DnsRdata::Srv { port: p, .. }) => port = *p,
            _ => {}
        }
    }
    Some(DeviceIdentity {
        id: id?,
        model: model?,
        addr: addr?,
        port,
    })
}

/// Number of receive channels a model provides. Multichannel units carry
/// the channel count as the trailing token of the model name.
fn channels_for_model(model: &str) -> usize {
    model
        .split_whitespace()
        .last()
        .and_then(|token| token.parse::<usize>().ok())
        .filter(|n| (1..=4).contains(n))
        .unwrap_or(2)
}

#[derive(Debug, Default)]
struct Registry {
    receivers: HashMap<Uid, Arc<SennheiserReceiver>>,
    mics: HashMap<Uid, Arc<SennheiserChannel>>,
    /// SSC replies carry no device id, so inbound datagrams are routed by
    /// source address.
    by_addr: HashMap<IpAddr, Uid>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Manager for all Sennheiser SSC receivers reachable on the local segment.
///
/// Owns an ephemeral control socket and an mDNS client, plus the background
/// tasks that discover devices, route replies, and keep subscriptions alive.
pub struct SennheiserSscManager {
    socket: Arc<UdpSocket>,
    mdns: MdnsClient,
    registry: Arc<Mutex<Registry>>,
    event_tx: broadcast::Sender<MicEvent>,
    out_tx: mpsc::Sender<OutboundDatagram>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    polling_period: Duration,
}

impl SennheiserSscManager {
    /// Bind the control socket and mDNS client and start managing.
    pub async fn start(config: ManagerConfig) -> Result<Arc<Self>> {
        let (mdns, mdns_rx) = MdnsClient::bind(config.preferred_nic).await?;
        let bind = SocketAddr::from((config.preferred_nic.unwrap_or(Ipv4Addr::UNSPECIFIED), 0));
        let socket = UdpSocket::bind(bind).await?;
        tracing::info!(local = %socket.local_addr()?, "Sennheiser SSC manager listening");

        let socket = Arc::new(socket);
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let manager = Arc::new(Self {
            socket,
            mdns,
            registry: Arc::new(Mutex::new(Registry::default())),
            event_tx,
            out_tx,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            polling_period: config.polling_period,
        });

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(Arc::clone(&manager).rx_loop()));
        tasks.push(tokio::spawn(Arc::clone(&manager).tx_loop(out_rx)));
        tasks.push(tokio::spawn(Arc::clone(&manager).discovery_loop()));
        tasks.push(tokio::spawn(Arc::clone(&manager).mdns_loop(mdns_rx)));
        tasks.push(tokio::spawn(Arc::clone(&manager).renew_loop()));
        *lock(&manager.tasks) = tasks;

        Ok(manager)
    }

    /// The bound local address of the control socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn rx_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_UDP_SIZE];
        loop {
            let (len, from) = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(ok) => ok,
                    Err(e) => {
                        tracing::warn!(error = %e, "SSC socket receive failed");
                        continue;
                    }
                },
            };
            let receiver = {
                let registry = lock(&self.registry);
                registry
                    .by_addr
                    .get(&from.ip())
                    .and_then(|uid| registry.receivers.get(uid))
                    .cloned()
            };
            match receiver {
                Some(receiver) => {
                    receiver.handle_text(&String::from_utf8_lossy(&buf[..len]));
                }
                None => {
                    tracing::debug!(%from, "datagram from undiscovered device");
                }
            }
        }
    }

    async fn tx_loop(self: Arc<Self>, mut out_rx: mpsc::Receiver<OutboundDatagram>) {
        loop {
            let datagram = tokio::select! {
                _ = self.cancel.cancelled() => return,
                datagram = out_rx.recv() => match datagram {
                    Some(datagram) => datagram,
                    None => return,
                },
            };
            if let Err(e) = self.socket.send_to(&datagram.payload, datagram.addr).await {
                tracing::debug!(to = %datagram.addr, error = %e, "SSC send failed");
            }
        }
    }

    /// Query the segment for receivers and age out silent ones.
    async fn discovery_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(DISCOVERY_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tick.tick() => {}
            }
            if let Err(e) = self.mdns.send_query(SSC_SERVICE, RecordType::Ptr).await {
                tracing::warn!(error = %e, "mDNS query failed");
            }
            self.evict_stale(Instant::now());
        }
    }

    /// Consume decoded mDNS responses and register what they describe.
    async fn mdns_loop(self: Arc<Self>, mut mdns_rx: mpsc::Receiver<DnsMessage>) {
        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => return,
                msg = mdns_rx.recv() => match msg {
                    Some(msg) => msg,
                    None => return,
                },
            };
            if let Some(identity) = parse_identity(&msg) {
                self.register_or_touch(&identity);
            }
        }
    }

    /// Periodically re-subscribe every receiver before its subscriptions
    /// lapse.
    async fn renew_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(RENEW_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tick.tick() => {}
            }
            let receivers: Vec<Arc<SennheiserReceiver>> =
                lock(&self.registry).receivers.values().cloned().collect();
            for receiver in receivers {
                receiver.renew_subscriptions();
            }
        }
    }

    /// An mDNS answer either refreshes a known receiver or registers a
    /// new one.
    fn register_or_touch(&self, identity: &DeviceIdentity) {
        let uid = Uid::combine(
            (identity.id as u32) ^ ((identity.id >> 32) as u32),
            SENNHEISER_TYPE_TAG,
        );
        {
            let registry = lock(&self.registry);
            if let Some(receiver) = registry.receivers.get(&uid) {
                receiver.touch();
                return;
            }
        }

        let addr = SocketAddr::from((identity.addr, identity.port));
        tracing::info!(%uid, %addr, model = %identity.model, "discovered SSC receiver");
        let link = Arc::new(SscLink::new(
            uid,
            addr,
            self.out_tx.clone(),
            self.event_tx.clone(),
        ));
        let receiver = SennheiserReceiver::new(
            link,
            identity.model.clone(),
            channels_for_model(&identity.model),
            self.polling_period,
        );
        {
            let mut registry = lock(&self.registry);
            for channel in receiver.ssc_channels() {
                registry.mics.insert(channel.uid(), Arc::clone(channel));
            }
            registry.by_addr.insert(addr.ip(), uid);
            registry.receivers.insert(uid, Arc::clone(&receiver));
        }
        let _ = self.event_tx.send(MicEvent::ReceiverAdded { uid });
        receiver.send_startup_messages();
    }

    /// Remove every receiver whose last liveness signal is older than
    /// [`STALE_TIMEOUT`] relative to `now`.
    fn evict_stale(&self, now: Instant) {
        let mut removed = Vec::new();
        {
            let mut registry = lock(&self.registry);
            let stale: Vec<Uid> = registry
                .receivers
                .iter()
                .filter(|(_, r)| now.duration_since(r.last_seen()) > STALE_TIMEOUT)
                .map(|(uid, _)| *uid)
                .collect();
            for uid in stale {
                if let Some(receiver) = registry.receivers.remove(&uid) {
                    for channel in receiver.ssc_channels() {
                        registry.mics.remove(&channel.uid());
                    }
                    registry.by_addr.retain(|_, mapped| *mapped != uid);
                    removed.push(uid);
                }
            }
        }
        for uid in removed {
            tracing::info!(%uid, "evicting stale receiver");
            let _ = self.event_tx.send(MicEvent::ReceiverRemoved { uid });
        }
    }

    #[cfg(test)]
    fn ssc_receiver(&self, uid: Uid) -> Option<Arc<SennheiserReceiver>> {
        lock(&self.registry).receivers.get(&uid).cloned()
    }
}

#[async_trait]
impl ReceiverManager for SennheiserSscManager {
    fn receivers(&self) -> Vec<Arc<dyn WirelessMicReceiver>> {
        lock(&self.registry)
            .receivers
            .values()
            .map(|r| Arc::clone(r) as Arc<dyn WirelessMicReceiver>)
            .collect()
    }

    fn receiver(&self, uid: Uid) -> Option<Arc<dyn WirelessMicReceiver>> {
        lock(&self.registry)
            .receivers
            .get(&uid)
            .map(|r| Arc::clone(r) as Arc<dyn WirelessMicReceiver>)
    }

    fn mic(&self, uid: Uid) -> Option<Arc<dyn WirelessMic>> {
        lock(&self.registry)
            .mics
            .get(&uid)
            .map(|m| Arc::clone(m) as Arc<dyn WirelessMic>)
    }

    fn subscribe(&self) -> broadcast::Receiver<MicEvent> {
        self.event_tx.subscribe()
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.mdns.shutdown().await;
        let uids: Vec<Uid> = {
            let mut registry = lock(&self.registry);
            registry.mics.clear();
            registry.by_addr.clear();
            registry.receivers.drain().map(|(uid, _)| uid).collect()
        };
        for uid in uids {
            let _ = self.event_tx.send(MicEvent::ReceiverRemoved { uid });
        }
    }
}
