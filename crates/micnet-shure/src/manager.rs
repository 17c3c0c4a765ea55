//! The UHF-R fleet manager: socket ownership, discovery, liveness, and
//! the device registry.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use micnet_core::{
    ManagerConfig, MicEvent, ReceiverManager, Result, Uid, WirelessMic, WirelessMicReceiver,
    EVENT_CHANNEL_CAPACITY,
};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::ShureChannel;
use crate::link::{OutboundDatagram, ReceiverLink, OUTBOUND_QUEUE_CAPACITY};
use crate::receiver::ShureReceiver;
use crate::snet::{self, SnetHeader, SnetKind, ALL_DEVICES_ID, HEADER_SIZE, MANAGER_SNET_ID};

/// Vendor tag hashed into every Shure UID ("SHUR").
pub const SHURE_TYPE_TAG: u32 = 0x5348_5552;

/// UDP port UHF-R receivers listen and answer on.
pub const CONTROL_PORT: u16 = 2201;

/// How often known receivers are pinged and the segment is re-probed.
const PING_INTERVAL: Duration = Duration::from_millis(500);

/// A receiver silent for this long is evicted.
const STALE_TIMEOUT: Duration = Duration::from_secs(5);

/// The `METER` command's interval argument is expressed in 30 ms frames.
const METER_FRAME: Duration = Duration::from_millis(30);

#[derive(Debug, Default)]
struct Registry {
    receivers: HashMap<Uid, Arc<ShureReceiver>>,
    mics: HashMap<Uid, Arc<ShureChannel>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Manager for all Shure UHF-R receivers reachable on the local segment.
///
/// Owns the sNet socket and three background tasks: a receive loop, a
/// transmit loop draining the bounded outbound queue, and a ping loop that
/// probes for new devices and evicts stale ones.
pub struct ShureUhfrManager {
    socket: Arc<UdpSocket>,
    registry: Arc<Mutex<Registry>>,
    event_tx: broadcast::Sender<MicEvent>,
    out_tx: mpsc::Sender<OutboundDatagram>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    meter_frames: u32,
}

impl ShureUhfrManager {
    /// Bind the sNet control port on all interfaces and start managing.
    pub async fn start(config: ManagerConfig) -> Result<Arc<Self>> {
        let bind = SocketAddr::from((
            config.preferred_nic.unwrap_or(Ipv4Addr::UNSPECIFIED),
            CONTROL_PORT,
        ));
        Self::start_on(config, bind).await
    }

    /// Bind a specific local address. Exposed so tests can use an
    /// ephemeral loopback port.
    pub async fn start_on(config: ManagerConfig, bind: SocketAddr) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind).await?;
        socket.set_broadcast(true)?;
        let local = socket.local_addr()?;
        tracing::info!(%local, "Shure UHF-R manager listening");

        let socket = Arc::new(socket);
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let meter_frames =
            ((config.meter_interval.as_millis() / METER_FRAME.as_millis()) as u32).max(1);

        let manager = Arc::new(Self {
            socket,
            registry: Arc::new(Mutex::new(Registry::default())),
            event_tx,
            out_tx,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            meter_frames,
        });

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(Arc::clone(&manager).rx_loop()));
        tasks.push(tokio::spawn(Arc::clone(&manager).tx_loop(out_rx)));
        tasks.push(tokio::spawn(Arc::clone(&manager).ping_loop()));
        *lock(&manager.tasks) = tasks;

        // Probe immediately rather than waiting for the first ping tick.
        manager.send_probe();
        Ok(manager)
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn rx_loop(self: Arc<Self>) {
        let mut buf = [0u8; 2048];
        loop {
            let (len, from) = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(ok) => ok,
                    Err(e) => {
                        tracing::warn!(error = %e, "sNet socket receive failed");
                        continue;
                    }
                },
            };
            self.handle_datagram(&buf[..len], from);
        }
    }

    fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let header = match SnetHeader::parse(data) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!(%from, error = %e, "dropping undecodable datagram");
                return;
            }
        };
        // Our own broadcast probe can loop back.
        if header.src_id == MANAGER_SNET_ID {
            return;
        }
        match header.kind {
            SnetKind::Discovery => self.register_or_touch(header.src_id, from),
            SnetKind::Message => {
                let end = (HEADER_SIZE + header.payload_len as usize).min(data.len());
                let text = String::from_utf8_lossy(&data[HEADER_SIZE..end]);
                let uid = Uid::combine(header.src_id, SHURE_TYPE_TAG);
                let receiver = lock(&self.registry).receivers.get(&uid).cloned();
                match receiver {
                    Some(receiver) => receiver.handle_text(text.trim_end_matches('\0').trim()),
                    None => {
                        tracing::debug!(%from, %uid, "message from unregistered device");
                    }
                }
            }
            SnetKind::Special => {}
            SnetKind::Unknown(kind) => {
                tracing::debug!(%from, kind, "ignoring unknown sNet message kind");
            }
        }
    }

    /// A discovery reply either refreshes a known receiver or registers a
    /// new one at the datagram's source address.
    fn register_or_touch(&self, snet_id: u32, from: SocketAddr) {
        let uid = Uid::combine(snet_id, SHURE_TYPE_TAG);
        {
            let registry = lock(&self.registry);
            if let Some(receiver) = registry.receivers.get(&uid) {
                receiver.touch();
                return;
            }
        }

        tracing::info!(%uid, %from, snet_id, "discovered UHF-R receiver");
        let link = Arc::new(ReceiverLink {
            uid,
            snet_id,
            addr: from,
            out_tx: self.out_tx.clone(),
            event_tx: self.event_tx.clone(),
        });
        let receiver = ShureReceiver::new(link, self.meter_frames);
        {
            let mut registry = lock(&self.registry);
            for channel in receiver.shure_channels() {
                registry.mics.insert(channel.uid(), Arc::clone(channel));
            }
            registry.receivers.insert(uid, Arc::clone(&receiver));
        }
        let _ = self.event_tx.send(MicEvent::ReceiverAdded { uid });
        receiver.send_startup_commands();
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
                tracing::debug!(to = %datagram.addr, error = %e, "sNet send failed");
            }
        }
    }

    async fn ping_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(PING_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tick.tick() => {}
            }
            self.send_probe();
            let known: Vec<SocketAddr> = lock(&self.registry)
                .receivers
                .values()
                .map(|r| r.address())
                .collect();
            for addr in known {
                self.enqueue(addr, snet::encode_discovery());
            }
            self.evict_stale(Instant::now());
        }
    }

    /// Broadcast a discovery probe to the whole segment.
    fn send_probe(&self) {
        let broadcast = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, CONTROL_PORT));
        self.enqueue(broadcast, snet::encode_discovery());
    }

    fn enqueue(&self, addr: SocketAddr, payload: Vec<u8>) {
        if self
            .out_tx
            .try_send(OutboundDatagram { addr, payload })
            .is_err()
        {
            tracing::warn!(%addr, "outbound queue full, dropping probe");
        }
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
                    for channel in receiver.shure_channels() {
                        registry.mics.remove(&channel.uid());
                    }
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
    fn shure_receiver(&self, uid: Uid) -> Option<Arc<ShureReceiver>> {
        lock(&self.registry).receivers.get(&uid).cloned()
    }
}

#[async_trait]
impl ReceiverManager for ShureUhfrManager {
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
        let uids: Vec<Uid> = {
            let mut registry = lock(&self.registry);
            registry.mics.clear();
            registry.receivers.drain().map(|(uid, _)| uid).collect()
        };
        for uid in uids {
            let _ = self.event_tx.send(MicEvent::ReceiverRemoved { uid });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const DEVICE_SNET_ID: u32 = 0x0102_0304;

    /// A fake UHF-R on loopback: answers nothing by itself, but lets tests
    /// inject frames and observe what the manager sends.
    struct FakeDevice {
        socket: tokio::net::UdpSocket,
        manager_addr: SocketAddr,
    }

    impl FakeDevice {
        async fn bind(manager_addr: SocketAddr) -> Self {
            let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
            Self {
                socket,
                manager_addr,
            }
        }

        fn uid(&self) -> Uid {
            Uid::combine(DEVICE_SNET_ID, SHURE_TYPE_TAG)
        }

        /// Announce ourselves with a discovery frame.
        async fn announce(&self) {
            let header = SnetHeader::new(ALL_DEVICES_ID, DEVICE_SNET_ID, SnetKind::Discovery, 8);
            let mut frame = vec![0u8; HEADER_SIZE];
            let mut head = [0u8; HEADER_SIZE];
            header.write_to(&mut head);
            frame.copy_from_slice(&head);
            frame.extend_from_slice(&1u16.to_be_bytes());
            frame.extend_from_slice(&1u16.to_be_bytes());
            frame.extend_from_slice(&DEVICE_SNET_ID.to_be_bytes());
            self.socket.send_to(&frame, self.manager_addr).await.unwrap();
        }

        async fn send_command(&self, body: &str) {
            let header = SnetHeader::new(
                MANAGER_SNET_ID,
                DEVICE_SNET_ID,
                SnetKind::Message,
                body.len() as u16,
            );
            let mut head = [0u8; HEADER_SIZE];
            header.write_to(&mut head);
            let mut frame = head.to_vec();
            frame.extend_from_slice(body.as_bytes());
            self.socket.send_to(&frame, self.manager_addr).await.unwrap();
        }

        /// Receive one frame from the manager and return its text body.
        async fn recv_body(&self) -> String {
            let mut buf = [0u8; 2048];
            let (len, _) = self.socket.recv_from(&mut buf).await.unwrap();
            String::from_utf8_lossy(&buf[HEADER_SIZE..len]).into_owned()
        }
    }

    async fn started_manager() -> Arc<ShureUhfrManager> {
        ShureUhfrManager::start_on(ManagerConfig::default(), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn discovery_registers_receiver_and_requests_state() {
        let manager = started_manager().await;
        let mut events = manager.subscribe();
        let device = FakeDevice::bind(manager.local_addr().unwrap()).await;

        device.announce().await;
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, MicEvent::ReceiverAdded { uid: device.uid() });

        // The startup burst asks for receiver and channel state.
        let mut bodies = Vec::new();
        for _ in 0..5 {
            bodies.push(
                timeout(Duration::from_secs(2), device.recv_body())
                    .await
                    .unwrap(),
            );
        }
        assert!(bodies.iter().any(|b| b == "* GET MODEL_NAME *"));

        let receiver = manager.receiver(device.uid()).unwrap();
        assert_eq!(receiver.num_channels(), 2);
        assert!(manager.mic(device.uid().channel(0)).is_some());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn second_announcement_does_not_duplicate() {
        let manager = started_manager().await;
        let device = FakeDevice::bind(manager.local_addr().unwrap()).await;

        device.announce().await;
        device.announce().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.receivers().len(), 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn mute_report_reaches_channel_state_and_events() {
        let manager = started_manager().await;
        let device = FakeDevice::bind(manager.local_addr().unwrap()).await;
        device.announce().await;

        // Wait for registration before injecting the report.
        let mut events = manager.subscribe();
        timeout(Duration::from_secs(2), async {
            while manager.receiver(device.uid()).is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        device.send_command("* REPORT 1 MUTE ON *").await;
        let event = timeout(Duration::from_secs(2), async {
            loop {
                if let MicEvent::ChannelPropertyChanged { uid, prop } =
                    events.recv().await.unwrap()
                {
                    break (uid, prop);
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event.0, device.uid().channel(0));
        assert_eq!(event.1, micnet_core::ChannelProp::Mute);

        let mic = manager.mic(device.uid().channel(0)).unwrap();
        assert_eq!(mic.snapshot().mute, Some(true));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn note_gets_exactly_one_acknowledgement() {
        let manager = started_manager().await;
        let device = FakeDevice::bind(manager.local_addr().unwrap()).await;
        device.announce().await;
        timeout(Duration::from_secs(2), async {
            while manager.receiver(device.uid()).is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // Drain the startup burst for a fixed window.
        let deadline = tokio::time::Instant::now() + Duration::from_millis(600);
        while tokio::time::timeout_at(deadline, device.recv_body()).await.is_ok() {}

        device.send_command("* NOTE 7 2 FREQUENCY 614000 *").await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut noted = 0;
        while let Ok(body) = tokio::time::timeout_at(deadline, device.recv_body()).await {
            if body == "* NOTED 7 *" {
                noted += 1;
            }
        }
        assert_eq!(noted, 1);

        let mic = manager.mic(device.uid().channel(1)).unwrap();
        assert_eq!(mic.snapshot().frequency_hz, Some(614_000_000));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn silent_receiver_is_evicted() {
        let manager = started_manager().await;
        let mut events = manager.subscribe();
        let device = FakeDevice::bind(manager.local_addr().unwrap()).await;
        device.announce().await;
        timeout(Duration::from_secs(2), async {
            while manager.receiver(device.uid()).is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(events.recv().await.unwrap(), MicEvent::ReceiverAdded { uid: device.uid() });

        // Backdate the liveness stamp instead of waiting out the timeout.
        let receiver = manager.shure_receiver(device.uid()).unwrap();
        receiver.set_last_seen(Instant::now() - STALE_TIMEOUT - Duration::from_secs(1));
        manager.evict_stale(Instant::now());

        assert!(manager.receiver(device.uid()).is_none());
        assert!(manager.mic(device.uid().channel(0)).is_none());
        let event = timeout(Duration::from_secs(2), async {
            loop {
                if let MicEvent::ReceiverRemoved { uid } = events.recv().await.unwrap() {
                    break uid;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, device.uid());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_removes_all_receivers() {
        let manager = started_manager().await;
        let device = FakeDevice::bind(manager.local_addr().unwrap()).await;
        device.announce().await;
        timeout(Duration::from_secs(2), async {
            while manager.receivers().len() != 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let mut events = manager.subscribe();
        manager.shutdown().await;
        assert!(manager.receivers().is_empty());
        assert_eq!(
            events.recv().await.unwrap(),
            MicEvent::ReceiverRemoved { uid: device.uid() }
        );
    }
}
