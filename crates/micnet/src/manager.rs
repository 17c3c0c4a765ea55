//! The cross-vendor registry: every enabled backend behind one lookup
//! surface and one event stream.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use micnet_core::{
    ManagerConfig, MicEvent, ReceiverManager, Result, Uid, WirelessMic, WirelessMicReceiver,
    EVENT_CHANNEL_CAPACITY,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Aggregates every vendor manager into a single registry.
///
/// Receiver and mic lookups scan the vendor managers in order; events from
/// each vendor's broadcast channel are forwarded into one fused stream.
pub struct WirelessMicManager {
    managers: Vec<Arc<dyn ReceiverManager>>,
    event_tx: broadcast::Sender<MicEvent>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WirelessMicManager {
    /// Start every vendor backend enabled by feature flags.
    pub async fn start(config: ManagerConfig) -> Result<Arc<Self>> {
        let mut managers: Vec<Arc<dyn ReceiverManager>> = Vec::new();
        #[cfg(feature = "shure")]
        {
            managers.push(micnet_shure::ShureUhfrManager::start(config.clone()).await?);
        }
        #[cfg(feature = "sennheiser")]
        {
            managers.push(micnet_sennheiser::SennheiserSscManager::start(config.clone()).await?);
        }
        #[cfg(not(any(feature = "shure", feature = "sennheiser")))]
        let _ = config;
        Ok(Self::from_managers(managers))
    }

    /// Aggregate already-running managers. Useful when an application
    /// starts backends with different configurations.
    pub fn from_managers(managers: Vec<Arc<dyn ReceiverManager>>) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let mut tasks = Vec::new();
        for manager in &managers {
            tasks.push(tokio::spawn(forward_events(
                manager.subscribe(),
                event_tx.clone(),
                cancel.clone(),
            )));
        }

        Arc::new(Self {
            managers,
            event_tx,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }
}

/// Forward one vendor's events into the fused stream until the vendor
/// channel closes.
async fn forward_events(
    mut source: broadcast::Receiver<MicEvent>,
    sink: broadcast::Sender<MicEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = source.recv() => event,
        };
        match event {
            Ok(event) => {
                let _ = sink.send(event);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "event forwarder lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[async_trait]
impl ReceiverManager for WirelessMicManager {
    fn receivers(&self) -> Vec<Arc<dyn WirelessMicReceiver>> {
        self.managers
            .iter()
            .flat_map(|m| m.receivers())
            .collect()
    }

    fn receiver(&self, uid: Uid) -> Option<Arc<dyn WirelessMicReceiver>> {
        self.managers.iter().find_map(|m| m.receiver(uid))
    }

    fn mic(&self, uid: Uid) -> Option<Arc<dyn WirelessMic>> {
        self.managers.iter().find_map(|m| m.mic(uid))
    }

    fn subscribe(&self) -> broadcast::Receiver<MicEvent> {
        self.event_tx.subscribe()
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        for manager in &self.managers {
            manager.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    use micnet_core::{IpConfig, ReceiverSnapshot};
    use tokio::time::timeout;

    #[derive(Debug)]
    struct StubReceiver {
        uid: Uid,
    }

    impl WirelessMicReceiver for StubReceiver {
        fn uid(&self) -> Uid {
            self.uid
        }

        fn address(&self) -> SocketAddr {
            "127.0.0.1:0".parse().unwrap()
        }

        fn num_channels(&self) -> usize {
            0
        }

        fn channel(&self, _index: usize) -> Option<Arc<dyn WirelessMic>> {
            None
        }

        fn channels(&self) -> Vec<Arc<dyn WirelessMic>> {
            Vec::new()
        }

        fn snapshot(&self) -> ReceiverSnapshot {
            ReceiverSnapshot::default()
        }

        fn last_seen(&self) -> Instant {
            Instant::now()
        }

        fn set_ip_config(&self, _config: IpConfig) -> micnet_core::Result<()> {
            Ok(())
        }

        fn identify(&self) -> micnet_core::Result<()> {
            Ok(())
        }

        fn reboot(&self) -> micnet_core::Result<()> {
            Ok(())
        }
    }

    struct StubManager {
        receiver: Arc<StubReceiver>,
        event_tx: broadcast::Sender<MicEvent>,
        stopped: AtomicBool,
    }

    impl StubManager {
        fn new(uid: Uid) -> Arc<Self> {
            let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
            Arc::new(Self {
                receiver: Arc::new(StubReceiver { uid }),
                event_tx,
                stopped: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ReceiverManager for StubManager {
        fn receivers(&self) -> Vec<Arc<dyn WirelessMicReceiver>> {
            vec![Arc::clone(&self.receiver) as Arc<dyn WirelessMicReceiver>]
        }

        fn receiver(&self, uid: Uid) -> Option<Arc<dyn WirelessMicReceiver>> {
            (self.receiver.uid == uid)
                .then(|| Arc::clone(&self.receiver) as Arc<dyn WirelessMicReceiver>)
        }

        fn mic(&self, _uid: Uid) -> Option<Arc<dyn WirelessMic>> {
            None
        }

        fn subscribe(&self) -> broadcast::Receiver<MicEvent> {
            self.event_tx.subscribe()
        }

        async fn shutdown(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn two_vendors() -> (Arc<StubManager>, Arc<StubManager>, Arc<WirelessMicManager>) {
        let a = StubManager::new(Uid::combine(1, 100));
        let b = StubManager::new(Uid::combine(2, 200));
        let fused = WirelessMicManager::from_managers(vec![
            Arc::clone(&a) as Arc<dyn ReceiverManager>,
            Arc::clone(&b) as Arc<dyn ReceiverManager>,
        ]);
        (a, b, fused)
    }

    #[tokio::test]
    async fn lookup_scans_vendors_in_order() {
        let (a, b, fused) = two_vendors();
        assert_eq!(fused.receivers().len(), 2);
        assert_eq!(fused.receiver(a.receiver.uid).unwrap().uid(), a.receiver.uid);
        assert_eq!(fused.receiver(b.receiver.uid).unwrap().uid(), b.receiver.uid);
        assert!(fused.receiver(Uid::combine(3, 300)).is_none());
        fused.shutdown().await;
    }

    #[tokio::test]
    async fn events_from_every_vendor_are_fused() {
        let (a, b, fused) = two_vendors();
        let mut events = fused.subscribe();

        let uid_a = a.receiver.uid;
        let uid_b = b.receiver.uid;
        a.event_tx.send(MicEvent::ReceiverAdded { uid: uid_a }).unwrap();
        b.event_tx.send(MicEvent::ReceiverRemoved { uid: uid_b }).unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(
                timeout(Duration::from_secs(2), events.recv())
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        assert!(seen.contains(&MicEvent::ReceiverAdded { uid: uid_a }));
        assert!(seen.contains(&MicEvent::ReceiverRemoved { uid: uid_b }));
        fused.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_propagates_to_every_vendor() {
        let (a, b, fused) = two_vendors();
        fused.shutdown().await;
        assert!(a.stopped.load(Ordering::SeqCst));
        assert!(b.stopped.load(Ordering::SeqCst));
    }
}
