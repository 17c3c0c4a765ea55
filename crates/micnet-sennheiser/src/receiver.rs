//! An SSC receiver: JSON dispatch, subscriptions, and receiver-level
//! state.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use micnet_core::{
    IpConfig, IpMode, MacAddress, MicEvent, ReceiverProp, ReceiverSnapshot, Result, Uid,
    WirelessMic, WirelessMicReceiver,
};
use serde_json::{json, Value};

use crate::channel::SennheiserChannel;
use crate::commands::{path_tree, request, subscription};
use crate::link::SscLink;

#[derive(Debug, Default)]
struct ReceiverState {
    firmware_version: Option<String>,
    ip_address: Option<Ipv4Addr>,
    subnet: Option<Ipv4Addr>,
    gateway: Option<Ipv4Addr>,
    ip_mode: Option<IpMode>,
    mac_address: Option<MacAddress>,
}

/// One discovered SSC receiver.
///
/// Identity (id, model) comes from mDNS; everything else is learned over
/// the SSC session.
#[derive(Debug)]
pub struct SennheiserReceiver {
    link: Arc<SscLink>,
    model: String,
    state: Mutex<ReceiverState>,
    channels: Vec<Arc<SennheiserChannel>>,
    last_seen: Mutex<Instant>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl SennheiserReceiver {
    pub(crate) fn new(
        link: Arc<SscLink>,
        model: String,
        num_channels: usize,
        polling_period: Duration,
    ) -> Arc<Self> {
        let channels = (0..num_channels)
            .map(|index| SennheiserChannel::new(index, Arc::clone(&link), polling_period))
            .collect();
        Arc::new(Self {
            link,
            model,
            state: Mutex::new(ReceiverState::default()),
            channels,
            last_seen: Mutex::new(Instant::now()),
        })
    }

    pub(crate) fn ssc_channels(&self) -> &[Arc<SennheiserChannel>] {
        &self.channels
    }

    /// Record a liveness signal (mDNS refresh or inbound SSC traffic).
    pub(crate) fn touch(&self) {
        *lock(&self.last_seen) = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn set_last_seen(&self, when: Instant) {
        *lock(&self.last_seen) = when;
    }

    /// One-shot reads plus the first round of subscriptions. Sent once
    /// right after discovery.
    pub(crate) fn send_startup_messages(&self) {
        self.link.send_json(&request(&[
            &["device", "identity"],
            &["device", "network"],
        ]));
        self.renew_subscriptions();
    }

    /// (Re-)subscribe to everything we track. Subscriptions have a finite
    /// lifetime, so the manager calls this on a fixed interval.
    pub(crate) fn renew_subscriptions(&self) {
        let mut paths: Vec<Vec<&str>> = vec![
            vec!["device", "identity", "version"],
            vec!["device", "network", "ipv4"],
            vec!["mates", "active"],
        ];
        for channel in &self.channels {
            paths.push(vec![channel.rx_key(), "name"]);
            paths.push(vec![channel.rx_key(), "mute"]);
            paths.push(vec![channel.rx_key(), "gain"]);
            paths.push(vec![channel.rx_key(), "frequency"]);
            paths.push(vec!["audio1", channel.out_key()]);
            paths.push(vec!["m", channel.rx_key()]);
        }
        let path_refs: Vec<&[&str]> = paths.iter().map(Vec::as_slice).collect();
        self.link
            .send_json(&subscription(self.link.next_xid(), &path_refs));
    }

    fn emit(&self, prop: ReceiverProp) {
        self.link.emit(MicEvent::ReceiverPropertyChanged {
            uid: self.link.uid,
            prop,
        });
    }

    /// Dispatch one inbound SSC datagram. Top-level keys are handled
    /// independently so one bad subtree never aborts its siblings.
    pub(crate) fn handle_text(&self, text: &str) {
        self.touch();
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(uid = %self.link.uid, error = %e, "undecodable SSC message");
                return;
            }
        };
        let Some(object) = value.as_object() else {
            tracing::warn!(uid = %self.link.uid, "SSC message was not a JSON object");
            return;
        };
        for (key, subtree) in object {
            match key.as_str() {
                "device" => self.handle_device(subtree),
                "mates" => self.handle_mates(subtree),
                "audio1" => self.handle_audio(subtree),
                "m" => self.handle_meters(subtree),
                "osc" => self.handle_osc(subtree),
                rx if self.channel_by_rx_key(rx).is_some() => {
                    // Checked above.
                    if let (Some(channel), Some(props)) =
                        (self.channel_by_rx_key(rx), subtree.as_object())
                    {
                        for (prop, prop_value) in props {
                            channel.handle_update(prop, prop_value);
                        }
                    }
                }
                _ => {
                    tracing::warn!(uid = %self.link.uid, key = %key, "unknown SSC subtree");
                }
            }
        }
    }

    fn channel_by_rx_key(&self, key: &str) -> Option<&Arc<SennheiserChannel>> {
        self.channels.iter().find(|ch| ch.rx_key() == key)
    }

    fn channel_by_out_key(&self, key: &str) -> Option<&Arc<SennheiserChannel>> {
        self.channels.iter().find(|ch| ch.out_key() == key)
    }

    fn channel_by_tx_key(&self, key: &str) -> Option<&Arc<SennheiserChannel>> {
        self.channels.iter().find(|ch| ch.tx_key() == key)
    }

    fn handle_device(&self, subtree: &Value) {
        if let Some(version) = subtree
            .get("identity")
            .and_then(|i| i.get("version"))
            .and_then(Value::as_str)
        {
            lock(&self.state).firmware_version = Some(version.to_owned());
            self.emit(ReceiverProp::FirmwareVersion);
        }
        if let Some(network) = subtree.get("network") {
            self.handle_network(network);
        }
    }

    fn handle_network(&self, network: &Value) {
        if let Some(ipv4) = network.get("ipv4") {
            if let Some(auto) = ipv4.get("auto").and_then(Value::as_bool) {
                lock(&self.state).ip_mode = Some(if auto { IpMode::Dhcp } else { IpMode::Manual });
                self.emit(ReceiverProp::IpMode);
            }
            if let Some(addr) = parse_addr(ipv4.get("ipaddr")) {
                lock(&self.state).ip_address = Some(addr);
                self.emit(ReceiverProp::IpAddress);
            }
            if let Some(addr) = parse_addr(ipv4.get("netmask")) {
                lock(&self.state).subnet = Some(addr);
                self.emit(ReceiverProp::Subnet);
            }
            if let Some(addr) = parse_addr(ipv4.get("gateway")) {
                lock(&self.state).gateway = Some(addr);
                self.emit(ReceiverProp::Gateway);
            }
        }
        if let Some(mac) = network
            .get("ether")
            .and_then(|e| e.get("macs"))
            .and_then(|m| m.get(0))
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<MacAddress>().ok())
        {
            lock(&self.state).mac_address = Some(mac);
            self.emit(ReceiverProp::MacAddress);
        }
    }

    fn handle_mates(&self, subtree: &Value) {
        let Some(object) = subtree.as_object() else {
            tracing::warn!(uid = %self.link.uid, "mates subtree was not an object");
            return;
        };
        for (key, value) in object {
            if key == "active" {
                let Some(active) = value.as_array() else {
                    tracing::warn!(uid = %self.link.uid, "mates/active was not an array");
                    continue;
                };
                for channel in &self.channels {
                    let connected = active
                        .iter()
                        .filter_map(Value::as_str)
                        .any(|m| m == channel.mate_path());
                    channel.set_transmitter_connected(connected);
                }
            } else if let Some(channel) = self.channel_by_tx_key(key) {
                if let Some(props) = value.as_object() {
                    for (prop, prop_value) in props {
                        channel.handle_mate_update(prop, prop_value);
                    }
                }
            } else {
                tracing::warn!(uid = %self.link.uid, key = %key, "unknown mates subtree");
            }
        }
    }

    fn handle_audio(&self, subtree: &Value) {
        let Some(object) = subtree.as_object() else {
            return;
        };
        for (key, value) in object {
            match self.channel_by_out_key(key) {
                Some(channel) => channel.handle_output(value),
                None => {
                    tracing::warn!(uid = %self.link.uid, key = %key, "unknown audio output");
                }
            }
        }
    }

    fn handle_meters(&self, subtree: &Value) {
        let Some(object) = subtree.as_object() else {
            return;
        };
        for (key, value) in object {
            if let Some(channel) = self.channel_by_rx_key(key) {
                channel.handle_meter(value);
            }
        }
    }

    fn handle_osc(&self, subtree: &Value) {
        if let Some(error) = subtree.get("error") {
            tracing::warn!(uid = %self.link.uid, %error, "device reported an SSC error");
        }
        // xid echoes and ping replies carry nothing we track.
    }
}

fn parse_addr(value: Option<&Value>) -> Option<Ipv4Addr> {
    value.and_then(Value::as_str).and_then(|s| s.parse().ok())
}

impl WirelessMicReceiver for SennheiserReceiver {
    fn uid(&self) -> Uid {
        self.link.uid
    }

    fn address(&self) -> SocketAddr {
        self.link.addr
    }

    fn num_channels(&self) -> usize {
        self.channels.len()
    }

    fn channel(&self, index: usize) -> Option<Arc<dyn WirelessMic>> {
        self.channels
            .get(index)
            .map(|ch| Arc::clone(ch) as Arc<dyn WirelessMic>)
    }

    fn channels(&self) -> Vec<Arc<dyn WirelessMic>> {
        self.channels
            .iter()
            .map(|ch| Arc::clone(ch) as Arc<dyn WirelessMic>)
            .collect()
    }

    fn snapshot(&self) -> ReceiverSnapshot {
        let state = lock(&self.state);
        ReceiverSnapshot {
            model_name: Some(self.model.clone()),
            manufacturer: Some("Sennheiser".to_owned()),
            firmware_version: state.firmware_version.clone(),
            freq_band: None,
            frequency_ranges: None,
            ip_address: state.ip_address,
            subnet: state.subnet,
            gateway: state.gateway,
            ip_mode: state.ip_mode,
            mac_address: state.mac_address,
        }
    }

    fn last_seen(&self) -> Instant {
        *lock(&self.last_seen)
    }

    fn set_ip_config(&self, config: IpConfig) -> Result<()> {
        let ipv4 = match config.mode {
            IpMode::Dhcp => json!({ "auto": true }),
            IpMode::Manual => json!({
                "auto": false,
                "ipaddr": config.address.to_string(),
                "netmask": config.subnet.to_string(),
                "gateway": config.gateway.to_string(),
            }),
        };
        self.link
            .send_json(&path_tree(&["device", "network", "ipv4"], ipv4));
        Ok(())
    }

    fn identify(&self) -> Result<()> {
        self.link.send_json(&path_tree(
            &["device", "identification", "visual"],
            json!(true),
        ));
        Ok(())
    }

    fn reboot(&self) -> Result<()> {
        self.link
            .send_json(&path_tree(&["device", "restart"], json!(true)));
        Ok(())
    }
}
