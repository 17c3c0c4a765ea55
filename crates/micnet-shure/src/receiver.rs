//! A UHF-R receiver unit and its receiver-level state.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use micnet_core::{
    FrequencyRange, IpConfig, IpMode, MacAddress, MicEvent, ReceiverProp, ReceiverSnapshot,
    Result, Uid, WirelessMic, WirelessMicReceiver,
};

use crate::channel::ShureChannel;
use crate::commands::{self, cmd_get, cmd_noted, cmd_set, ShureKind};
use crate::link::ReceiverLink;

/// Every UHF-R chassis carries two receive channels.
pub(crate) const CHANNELS_PER_RECEIVER: usize = 2;

#[derive(Debug, Default)]
struct ReceiverState {
    model_name: Option<String>,
    firmware_version: Option<String>,
    freq_band: Option<String>,
    frequency_ranges: Option<Vec<FrequencyRange>>,
    ip_address: Option<Ipv4Addr>,
    subnet: Option<Ipv4Addr>,
    gateway: Option<Ipv4Addr>,
    ip_mode: Option<IpMode>,
    mac_address: Option<MacAddress>,
}

/// One discovered UHF-R receiver.
#[derive(Debug)]
pub struct ShureReceiver {
    link: Arc<ReceiverLink>,
    state: Mutex<ReceiverState>,
    channels: Vec<Arc<ShureChannel>>,
    last_seen: Mutex<Instant>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl ShureReceiver {
    pub(crate) fn new(link: Arc<ReceiverLink>, meter_interval: u32) -> Arc<Self> {
        let channels = (0..CHANNELS_PER_RECEIVER)
            .map(|index| ShureChannel::new(index, Arc::clone(&link), meter_interval))
            .collect();
        Arc::new(Self {
            link,
            state: Mutex::new(ReceiverState::default()),
            channels,
            last_seen: Mutex::new(Instant::now()),
        })
    }

    pub(crate) fn shure_channels(&self) -> &[Arc<ShureChannel>] {
        &self.channels
    }

    /// Record a liveness signal.
    pub(crate) fn touch(&self) {
        *lock(&self.last_seen) = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn set_last_seen(&self, when: Instant) {
        *lock(&self.last_seen) = when;
    }

    /// Request the full receiver and channel state. Sent once right after
    /// discovery.
    pub(crate) fn send_startup_commands(&self) {
        for name in [
            "MODEL_NAME",
            "FREQ_BAND",
            "BANDLIMITS",
            "SW_VERSION",
            "MAC_ADDR",
            "IP_MODE",
            "CURRENT_IP_ADDR",
            "CURRENT_SUBNET",
            "CURRENT_GATEWAY",
        ] {
            self.link.send_text(&cmd_get(None, name));
        }
        for channel in &self.channels {
            channel.send_startup_commands();
        }
    }

    /// Route one inbound message payload.
    pub(crate) fn handle_text(&self, text: &str) {
        self.touch();
        let msg = match commands::parse_message(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(uid = %self.link.uid, message = text, error = %e, "unparseable message");
                return;
            }
        };
        if msg.kind == ShureKind::UpdateAck {
            return;
        }
        // Unsolicited notifications must be acknowledged or the device
        // keeps re-sending them.
        if let ShureKind::Note(id) = msg.kind {
            self.link.send_text(&cmd_noted(id));
        }
        match msg.channel {
            Some(index) => match self.channels.get(index) {
                Some(channel) => channel.handle_command(msg.kind, &msg.command, &msg.args, text),
                None => {
                    tracing::warn!(uid = %self.link.uid, index, "message for nonexistent channel");
                }
            },
            None => self.handle_command(&msg.command, &msg.args, text),
        }
    }

    fn emit(&self, prop: ReceiverProp) {
        self.link.emit(MicEvent::ReceiverPropertyChanged {
            uid: self.link.uid,
            prop,
        });
    }

    fn command_error(&self, full: &str, details: &str) {
        tracing::warn!(uid = %self.link.uid, message = full, details, "bad receiver command");
    }

    fn handle_command(&self, command: &str, args: &str, full: &str) {
        match command {
            "MODEL_NAME" => {
                lock(&self.state).model_name = Some(args.to_owned());
                self.emit(ReceiverProp::ModelName);
            }
            "FREQ_BAND" => {
                lock(&self.state).freq_band = Some(args.to_owned());
                self.emit(ReceiverProp::FreqBand);
            }
            "BANDLIMITS" => match parse_bandlimits(args) {
                Ok(ranges) => {
                    lock(&self.state).frequency_ranges = Some(ranges);
                    self.emit(ReceiverProp::FrequencyRanges);
                }
                Err(details) => self.command_error(full, details),
            },
            "SW_VERSION" => {
                lock(&self.state).firmware_version = Some(args.to_owned());
                self.emit(ReceiverProp::FirmwareVersion);
            }
            "MAC_ADDR" => match args.parse::<MacAddress>() {
                Ok(mac) => {
                    lock(&self.state).mac_address = Some(mac);
                    self.emit(ReceiverProp::MacAddress);
                }
                Err(e) => self.command_error(full, &e.to_string()),
            },
            "IP_MODE" => match args {
                "DHCP" => {
                    lock(&self.state).ip_mode = Some(IpMode::Dhcp);
                    self.emit(ReceiverProp::IpMode);
                }
                "MANUAL" => {
                    lock(&self.state).ip_mode = Some(IpMode::Manual);
                    self.emit(ReceiverProp::IpMode);
                }
                _ => self.command_error(full, "IP mode was not DHCP or MANUAL"),
            },
            "CURRENT_IP_ADDR" => match args.parse::<Ipv4Addr>() {
                Ok(addr) => {
                    lock(&self.state).ip_address = Some(addr);
                    self.emit(ReceiverProp::IpAddress);
                }
                Err(_) => self.command_error(full, "bad IPv4 address"),
            },
            "CURRENT_SUBNET" => match args.parse::<Ipv4Addr>() {
                Ok(addr) => {
                    lock(&self.state).subnet = Some(addr);
                    self.emit(ReceiverProp::Subnet);
                }
                Err(_) => self.command_error(full, "bad IPv4 subnet mask"),
            },
            "CURRENT_GATEWAY" => match args.parse::<Ipv4Addr>() {
                Ok(addr) => {
                    lock(&self.state).gateway = Some(addr);
                    self.emit(ReceiverProp::Gateway);
                }
                Err(_) => self.command_error(full, "bad IPv4 gateway"),
            },
            // Reported but not modeled. IP_ADDR/SUBNET/GATEWAY echo the
            // configured values; only the CURRENT_* forms are live.
            "HARDWARE_ID" | "IP_ADDR" | "SUBNET" | "GATEWAY" | "FLASH" | "REBOOT"
            | "CUSTOM_GROUP_C1" | "CUSTOM_GROUP_C2" | "CUSTOM_GROUP_C3" | "CUSTOM_GROUP_C4"
            | "CUSTOM_GROUP_C5" | "CUSTOM_GROUP_C6" => {}
            _ => self.command_error(full, "unrecognized command"),
        }
    }
}

/// `BANDLIMITS` reports two tunable bands as four kHz bounds.
fn parse_bandlimits(args: &str) -> std::result::Result<Vec<FrequencyRange>, &'static str> {
    let bounds: Vec<u64> = args
        .split_ascii_whitespace()
        .map(|t| t.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| "band limit was not an integer")?;
    if bounds.len() != 4 {
        return Err("expected four band limits");
    }
    Ok(bounds
        .chunks(2)
        .map(|pair| FrequencyRange::new(pair[0] * 1000, pair[1] * 1000))
        .collect())
}

impl WirelessMicReceiver for ShureReceiver {
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
            model_name: state.model_name.clone(),
            manufacturer: Some("Shure".to_owned()),
            firmware_version: state.firmware_version.clone(),
            freq_band: state.freq_band.clone(),
            frequency_ranges: state.frequency_ranges.clone(),
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
        match config.mode {
            IpMode::Dhcp => {
                self.link.send_text(&cmd_set(None, "IP_MODE", "DHCP"));
            }
            IpMode::Manual => {
                self.link.send_text(&cmd_set(None, "IP_MODE", "MANUAL"));
                self.link
                    .send_text(&cmd_set(None, "IP_ADDR", &config.address.to_string()));
                self.link
                    .send_text(&cmd_set(None, "SUBNET", &config.subnet.to_string()));
                self.link
                    .send_text(&cmd_set(None, "GATEWAY", &config.gateway.to_string()));
            }
        }
        Ok(())
    }

    fn identify(&self) -> Result<()> {
        self.link.send_text(&cmd_set(None, "FLASH", "ON"));
        Ok(())
    }

    fn reboot(&self) -> Result<()> {
        self.link.send_text(&cmd_set(None, "REBOOT", "ON"));
        Ok(())
    }
}
