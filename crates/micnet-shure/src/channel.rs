//! One UHF-R receive channel and its paired transmitter.

use std::sync::{Arc, Mutex, MutexGuard};

use micnet_core::{
    ChannelProp, ChannelSnapshot, DiversityIndicator, Error, FrequencyRange, LockMode, MeterQueue,
    MeteringData, MicEvent, Result, RfScanData, RfScanHandle, ScanSlot, ScanStart, Uid,
    WirelessMic,
};
use rand::Rng;
use tokio::sync::mpsc;

use crate::commands::{
    antenna_from_wire, audio_to_normalized, battery_from_wire, cmd_get, cmd_meter, cmd_set,
    cmd_update_add, lock_from_wire, lock_to_wire, rssi_to_normalized, tx_gain_from_wire,
    tx_gain_to_wire, tx_trim_from_wire, ShureKind,
};
use crate::link::ReceiverLink;
use crate::scan::{self, ScanEvent, SCAN_EVENT_CAPACITY};

#[derive(Debug, Default)]
struct ChannelState {
    name: Option<String>,
    gain: Option<i32>,
    sensitivity: Option<i32>,
    output_gain: Option<i32>,
    mute: Option<bool>,
    frequency_hz: Option<u64>,
    group: Option<i32>,
    channel_number: Option<i32>,
    lock_mode: Option<LockMode>,
    transmitter_type: Option<String>,
    battery_level: Option<f32>,
}

/// A single channel on a UHF-R receiver.
///
/// State is mutated only from the manager's receive loop; reads take
/// short-lived locks and return copies.
#[derive(Debug)]
pub struct ShureChannel {
    uid: Uid,
    index: usize,
    link: Arc<ReceiverLink>,
    state: Mutex<ChannelState>,
    meters: Mutex<MeterQueue>,
    scan: ScanSlot,
    // Shared with the scan worker, which clears it on exit.
    scan_events: Arc<Mutex<Option<mpsc::Sender<ScanEvent>>>>,
    meter_interval: u32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl ShureChannel {
    pub(crate) fn new(index: usize, link: Arc<ReceiverLink>, meter_interval: u32) -> Arc<Self> {
        Arc::new(Self {
            uid: link.uid.channel(index),
            index,
            link,
            state: Mutex::new(ChannelState::default()),
            meters: Mutex::new(MeterQueue::new()),
            scan: ScanSlot::new(),
            scan_events: Arc::new(Mutex::new(None)),
            meter_interval,
        })
    }

    /// Enable metering, register for NOTE traffic, and request the full
    /// channel state. Sent once right after discovery.
    pub(crate) fn send_startup_commands(&self) {
        self.link.send_text(&cmd_meter(self.index, self.meter_interval));
        self.link.send_text(&cmd_update_add(self.index));
        for name in [
            "CHAN_NAME",
            "AUDIO_GAIN",
            "MUTE",
            "GROUP_CHAN",
            "FREQUENCY",
            "TX_IR_LOCK",
            "TX_IR_GAIN",
            "TX_IR_TRIM",
            "TX_TYPE",
            "TX_BAT",
        ] {
            self.link.send_text(&cmd_get(Some(self.index), name));
        }
    }

    fn emit(&self, prop: ChannelProp) {
        self.link.emit(MicEvent::ChannelPropertyChanged {
            uid: self.uid,
            prop,
        });
    }

    fn command_error(&self, full: &str, details: &str) {
        tracing::warn!(uid = %self.uid, message = full, details, "bad channel command");
    }

    /// Apply one inbound command addressed to this channel.
    pub(crate) fn handle_command(&self, kind: ShureKind, command: &str, args: &str, full: &str) {
        if kind == ShureKind::Sample {
            self.handle_sample(args, full);
            return;
        }
        if !matches!(kind, ShureKind::Report | ShureKind::Note(_)) {
            self.command_error(full, "unexpected command kind for a channel");
            return;
        }
        match command {
            "CHAN_NAME" => {
                lock(&self.state).name = Some(args.to_owned());
                self.emit(ChannelProp::Name);
            }
            "MUTE" => match args {
                "ON" => {
                    lock(&self.state).mute = Some(true);
                    self.emit(ChannelProp::Mute);
                }
                "OFF" => {
                    lock(&self.state).mute = Some(false);
                    self.emit(ChannelProp::Mute);
                }
                _ => self.command_error(full, "mute value was not ON or OFF"),
            },
            "AUDIO_GAIN" => match args.parse::<i32>() {
                // Reported as attenuation 0..=32; stored negated.
                Ok(n) if (0..=32).contains(&n) => {
                    lock(&self.state).output_gain = Some(-n);
                    self.emit(ChannelProp::OutputGain);
                }
                _ => self.command_error(full, "output gain outside 0..=32"),
            },
            "TX_GAIN" | "TX_IR_GAIN" => match tx_gain_from_wire(args) {
                Ok(gain) => {
                    lock(&self.state).gain = gain;
                    self.emit(ChannelProp::Gain);
                }
                Err(e) => self.command_error(full, &e.to_string()),
            },
            "TX_TRIM" | "TX_IR_TRIM" => match tx_trim_from_wire(args) {
                Ok(trim) => {
                    lock(&self.state).sensitivity = trim;
                    self.emit(ChannelProp::Sensitivity);
                }
                Err(e) => self.command_error(full, &e.to_string()),
            },
            "GROUP_CHAN" => {
                if args == "-- --" {
                    let mut state = lock(&self.state);
                    state.group = None;
                    state.channel_number = None;
                    drop(state);
                    self.emit(ChannelProp::Group);
                    self.emit(ChannelProp::ChannelNumber);
                    return;
                }
                let parts: Vec<&str> = args.split(' ').collect();
                match (
                    parts.first().and_then(|g| g.parse::<i32>().ok()),
                    parts.get(1).and_then(|c| c.parse::<i32>().ok()),
                ) {
                    (Some(group), Some(channel)) if parts.len() == 2 => {
                        let mut state = lock(&self.state);
                        state.group = Some(group);
                        state.channel_number = Some(channel);
                        drop(state);
                        self.emit(ChannelProp::Group);
                        self.emit(ChannelProp::ChannelNumber);
                    }
                    _ => self.command_error(full, "expected 'GG CC' or '-- --'"),
                }
            }
            "FREQUENCY" => match args.parse::<u64>() {
                Ok(khz) => {
                    lock(&self.state).frequency_hz = Some(khz * 1000);
                    self.emit(ChannelProp::Frequency);
                }
                Err(_) => self.command_error(full, "frequency was not an integer"),
            },
            "TX_BAT" => match battery_from_wire(args) {
                Ok(level) => {
                    lock(&self.state).battery_level = level;
                    self.emit(ChannelProp::BatteryLevel);
                }
                Err(e) => self.command_error(full, &e.to_string()),
            },
            "TX_TYPE" => {
                lock(&self.state).transmitter_type = Some(args.to_owned());
                self.emit(ChannelProp::TransmitterType);
            }
            "TX_LOCK" | "TX_IR_LOCK" => match lock_from_wire(args) {
                Ok(Some(mode)) => {
                    lock(&self.state).lock_mode = Some(mode);
                    self.emit(ChannelProp::LockMode);
                }
                Ok(None) => {}
                Err(e) => self.command_error(full, &e.to_string()),
            },
            "SCAN" => self.route_scan_command(args, full),
            "RFLEVEL" => match scan::parse_rflevel(args) {
                Ok(samples) => self.route_scan_event(ScanEvent::Batch(samples)),
                Err(e) => self.command_error(full, &e.to_string()),
            },
            // Reported but not modeled.
            "FRONT_PANEL_LOCK" | "SQUELCH" | "TX_IR_POWER" | "TX_IR_BAT_TYPE"
            | "TX_IR_CUSTOM_GPS" | "AUDIO_INDICATOR" | "TX_BAT_MINS" | "TX_BAT_TYPE"
            | "TX_POWER" | "TX_CHANGE_BAT" | "TX_EXT_DC" => {}
            _ => self.command_error(full, "unrecognized command"),
        }
    }

    fn route_scan_command(&self, args: &str, full: &str) {
        let event = if let Some(token) = args.strip_prefix("RESERVE ACK ") {
            match token.trim().parse::<u32>() {
                Ok(token) => ScanEvent::ReserveAck(token),
                Err(_) => {
                    self.command_error(full, "bad reservation token");
                    return;
                }
            }
        } else if args == "DONE" {
            ScanEvent::Done
        } else if args == "RELEASED" {
            ScanEvent::Released
        } else {
            self.command_error(full, "unrecognized SCAN argument");
            return;
        };
        self.route_scan_event(event);
    }

    fn route_scan_event(&self, event: ScanEvent) {
        let guard = lock(&self.scan_events);
        match guard.as_ref() {
            Some(tx) => {
                if tx.try_send(event).is_err() {
                    tracing::warn!(uid = %self.uid, "scan event queue full or worker gone");
                }
            }
            None => {
                tracing::debug!(uid = %self.uid, "scan traffic with no scan in progress");
            }
        }
    }

    /// Parse a `SAMPLE` metering payload: `KEY VALUE...` tokens.
    fn handle_sample(&self, args: &str, full: &str) {
        let tokens: Vec<&str> = args.split_ascii_whitespace().collect();
        let mut rssi_a = 0.0;
        let mut rssi_b = 0.0;
        let mut audio = 0.0;
        let mut diversity = DiversityIndicator::NONE;
        let mut i = 0;
        while i < tokens.len() {
            match tokens[i] {
                "RSSI" => {
                    let a = tokens.get(i + 1).and_then(|t| t.parse::<i32>().ok());
                    let b = tokens.get(i + 2).and_then(|t| t.parse::<i32>().ok());
                    match (a, b) {
                        (Some(a), Some(b)) => {
                            rssi_a = rssi_to_normalized(a);
                            rssi_b = rssi_to_normalized(b);
                            i += 3;
                        }
                        _ => {
                            self.command_error(full, "could not parse RF strength");
                            return;
                        }
                    }
                }
                "AUDIO_INDICATOR" => match tokens.get(i + 1).and_then(|t| t.parse::<i32>().ok()) {
                    Some(level) => {
                        audio = audio_to_normalized(level);
                        i += 2;
                    }
                    None => {
                        self.command_error(full, "could not parse audio level");
                        return;
                    }
                },
                "ANTENNA" => {
                    if let Some(which) = tokens.get(i + 1) {
                        diversity = antenna_from_wire(which);
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
                _ => i += 1,
            }
        }
        lock(&self.meters).push(MeteringData {
            rssi_a,
            rssi_b,
            audio_level: audio,
            diversity,
        });
    }
}

impl WirelessMic for ShureChannel {
    fn uid(&self) -> Uid {
        self.uid
    }

    fn receiver_uid(&self) -> Uid {
        self.link.uid
    }

    fn channel_index(&self) -> usize {
        self.index
    }

    fn snapshot(&self) -> ChannelSnapshot {
        let state = lock(&self.state);
        ChannelSnapshot {
            name: state.name.clone(),
            gain: state.gain,
            sensitivity: state.sensitivity,
            output_gain: state.output_gain,
            mute: state.mute,
            frequency_hz: state.frequency_hz,
            group: state.group,
            channel_number: state.channel_number,
            lock_mode: state.lock_mode,
            transmitter_type: state.transmitter_type.clone(),
            battery_level: state.battery_level,
            transmitter_connected: state.transmitter_type.as_ref().map(|_| true),
        }
    }

    fn set_name(&self, name: &str) -> Result<()> {
        if name.len() >= 12 || name.contains('*') {
            return Err(Error::InvalidParameter(
                "channel names are limited to 11 plain characters".into(),
            ));
        }
        self.link
            .send_text(&cmd_set(Some(self.index), "CHAN_NAME", name));
        Ok(())
    }

    fn set_gain(&self, db: i32) -> Result<()> {
        let wire = tx_gain_to_wire(db)?;
        self.link
            .send_text(&cmd_set(Some(self.index), "TX_IR_GAIN", &wire.to_string()));
        Ok(())
    }

    fn set_sensitivity(&self, db: i32) -> Result<()> {
        if !(-10..=15).contains(&db) {
            return Err(Error::InvalidParameter(format!(
                "TX trim {db} dB outside -10..=15"
            )));
        }
        self.link
            .send_text(&cmd_set(Some(self.index), "TX_IR_TRIM", &db.to_string()));
        Ok(())
    }

    fn set_output_gain(&self, db: i32) -> Result<()> {
        // The device takes attenuation 0..=32; the domain value is the
        // negated dB figure it reports back.
        if !(-32..=0).contains(&db) {
            return Err(Error::InvalidParameter(format!(
                "output gain {db} dB outside -32..=0"
            )));
        }
        self.link
            .send_text(&cmd_set(Some(self.index), "AUDIO_GAIN", &(-db).to_string()));
        Ok(())
    }

    fn set_mute(&self, mute: bool) -> Result<()> {
        let value = if mute { "ON" } else { "OFF" };
        self.link.send_text(&cmd_set(Some(self.index), "MUTE", value));
        Ok(())
    }

    fn set_frequency(&self, hz: u64) -> Result<()> {
        self.link.send_text(&cmd_set(
            Some(self.index),
            "FREQUENCY",
            &format!("{:06}", hz / 1000),
        ));
        Ok(())
    }

    fn set_group_channel(&self, group: i32, channel: i32) -> Result<()> {
        self.link.send_text(&cmd_set(
            Some(self.index),
            "GROUP_CHAN",
            &format!("{group:02} {channel:02}"),
        ));
        Ok(())
    }

    fn set_lock_mode(&self, mode: LockMode) -> Result<()> {
        self.link
            .send_text(&cmd_set(Some(self.index), "TX_IR_LOCK", lock_to_wire(mode)));
        Ok(())
    }

    fn last_meter(&self) -> Option<MeteringData> {
        lock(&self.meters).last()
    }

    fn drain_meters(&self) -> Vec<MeteringData> {
        lock(&self.meters).drain()
    }

    fn start_rf_scan(&self, range: FrequencyRange, step_hz: u64) -> Result<RfScanHandle> {
        if step_hz == 0 {
            return Err(Error::InvalidParameter("scan step must be nonzero".into()));
        }
        match self.scan.start(range, step_hz) {
            ScanStart::InFlight(handle) => Ok(handle),
            ScanStart::New(publisher, handle) => {
                let (event_tx, event_rx) = mpsc::channel(SCAN_EVENT_CAPACITY);
                *lock(&self.scan_events) = Some(event_tx);
                let token: u32 = rand::thread_rng().gen_range(1..=999_999);
                let link = Arc::clone(&self.link);
                let index = self.index;
                let meter_interval = self.meter_interval;
                let events_slot = Arc::clone(&self.scan_events);
                tokio::spawn(async move {
                    scan::run_scan(link, index, publisher, event_rx, token, meter_interval).await;
                    *lock(&events_slot) = None;
                });
                self.emit(ChannelProp::RfScan);
                Ok(handle)
            }
        }
    }

    fn rf_scan_data(&self) -> Option<RfScanData> {
        self.scan.data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use micnet_core::EVENT_CHANNEL_CAPACITY;
    use tokio::sync::broadcast;

    fn test_channel() -> (
        Arc<ShureChannel>,
        mpsc::Receiver<crate::link::OutboundDatagram>,
        broadcast::Receiver<MicEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let link = Arc::new(ReceiverLink {
            uid: Uid::combine(0xBEEF, crate::manager::SHURE_TYPE_TAG),
            snet_id: 0xBEEF,
            addr: "127.0.0.1:2201".parse().unwrap(),
            out_tx,
            event_tx,
        });
        (ShureChannel::new(0, link, 1), out_rx, event_rx)
    }

    fn sent_body(out_rx: &mut mpsc::Receiver<crate::link::OutboundDatagram>) -> String {
        let datagram = out_rx.try_recv().expect("expected an outbound datagram");
        String::from_utf8_lossy(&datagram.payload[crate::snet::HEADER_SIZE..]).into_owned()
    }

    #[test]
    fn mute_report_sets_state_and_fires_one_event() {
        let (ch, _out, mut events) = test_channel();
        ch.handle_command(ShureKind::Report, "MUTE", "ON", "* REPORT 1 MUTE ON *");
        assert_eq!(ch.snapshot().mute, Some(true));
        assert_eq!(
            events.try_recv().unwrap(),
            MicEvent::ChannelPropertyChanged {
                uid: ch.uid(),
                prop: ChannelProp::Mute
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn bad_mute_value_is_ignored() {
        let (ch, _out, mut events) = test_channel();
        ch.handle_command(ShureKind::Report, "MUTE", "MAYBE", "* REPORT 1 MUTE MAYBE *");
        assert_eq!(ch.snapshot().mute, None);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn frequency_note_scales_to_hz() {
        let (ch, _out, _events) = test_channel();
        ch.handle_command(
            ShureKind::Note(7),
            "FREQUENCY",
            "614000",
            "* NOTE 7 2 FREQUENCY 614000 *",
        );
        assert_eq!(ch.snapshot().frequency_hz, Some(614_000_000));
    }

    #[test]
    fn audio_gain_is_stored_negated() {
        let (ch, _out, _events) = test_channel();
        ch.handle_command(ShureKind::Report, "AUDIO_GAIN", "12", "* REPORT 1 AUDIO_GAIN 12 *");
        assert_eq!(ch.snapshot().output_gain, Some(-12));
    }

    #[test]
    fn tx_gain_unknown_clears_value() {
        let (ch, _out, _events) = test_channel();
        ch.handle_command(ShureKind::Report, "TX_IR_GAIN", "25", "* REPORT 1 TX_IR_GAIN 25 *");
        assert_eq!(ch.snapshot().gain, Some(15));
        ch.handle_command(
            ShureKind::Report,
            "TX_IR_GAIN",
            "UNKNOWN",
            "* REPORT 1 TX_IR_GAIN UNKNOWN *",
        );
        assert_eq!(ch.snapshot().gain, None);
    }

    #[test]
    fn group_chan_parses_and_clears() {
        let (ch, _out, _events) = test_channel();
        ch.handle_command(ShureKind::Report, "GROUP_CHAN", "03 12", "* REPORT 1 GROUP_CHAN 03 12 *");
        let snap = ch.snapshot();
        assert_eq!(snap.group, Some(3));
        assert_eq!(snap.channel_number, Some(12));
        ch.handle_command(ShureKind::Report, "GROUP_CHAN", "-- --", "* REPORT 1 GROUP_CHAN -- -- *");
        let snap = ch.snapshot();
        assert_eq!(snap.group, None);
        assert_eq!(snap.channel_number, None);
    }

    #[test]
    fn battery_unknown_is_distinct_from_empty() {
        let (ch, _out, _events) = test_channel();
        ch.handle_command(ShureKind::Report, "TX_BAT", "U", "* REPORT 1 TX_BAT U *");
        assert_eq!(ch.snapshot().battery_level, None);
        ch.handle_command(ShureKind::Report, "TX_BAT", "1", "* REPORT 1 TX_BAT 1 *");
        assert_eq!(ch.snapshot().battery_level, Some(0.2));
    }

    #[test]
    fn sample_feeds_meter_queue() {
        let (ch, _out, _events) = test_channel();
        ch.handle_command(
            ShureKind::Sample,
            "ALL",
            "RSSI 50 100 AUDIO_INDICATOR 255 ANTENNA B",
            "* SAMPLE 1 ALL RSSI 50 100 AUDIO_INDICATOR 255 ANTENNA B *",
        );
        let meter = ch.last_meter().unwrap();
        assert_eq!(meter.rssi_a, 1.0);
        assert_eq!(meter.rssi_b, 0.0);
        assert_eq!(meter.audio_level, 1.0);
        assert_eq!(meter.diversity, DiversityIndicator::ANTENNA_B);
    }

    #[test]
    fn unknown_command_leaves_state_untouched() {
        let (ch, _out, mut events) = test_channel();
        ch.handle_command(ShureKind::Report, "WIBBLE", "1", "* REPORT 1 WIBBLE 1 *");
        assert_eq!(ch.snapshot(), ChannelSnapshot::default());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn setters_format_wire_commands() {
        let (ch, mut out, _events) = test_channel();
        ch.set_mute(true).unwrap();
        assert_eq!(sent_body(&mut out), "* SET 1 MUTE ON *");
        ch.set_frequency(614_000_000).unwrap();
        assert_eq!(sent_body(&mut out), "* SET 1 FREQUENCY 614000 *");
        ch.set_gain(0).unwrap();
        assert_eq!(sent_body(&mut out), "* SET 1 TX_IR_GAIN 10 *");
        ch.set_output_gain(-12).unwrap();
        assert_eq!(sent_body(&mut out), "* SET 1 AUDIO_GAIN 12 *");
        ch.set_group_channel(3, 12).unwrap();
        assert_eq!(sent_body(&mut out), "* SET 1 GROUP_CHAN 03 12 *");
        ch.set_lock_mode(LockMode::Frequency).unwrap();
        assert_eq!(sent_body(&mut out), "* SET 1 TX_IR_LOCK FREQ *");
    }

    #[test]
    fn out_of_range_setters_send_nothing() {
        let (ch, mut out, _events) = test_channel();
        assert!(ch.set_gain(21).is_err());
        assert!(ch.set_output_gain(5).is_err());
        assert!(ch.set_sensitivity(99).is_err());
        assert!(ch.set_name("far too long a name").is_err());
        assert!(out.try_recv().is_err());
    }

    #[test]
    fn startup_commands_cover_metering_and_state() {
        let (ch, mut out, _events) = test_channel();
        ch.send_startup_commands();
        let mut bodies = Vec::new();
        while let Ok(datagram) = out.try_recv() {
            bodies.push(String::from_utf8_lossy(&datagram.payload[crate::snet::HEADER_SIZE..]).into_owned());
        }
        assert!(bodies.contains(&"* METER 1 ALL 1 *".to_string()));
        assert!(bodies.contains(&"* UPDATE 1 ADD *".to_string()));
        assert!(bodies.contains(&"* GET 1 FREQUENCY *".to_string()));
        assert!(bodies.contains(&"* GET 1 TX_BAT *".to_string()));
    }

    #[tokio::test]
    async fn second_scan_start_joins_first() {
        let (ch, mut out, _events) = test_channel();
        let range = FrequencyRange::new(578_000_000, 578_100_000);
        let first = ch.start_rf_scan(range, 25_000).unwrap();
        let second = ch.start_rf_scan(range, 25_000).unwrap();
        assert_eq!(first.scan_id(), second.scan_id());
        // Exactly one RESERVE went out.
        let body = loop {
            let datagram = out.recv().await.unwrap();
            let body = String::from_utf8_lossy(&datagram.payload[crate::snet::HEADER_SIZE..]).into_owned();
            if body.contains("SCAN") {
                break body;
            }
        };
        assert!(body.starts_with("* SCAN RESERVE 1 "));
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn scan_runs_to_completion_via_protocol_events() {
        let (ch, mut out, _events) = test_channel();
        let range = FrequencyRange::new(578_000_000, 578_050_000);
        let handle = ch.start_rf_scan(range, 25_000).unwrap();

        // Reservation token is embedded in the outbound command.
        let reserve = loop {
            let datagram = out.recv().await.unwrap();
            let body = String::from_utf8_lossy(&datagram.payload[crate::snet::HEADER_SIZE..]).into_owned();
            if body.starts_with("* SCAN RESERVE") {
                break body;
            }
        };
        let token: u32 = reserve
            .trim_end_matches(" *")
            .rsplit(' ')
            .next()
            .unwrap()
            .parse()
            .unwrap();

        ch.handle_command(
            ShureKind::Report,
            "SCAN",
            &format!("RESERVE ACK {token}"),
            "* REPORT 1 SCAN RESERVE ACK *",
        );
        // Wait for the RANGE command before streaming levels.
        loop {
            let datagram = out.recv().await.unwrap();
            let body = String::from_utf8_lossy(&datagram.payload[crate::snet::HEADER_SIZE..]).into_owned();
            if body.starts_with("* SCAN RANGE") {
                assert_eq!(body, "* SCAN RANGE 1 25 578000 578050 *");
                break;
            }
        }
        ch.handle_command(
            ShureKind::Report,
            "RFLEVEL",
            "3 578000 -95 578025 -90 578050 -85",
            "* REPORT 1 RFLEVEL 3 ... *",
        );
        ch.handle_command(ShureKind::Report, "SCAN", "DONE", "* REPORT 1 SCAN DONE *");
        ch.handle_command(ShureKind::Report, "SCAN", "RELEASED", "* REPORT 1 SCAN RELEASED *");

        let done = handle.wait().await;
        assert_eq!(done.state, micnet_core::RfScanState::Completed);
        assert_eq!(done.samples.len(), 3);
        assert_eq!(done.progress, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_scan_times_out_into_failure() {
        let (ch, mut out, _events) = test_channel();
        let range = FrequencyRange::new(578_000_000, 578_050_000);
        let handle = ch.start_rf_scan(range, 25_000).unwrap();

        // The device never acknowledges the reservation; the paused clock
        // runs out the full scan window.
        let done = handle.wait().await;
        assert_eq!(done.state, micnet_core::RfScanState::Failure);
        assert_eq!(done.status.as_deref(), Some("scan protocol timed out"));
        assert!(done.samples.is_empty());

        // The channel is still released best-effort and metering restored.
        let mut bodies = Vec::new();
        loop {
            let datagram = out.recv().await.unwrap();
            let body = String::from_utf8_lossy(&datagram.payload[crate::snet::HEADER_SIZE..])
                .into_owned();
            let is_meter = body.starts_with("* METER");
            bodies.push(body);
            if is_meter {
                break;
            }
        }
        assert!(bodies.iter().any(|b| b == "* SCAN RELEASE 1 *"));
        assert_eq!(bodies.last().unwrap(), "* METER 1 ALL 1 *");
    }
}
