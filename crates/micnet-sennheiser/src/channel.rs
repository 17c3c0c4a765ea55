//! One SSC receive channel and its paired (mated) transmitter.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use micnet_core::{
    ChannelProp, ChannelSnapshot, DiversityIndicator, Error, FrequencyRange, LockMode, MeterQueue,
    MeteringData, MicEvent, Result, RfScanData, RfScanHandle, ScanSlot, ScanStart, Uid,
    WirelessMic,
};
use serde_json::{json, Value};

use crate::commands::{
    af_to_normalized, battery_to_fraction, path_tree, quantize_gain, rssi_to_normalized,
    subscription,
};
use crate::link::SscLink;
use crate::scan::{self, ScanCollector, FREQUENCY_GRID_HZ};

#[derive(Debug, Default)]
struct ChannelState {
    name: Option<String>,
    gain: Option<i32>,
    sensitivity: Option<i32>,
    output_gain: Option<i32>,
    rx_mute: Option<bool>,
    tx_mute: Option<bool>,
    frequency_hz: Option<u64>,
    lock_mode: Option<LockMode>,
    transmitter_type: Option<String>,
    battery_level: Option<f32>,
    transmitter_connected: Option<bool>,
}

impl ChannelState {
    /// Either side muting wins; unknown only while neither side has
    /// reported.
    fn mute(&self) -> Option<bool> {
        match (self.rx_mute, self.tx_mute) {
            (None, None) => None,
            (rx, tx) => Some(rx.unwrap_or(false) || tx.unwrap_or(false)),
        }
    }
}

/// A single channel on an SSC receiver.
#[derive(Debug)]
pub struct SennheiserChannel {
    uid: Uid,
    receiver_uid: Uid,
    index: usize,
    /// Property-tree keys for this channel: `rx1`/`tx1`/`out1` etc.
    rx_key: String,
    tx_key: String,
    out_key: String,
    link: Arc<SscLink>,
    state: Mutex<ChannelState>,
    meters: Mutex<MeterQueue>,
    scan: ScanSlot,
    collector: Arc<Mutex<Option<ScanCollector>>>,
    polling_period: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl SennheiserChannel {
    pub(crate) fn new(
        index: usize,
        link: Arc<SscLink>,
        polling_period: Duration,
    ) -> Arc<Self> {
        let number = index + 1;
        Arc::new(Self {
            uid: link.uid.channel(index),
            receiver_uid: link.uid,
            index,
            rx_key: format!("rx{number}"),
            tx_key: format!("tx{number}"),
            out_key: format!("out{number}"),
            link,
            state: Mutex::new(ChannelState::default()),
            meters: Mutex::new(MeterQueue::new()),
            scan: ScanSlot::new(),
            collector: Arc::new(Mutex::new(None)),
            polling_period,
        })
    }

    pub(crate) fn rx_key(&self) -> &str {
        &self.rx_key
    }

    pub(crate) fn tx_key(&self) -> &str {
        &self.tx_key
    }

    pub(crate) fn out_key(&self) -> &str {
        &self.out_key
    }

    /// The mate path this channel's transmitter appears under in
    /// `mates/active`.
    pub(crate) fn mate_path(&self) -> String {
        format!("mates/{}", self.tx_key)
    }

    fn emit(&self, prop: ChannelProp) {
        self.link.emit(MicEvent::ChannelPropertyChanged {
            uid: self.uid,
            prop,
        });
    }

    fn bad_value(&self, key: &str, value: &Value) {
        tracing::warn!(uid = %self.uid, key, %value, "unusable channel property value");
    }

    /// Apply one `rxN` property update.
    pub(crate) fn handle_update(&self, key: &str, value: &Value) {
        match key {
            "name" => match value.as_str() {
                Some(name) => {
                    lock(&self.state).name = Some(name.to_owned());
                    self.emit(ChannelProp::Name);
                }
                None => self.bad_value(key, value),
            },
            "gain" => match value.as_i64() {
                Some(db) => {
                    lock(&self.state).gain = Some(db as i32);
                    self.emit(ChannelProp::Gain);
                }
                None => self.bad_value(key, value),
            },
            "mute" => match value.as_bool() {
                Some(mute) => {
                    lock(&self.state).rx_mute = Some(mute);
                    self.emit(ChannelProp::Mute);
                }
                None => self.bad_value(key, value),
            },
            "frequency" => match value.as_u64() {
                // Reported in kHz.
                Some(khz) => {
                    lock(&self.state).frequency_hz = Some(khz * 1000);
                    self.emit(ChannelProp::Frequency);
                }
                None => self.bad_value(key, value),
            },
            // Present in the tree but not modeled.
            "identification" | "squelch" | "sync_settings" | "warnings" => {}
            _ => {
                tracing::warn!(uid = %self.uid, key, "unknown channel property");
            }
        }
    }

    /// Apply one `mates/txN` property update.
    pub(crate) fn handle_mate_update(&self, key: &str, value: &Value) {
        match key {
            "battery" => match value.get("gauge").and_then(Value::as_f64) {
                Some(pct) => {
                    lock(&self.state).battery_level = Some(battery_to_fraction(pct as f32));
                    self.emit(ChannelProp::BatteryLevel);
                }
                None => self.bad_value(key, value),
            },
            "type" => match value.as_str() {
                Some(kind) => {
                    lock(&self.state).transmitter_type = Some(kind.to_owned());
                    self.emit(ChannelProp::TransmitterType);
                }
                None => self.bad_value(key, value),
            },
            "trim" => match value.as_i64() {
                Some(db) => {
                    lock(&self.state).sensitivity = Some(db as i32);
                    self.emit(ChannelProp::Sensitivity);
                }
                None => self.bad_value(key, value),
            },
            "lock" => match value.as_bool() {
                Some(locked) => {
                    lock(&self.state).lock_mode =
                        Some(if locked { LockMode::All } else { LockMode::None });
                    self.emit(ChannelProp::LockMode);
                }
                None => self.bad_value(key, value),
            },
            "mute" => match value.as_bool() {
                Some(mute) => {
                    lock(&self.state).tx_mute = Some(mute);
                    self.emit(ChannelProp::Mute);
                }
                None => self.bad_value(key, value),
            },
            "name" => {}
            _ => {
                tracing::warn!(uid = %self.uid, key, "unknown mate property");
            }
        }
    }

    /// Apply an `audio1/outN` update.
    pub(crate) fn handle_output(&self, value: &Value) {
        if let Some(db) = value.get("gain").and_then(Value::as_i64) {
            lock(&self.state).output_gain = Some(db as i32);
            self.emit(ChannelProp::OutputGain);
        }
    }

    /// Apply an `m/rxN` meter update.
    pub(crate) fn handle_meter(&self, value: &Value) {
        let rssi_dbm = value.get("rssi").and_then(Value::as_f64).map(|v| v as f32);
        let af = value.get("af").and_then(Value::as_f64).map(|v| v as f32);
        let divi = value.get("divi").and_then(Value::as_u64);

        if let (Some(dbm), Some(collector)) = (rssi_dbm, lock(&self.collector).as_mut()) {
            collector.record(dbm);
        }

        let rssi = rssi_dbm.map(rssi_to_normalized).unwrap_or(0.0);
        let mut diversity = DiversityIndicator::NONE;
        if let Some(bits) = divi {
            if bits & 1 != 0 {
                diversity = diversity.union(DiversityIndicator::ANTENNA_A);
            }
            if bits & 2 != 0 {
                diversity = diversity.union(DiversityIndicator::ANTENNA_B);
            }
        }
        lock(&self.meters).push(MeteringData {
            rssi_a: rssi,
            rssi_b: rssi,
            audio_level: af.map(af_to_normalized).unwrap_or(0.0),
            diversity,
        });
    }

    /// Record whether this channel's transmitter appears in
    /// `mates/active`, subscribing to its fields on first connect.
    pub(crate) fn set_transmitter_connected(&self, connected: bool) {
        let was = {
            let mut state = lock(&self.state);
            let was = state.transmitter_connected;
            state.transmitter_connected = Some(connected);
            was
        };
        if was != Some(connected) {
            self.emit(ChannelProp::TransmitterConnected);
        }
        if connected && was != Some(true) {
            self.subscribe_mate_fields();
        }
    }

    /// Subscribe to the transmitter-only fields of this channel's mate.
    fn subscribe_mate_fields(&self) {
        let tx = self.tx_key.as_str();
        let paths: Vec<Vec<&str>> = vec![
            vec!["mates", tx, "battery"],
            vec!["mates", tx, "type"],
            vec!["mates", tx, "trim"],
            vec!["mates", tx, "lock"],
            vec!["mates", tx, "name"],
            vec!["mates", tx, "mute"],
        ];
        let path_refs: Vec<&[&str]> = paths.iter().map(Vec::as_slice).collect();
        self.link
            .send_json(&subscription(self.link.next_xid(), &path_refs));
    }
}

impl WirelessMic for SennheiserChannel {
    fn uid(&self) -> Uid {
        self.uid
    }

    fn receiver_uid(&self) -> Uid {
        self.receiver_uid
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
            mute: state.mute(),
            frequency_hz: state.frequency_hz,
            group: None,
            channel_number: None,
            lock_mode: state.lock_mode,
            transmitter_type: state.transmitter_type.clone(),
            battery_level: state.battery_level,
            transmitter_connected: state.transmitter_connected,
        }
    }

    fn set_name(&self, name: &str) -> Result<()> {
        self.link
            .send_json(&path_tree(&[&self.rx_key, "name"], json!(name)));
        Ok(())
    }

    fn set_gain(&self, db: i32) -> Result<()> {
        let quantized = quantize_gain(db);
        self.link
            .send_json(&path_tree(&[&self.rx_key, "gain"], json!(quantized)));
        Ok(())
    }

    fn set_sensitivity(&self, db: i32) -> Result<()> {
        self.link
            .send_json(&path_tree(&["mates", &self.tx_key, "trim"], json!(db)));
        Ok(())
    }

    fn set_output_gain(&self, db: i32) -> Result<()> {
        self.link
            .send_json(&path_tree(&["audio1", &self.out_key, "gain"], json!(db)));
        Ok(())
    }

    fn set_mute(&self, mute: bool) -> Result<()> {
        self.link
            .send_json(&path_tree(&[&self.rx_key, "mute"], json!(mute)));
        Ok(())
    }

    fn set_frequency(&self, hz: u64) -> Result<()> {
        self.link
            .send_json(&path_tree(&[&self.rx_key, "frequency"], json!(hz / 1000)));
        Ok(())
    }

    fn set_group_channel(&self, _group: i32, _channel: i32) -> Result<()> {
        // SSC devices tune by frequency only.
        Err(Error::InvalidParameter(
            "group/channel tuning is not available on SSC receivers".into(),
        ))
    }

    fn set_lock_mode(&self, mode: LockMode) -> Result<()> {
        let locked = !matches!(mode, LockMode::None);
        self.link
            .send_json(&path_tree(&["mates", &self.tx_key, "lock"], json!(locked)));
        Ok(())
    }

    fn last_meter(&self) -> Option<MeteringData> {
        lock(&self.meters).last()
    }

    fn drain_meters(&self) -> Vec<MeteringData> {
        lock(&self.meters).drain()
    }

    fn start_rf_scan(&self, range: FrequencyRange, step_hz: u64) -> Result<RfScanHandle> {
        let step = (step_hz / FREQUENCY_GRID_HZ) * FREQUENCY_GRID_HZ;
        if step == 0 {
            return Err(Error::InvalidParameter(format!(
                "scan step {step_hz} Hz is below the {FREQUENCY_GRID_HZ} Hz tuning grid"
            )));
        }
        match self.scan.start(range, step) {
            ScanStart::InFlight(handle) => Ok(handle),
            ScanStart::New(publisher, handle) => {
                let restore_hz = lock(&self.state).frequency_hz;
                let link = Arc::clone(&self.link);
                let rx_key = self.rx_key.clone();
                let collector = Arc::clone(&self.collector);
                let dwell = self.polling_period;
                tokio::spawn(scan::run_scan(
                    link, rx_key, collector, publisher, range, step, dwell, restore_hz,
                ));
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
    use micnet_core::{RfScanState, EVENT_CHANNEL_CAPACITY};
    use tokio::sync::{broadcast, mpsc};

    fn test_channel() -> (
        Arc<SennheiserChannel>,
        mpsc::Receiver<crate::link::OutboundDatagram>,
        broadcast::Receiver<MicEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let link = Arc::new(SscLink::new(
            Uid::combine(0x1234, crate::manager::SENNHEISER_TYPE_TAG),
            "127.0.0.1:45".parse().unwrap(),
            out_tx,
            event_tx,
        ));
        (
            SennheiserChannel::new(0, link, Duration::from_millis(100)),
            out_rx,
            event_rx,
        )
    }

    fn sent_json(out_rx: &mut mpsc::Receiver<crate::link::OutboundDatagram>) -> Value {
        let datagram = out_rx.try_recv().expect("expected an outbound datagram");
        serde_json::from_slice(&datagram.payload).unwrap()
    }

    #[test]
    fn gain_update_sets_state_and_fires_event() {
        let (ch, _out, mut events) = test_channel();
        ch.handle_update("gain", &json!(6));
        assert_eq!(ch.snapshot().gain, Some(6));
        assert_eq!(
            events.try_recv().unwrap(),
            MicEvent::ChannelPropertyChanged {
                uid: ch.uid(),
                prop: ChannelProp::Gain
            }
        );
    }

    #[test]
    fn frequency_update_scales_from_khz() {
        let (ch, _out, _events) = test_channel();
        ch.handle_update("frequency", &json!(830_200));
        assert_eq!(ch.snapshot().frequency_hz, Some(830_200_000));
    }

    #[test]
    fn mute_is_or_of_rx_and_tx() {
        let (ch, _out, _events) = test_channel();
        assert_eq!(ch.snapshot().mute, None);

        ch.handle_update("mute", &json!(false));
        assert_eq!(ch.snapshot().mute, Some(false));

        ch.handle_mate_update("mute", &json!(true));
        assert_eq!(ch.snapshot().mute, Some(true));

        ch.handle_mate_update("mute", &json!(false));
        assert_eq!(ch.snapshot().mute, Some(false));

        ch.handle_update("mute", &json!(true));
        assert_eq!(ch.snapshot().mute, Some(true));
    }

    #[test]
    fn mate_connect_subscribes_tx_fields_once() {
        let (ch, mut out, mut events) = test_channel();
        ch.set_transmitter_connected(true);
        assert_eq!(ch.snapshot().transmitter_connected, Some(true));
        assert_eq!(
            events.try_recv().unwrap(),
            MicEvent::ChannelPropertyChanged {
                uid: ch.uid(),
                prop: ChannelProp::TransmitterConnected
            }
        );

        let sub = sent_json(&mut out);
        let body = &sub["osc"]["state"]["subscribe"][0];
        assert!(body["#"]["lifetime"].is_number());
        assert!(body["mates"]["tx1"]["battery"].is_null());
        assert!(body["mates"]["tx1"]["mute"].is_null());

        // Re-reporting connected neither re-subscribes nor re-fires.
        ch.set_transmitter_connected(true);
        assert!(out.try_recv().is_err());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn mate_battery_and_trim() {
        let (ch, _out, _events) = test_channel();
        ch.handle_mate_update("battery", &json!({"gauge": 80.0}));
        assert_eq!(ch.snapshot().battery_level, Some(0.8));
        ch.handle_mate_update("trim", &json!(-6));
        assert_eq!(ch.snapshot().sensitivity, Some(-6));
        ch.handle_mate_update("type", &json!("handheld"));
        assert_eq!(ch.snapshot().transmitter_type.as_deref(), Some("handheld"));
    }

    #[test]
    fn meter_update_feeds_queue() {
        let (ch, _out, _events) = test_channel();
        ch.handle_meter(&json!({"rssi": -85.0, "af": 50.0, "divi": 2}));
        let meter = ch.last_meter().unwrap();
        assert_eq!(meter.rssi_a, 0.5);
        assert_eq!(meter.audio_level, 0.5);
        assert_eq!(meter.diversity, DiversityIndicator::ANTENNA_B);
    }

    #[test]
    fn setters_format_ssc_paths() {
        let (ch, mut out, _events) = test_channel();
        ch.set_gain(7).unwrap();
        assert_eq!(sent_json(&mut out), json!({"rx1": {"gain": 6}}));
        ch.set_mute(true).unwrap();
        assert_eq!(sent_json(&mut out), json!({"rx1": {"mute": true}}));
        ch.set_frequency(830_200_000).unwrap();
        assert_eq!(sent_json(&mut out), json!({"rx1": {"frequency": 830_200}}));
        ch.set_output_gain(-6).unwrap();
        assert_eq!(sent_json(&mut out), json!({"audio1": {"out1": {"gain": -6}}}));
        ch.set_sensitivity(3).unwrap();
        assert_eq!(sent_json(&mut out), json!({"mates": {"tx1": {"trim": 3}}}));
        ch.set_lock_mode(LockMode::All).unwrap();
        assert_eq!(sent_json(&mut out), json!({"mates": {"tx1": {"lock": true}}}));
        assert!(ch.set_group_channel(1, 2).is_err());
        assert!(out.try_recv().is_err());
    }

    #[test]
    fn unknown_property_is_skipped() {
        let (ch, _out, mut events) = test_channel();
        ch.handle_update("wobble", &json!(3));
        assert_eq!(ch.snapshot(), ChannelSnapshot::default());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn scan_joins_in_flight_and_sweeps_the_grid() {
        let (ch, mut out, _events) = test_channel();
        ch.handle_update("frequency", &json!(830_000));

        let range = FrequencyRange::new(830_000_000, 830_050_000);
        // 30 kHz rounds down to the 25 kHz grid.
        let first = ch.start_rf_scan(range, 30_000).unwrap();
        let second = ch.start_rf_scan(range, 30_000).unwrap();
        assert_eq!(first.scan_id(), second.scan_id());

        // The worker tunes to each step; feed it one meter per dwell.
        for _ in 0..3 {
            let tune = loop {
                let datagram = out.recv().await.unwrap();
                let msg: Value = serde_json::from_slice(&datagram.payload).unwrap();
                if msg.get("rx1").and_then(|rx| rx.get("frequency")).is_some() {
                    break msg;
                }
            };
            assert!(tune["rx1"]["frequency"].as_u64().is_some());
            ch.handle_meter(&json!({"rssi": -90.0}));
        }

        let done = first.wait().await;
        assert_eq!(done.state, RfScanState::Completed);
        assert_eq!(done.samples.len(), 3);
        assert_eq!(
            done.samples.iter().map(|s| s.0).collect::<Vec<_>>(),
            vec![830_000_000, 830_025_000, 830_050_000]
        );
        assert!(done.samples.iter().all(|s| (s.1 + 90.0).abs() < 1e-3));

        // The pre-scan frequency is restored afterwards.
        let restore = loop {
            let datagram = out.recv().await.unwrap();
            let msg: Value = serde_json::from_slice(&datagram.payload).unwrap();
            if let Some(f) = msg.get("rx1").and_then(|rx| rx.get("frequency")) {
                break f.as_u64().unwrap();
            }
        };
        assert_eq!(restore, 830_000);
    }

    #[test]
    fn scan_step_below_grid_is_rejected() {
        let (ch, _out, _events) = test_channel();
        let range = FrequencyRange::new(830_000_000, 830_050_000);
        assert!(ch.start_rf_scan(range, 10_000).is_err());
    }
}
