//! Core value types shared across all vendor backends.
//!
//! These types form the common data model: every vendor driver normalizes
//! its wire representation into these before it reaches application code.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A process-local stable identifier for a receiver or a channel.
///
/// UIDs are derived by hashing a vendor-specific device identity together
/// with a vendor type tag, so they stay stable across address changes and
/// never collide between vendors. Channel UIDs hash the owning receiver's
/// UID with the 1-based channel number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub u32);

impl Uid {
    /// Combine two 32-bit values into one with the classic 17/31
    /// multiply-accumulate hash, wrapping on overflow.
    pub fn combine(a: u32, b: u32) -> Self {
        let mut hash = 17u32;
        hash = hash.wrapping_mul(31).wrapping_add(a);
        hash = hash.wrapping_mul(31).wrapping_add(b);
        Uid(hash)
    }

    /// The UID of the channel at `index` (0-based) on the receiver with
    /// this UID.
    pub fn channel(self, index: usize) -> Self {
        Uid::combine(self.0, index as u32 + 1)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// A contiguous tunable frequency interval in hertz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyRange {
    /// Lower bound, inclusive, in Hz.
    pub start_hz: u64,
    /// Upper bound, inclusive, in Hz.
    pub end_hz: u64,
}

impl FrequencyRange {
    pub fn new(start_hz: u64, end_hz: u64) -> Self {
        Self { start_hz, end_hz }
    }

    /// Width of the range in Hz.
    pub fn span_hz(&self) -> u64 {
        self.end_hz.saturating_sub(self.start_hz)
    }
}

impl fmt::Display for FrequencyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3}-{:.3} MHz",
            self.start_hz as f64 / 1e6,
            self.end_hz as f64 / 1e6
        )
    }
}

/// Which antenna(s) the receiver's diversity circuit currently favors.
///
/// Stored as bitflags so four-antenna receivers can report combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiversityIndicator(pub u8);

impl DiversityIndicator {
    pub const NONE: Self = Self(0);
    pub const ANTENNA_A: Self = Self(1 << 0);
    pub const ANTENNA_B: Self = Self(1 << 1);
    pub const ANTENNA_C: Self = Self(1 << 2);
    pub const ANTENNA_D: Self = Self(1 << 3);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// One metering sample from a channel.
///
/// Sampled at tens of hertz while metering is enabled. All levels are
/// normalized to `0.0..=1.0` by the vendor driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeteringData {
    /// RF signal strength on antenna A, normalized.
    pub rssi_a: f32,
    /// RF signal strength on antenna B, normalized.
    pub rssi_b: f32,
    /// Audio level, normalized.
    pub audio_level: f32,
    /// Active diversity antenna(s).
    pub diversity: DiversityIndicator,
}

/// Transmitter control-lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// No controls locked.
    None,
    /// Power switch locked.
    Power,
    /// Frequency adjustment locked.
    Frequency,
    /// Both frequency and power locked.
    FrequencyPower,
    /// All controls locked.
    All,
}

/// How a receiver obtains its IP configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpMode {
    Dhcp,
    Manual,
}

/// A 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| Error::Protocol(format!("bad MAC address: {s}")))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| Error::Protocol(format!("bad MAC address: {s}")))?;
        }
        if parts.next().is_some() {
            return Err(Error::Protocol(format!("bad MAC address: {s}")));
        }
        Ok(MacAddress(bytes))
    }
}

/// Static IP configuration pushed to a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpConfig {
    pub mode: IpMode,
    pub address: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

/// Copy-on-read snapshot of a receiver's cached identity and network state.
///
/// Produced on demand from the live entity; fields the device has not yet
/// reported are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiverSnapshot {
    pub model_name: Option<String>,
    pub manufacturer: Option<String>,
    pub firmware_version: Option<String>,
    pub freq_band: Option<String>,
    pub frequency_ranges: Option<Vec<FrequencyRange>>,
    pub ip_address: Option<Ipv4Addr>,
    pub subnet: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub ip_mode: Option<IpMode>,
    pub mac_address: Option<MacAddress>,
}

/// Copy-on-read snapshot of a channel's cached state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSnapshot {
    pub name: Option<String>,
    /// Receiver audio gain in dB.
    pub gain: Option<i32>,
    /// Transmitter input trim in dB.
    pub sensitivity: Option<i32>,
    /// Receiver output level in dB.
    pub output_gain: Option<i32>,
    /// Muted if either the RX or the paired TX is muted.
    pub mute: Option<bool>,
    /// Carrier frequency in Hz.
    pub frequency_hz: Option<u64>,
    pub group: Option<i32>,
    pub channel_number: Option<i32>,
    pub lock_mode: Option<LockMode>,
    pub transmitter_type: Option<String>,
    /// Battery fill fraction `0.0..=1.0`; `None` while unknown, which is
    /// distinct from an empty battery.
    pub battery_level: Option<f32>,
    /// Whether a transmitter is currently paired and powered on.
    pub transmitter_connected: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_combine_matches_reference_hash() {
        // hash = (17*31 + a)*31 + b
        let uid = Uid::combine(0, 0);
        assert_eq!(uid.0, 17u32.wrapping_mul(31).wrapping_mul(31));
        let uid = Uid::combine(1, 2);
        assert_eq!(uid.0, (17u32 * 31 + 1) * 31 + 2);
    }

    #[test]
    fn uid_combine_wraps() {
        // Must not panic on overflow.
        let _ = Uid::combine(u32::MAX, u32::MAX);
    }

    #[test]
    fn uid_channel_derivation_is_stable_and_distinct() {
        let rx = Uid::combine(0xDEADBEEF, 0x53485552);
        let ch0 = rx.channel(0);
        let ch1 = rx.channel(1);
        assert_ne!(ch0, ch1);
        assert_ne!(ch0, rx);
        assert_eq!(ch0, Uid::combine(rx.0, 1));
        assert_eq!(ch1, Uid::combine(rx.0, 2));
    }

    #[test]
    fn uid_display_hex() {
        assert_eq!(Uid(0xAB).to_string(), "0x000000AB");
    }

    #[test]
    fn frequency_range_span() {
        let r = FrequencyRange::new(578_000_000, 638_000_000);
        assert_eq!(r.span_hz(), 60_000_000);
    }

    #[test]
    fn frequency_range_display() {
        let r = FrequencyRange::new(578_000_000, 638_000_000);
        assert_eq!(r.to_string(), "578.000-638.000 MHz");
    }

    #[test]
    fn diversity_flags() {
        let both = DiversityIndicator::ANTENNA_A.union(DiversityIndicator::ANTENNA_B);
        assert!(both.contains(DiversityIndicator::ANTENNA_A));
        assert!(both.contains(DiversityIndicator::ANTENNA_B));
        assert!(!both.contains(DiversityIndicator::ANTENNA_C));
        assert!(DiversityIndicator::NONE.contains(DiversityIndicator::NONE));
    }

    #[test]
    fn mac_address_round_trip() {
        let mac: MacAddress = "00:0e:dd:40:91:2a".parse().unwrap();
        assert_eq!(mac.to_string(), "00:0E:DD:40:91:2A");
    }

    #[test]
    fn mac_address_rejects_garbage() {
        assert!("00:0e:dd:40:91".parse::<MacAddress>().is_err());
        assert!("00:0e:dd:40:91:2a:ff".parse::<MacAddress>().is_err());
        assert!("zz:0e:dd:40:91:2a".parse::<MacAddress>().is_err());
    }

    #[test]
    fn snapshots_default_to_unknown() {
        let snap = ChannelSnapshot::default();
        assert!(snap.name.is_none());
        assert!(snap.battery_level.is_none());
        assert!(snap.mute.is_none());
    }
}
