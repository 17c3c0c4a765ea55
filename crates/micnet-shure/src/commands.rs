//! The UHF-R ASCII command grammar.
//!
//! Every sNet `Message` payload is a command of the form `"* BODY *"`.
//! Inbound bodies begin with `REPORT`, `SAMPLE`, or `NOTE <id>` (`UPDATE`
//! bodies are acknowledgements and carry nothing). The next token is a
//! single-digit channel selector (`1` or `2`); when it is absent the
//! command addresses the receiver itself. The remainder is the command
//! name followed by its arguments verbatim.
//!
//! ```text
//! * REPORT 1 MUTE ON *            channel 0, MUTE, "ON"
//! * NOTE 7 2 FREQUENCY 614000 *   note 7, channel 1, FREQUENCY, "614000"
//! * REPORT MODEL_NAME UHFR24 *    receiver-level, MODEL_NAME, "UHFR24"
//! ```
//!
//! This module is pure: parsing and building only, no I/O.

use micnet_core::{DiversityIndicator, Error, LockMode, Result};

/// How an inbound command arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShureKind {
    /// Reply to a `GET`, or an unsolicited state report.
    Report,
    /// High-rate metering sample.
    Sample,
    /// Unsolicited change notification; must be acknowledged with
    /// `* NOTED <id> *`.
    Note(i32),
    /// Acknowledgement of our own `UPDATE` registration; carries nothing.
    UpdateAck,
}

/// A parsed inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShureMessage {
    pub kind: ShureKind,
    /// 0-based channel index, or `None` for receiver-level commands.
    pub channel: Option<usize>,
    pub command: String,
    /// Raw argument text, possibly containing spaces.
    pub args: String,
}

fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start_matches(' ');
    match s.find(' ') {
        Some(at) => (&s[..at], &s[at + 1..]),
        None => (s, ""),
    }
}

/// Parse one `"* BODY *"` command body.
pub fn parse_message(msg: &str) -> Result<ShureMessage> {
    if msg.len() < 4 || !msg.starts_with("* ") || !msg.ends_with(" *") {
        return Err(Error::Protocol(format!(
            "command missing '* ... *' delimiters: '{msg}'"
        )));
    }
    let body = &msg[2..msg.len() - 2];

    // The verb is matched as a whole token so that e.g. "NOTED" does not
    // parse as a NOTE.
    let (verb, after_verb) = split_token(body);
    let (kind, rest) = match verb {
        "REPORT" => (ShureKind::Report, after_verb),
        "SAMPLE" => (ShureKind::Sample, after_verb),
        "NOTE" => {
            let (id_tok, rest) = split_token(after_verb);
            let id = id_tok
                .parse::<i32>()
                .map_err(|_| Error::Protocol(format!("bad note id in '{msg}'")))?;
            (ShureKind::Note(id), rest)
        }
        "UPDATE" => {
            return Ok(ShureMessage {
                kind: ShureKind::UpdateAck,
                channel: None,
                command: String::new(),
                args: String::new(),
            });
        }
        _ => {
            return Err(Error::Protocol(format!("unknown command type in '{msg}'")));
        }
    };

    let (selector, after_selector) = split_token(rest);
    let (channel, rest) = match selector {
        "1" => (Some(0), after_selector),
        "2" => (Some(1), after_selector),
        _ => (None, rest),
    };

    let (command, args) = split_token(rest);
    if command.is_empty() {
        return Err(Error::Protocol(format!("command name missing in '{msg}'")));
    }
    Ok(ShureMessage {
        kind,
        channel,
        command: command.to_owned(),
        args: args.to_owned(),
    })
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn wire_channel(channel: usize) -> usize {
    channel + 1
}

/// `* GET [ch] NAME *`
pub fn cmd_get(channel: Option<usize>, name: &str) -> String {
    match channel {
        Some(ch) => format!("* GET {} {name} *", wire_channel(ch)),
        None => format!("* GET {name} *"),
    }
}

/// `* SET [ch] NAME ARGS *`
pub fn cmd_set(channel: Option<usize>, name: &str, args: &str) -> String {
    match channel {
        Some(ch) => format!("* SET {} {name} {args} *", wire_channel(ch)),
        None => format!("* SET {name} {args} *"),
    }
}

/// `* METER ch ALL n *` enables metering every `interval` frames.
pub fn cmd_meter(channel: usize, interval: u32) -> String {
    format!("* METER {} ALL {interval} *", wire_channel(channel))
}

/// `* UPDATE ch ADD *` registers for unsolicited NOTE traffic.
pub fn cmd_update_add(channel: usize) -> String {
    format!("* UPDATE {} ADD *", wire_channel(channel))
}

/// `* NOTED id *` acknowledges a NOTE.
pub fn cmd_noted(note: i32) -> String {
    format!("* NOTED {note} *")
}

/// `* SCAN RESERVE ch token *`
pub fn cmd_scan_reserve(channel: usize, token: u32) -> String {
    format!("* SCAN RESERVE {} {token} *", wire_channel(channel))
}

/// `* SCAN RANGE ch step start end *`, all in kHz.
pub fn cmd_scan_range(channel: usize, step_khz: u64, start_khz: u64, end_khz: u64) -> String {
    format!(
        "* SCAN RANGE {} {step_khz} {start_khz} {end_khz} *",
        wire_channel(channel)
    )
}

/// `* SCAN RELEASE ch *`
pub fn cmd_scan_release(channel: usize) -> String {
    format!("* SCAN RELEASE {} *", wire_channel(channel))
}

// ---------------------------------------------------------------------------
// Wire value conversions
// ---------------------------------------------------------------------------

/// Raw RSSI is reported as 50 (strong) to 100 (weak); normalize so that
/// 50 maps to 1.0 and 100 maps to 0.0.
pub fn rssi_to_normalized(raw: i32) -> f32 {
    1.0 - (raw - 50) as f32 / 50.0
}

/// Audio indicator is 0..255.
pub fn audio_to_normalized(raw: i32) -> f32 {
    raw as f32 / 255.0
}

/// Transmitter gain on the wire is `0..=30`, offset so that 10 means
/// 0 dB. `UNKNOWN` is reported when no transmitter is paired.
pub fn tx_gain_from_wire(args: &str) -> Result<Option<i32>> {
    if args == "UNKNOWN" {
        return Ok(None);
    }
    let raw: i32 = args
        .parse()
        .map_err(|_| Error::Protocol(format!("bad TX gain '{args}'")))?;
    if !(0..=30).contains(&raw) {
        return Err(Error::Protocol(format!("TX gain {raw} outside 0..=30")));
    }
    Ok(Some(raw - 10))
}

/// Inverse of [`tx_gain_from_wire`]: domain dB `-10..=20` to wire units.
pub fn tx_gain_to_wire(db: i32) -> Result<i32> {
    if !(-10..=20).contains(&db) {
        return Err(Error::InvalidParameter(format!(
            "TX gain {db} dB outside -10..=20"
        )));
    }
    Ok(db + 10)
}

/// Transmitter trim (sensitivity) in dB, `-10..=15` on the wire.
pub fn tx_trim_from_wire(args: &str) -> Result<Option<i32>> {
    if args == "UNKNOWN" {
        return Ok(None);
    }
    let db: i32 = args
        .parse()
        .map_err(|_| Error::Protocol(format!("bad TX trim '{args}'")))?;
    if !(-10..=15).contains(&db) {
        return Err(Error::Protocol(format!("TX trim {db} outside -10..=15")));
    }
    Ok(Some(db))
}

/// Battery is reported as `U` (unknown, no transmitter data) or a digit
/// 1..=5 of battery bars.
pub fn battery_from_wire(args: &str) -> Result<Option<f32>> {
    let first = args
        .chars()
        .next()
        .ok_or_else(|| Error::Protocol("empty TX_BAT argument".into()))?;
    if first == 'U' {
        return Ok(None);
    }
    let bars = first as i32 - '0' as i32;
    if !(1..=5).contains(&bars) {
        return Err(Error::Protocol(format!("battery level '{args}' outside 1-5")));
    }
    Ok(Some(bars as f32 / 5.0))
}

/// Lock state keywords. `NOCHANGE` reports that nothing changed and maps
/// to `None`.
pub fn lock_from_wire(args: &str) -> Result<Option<LockMode>> {
    match args {
        "UNLOCK" => Ok(Some(LockMode::None)),
        "POWER" => Ok(Some(LockMode::Power)),
        "FREQ" => Ok(Some(LockMode::Frequency)),
        "FREQ_AND_POWER" => Ok(Some(LockMode::FrequencyPower)),
        "NOCHANGE" => Ok(None),
        other => Err(Error::Protocol(format!("unknown lock state '{other}'"))),
    }
}

pub fn lock_to_wire(mode: LockMode) -> &'static str {
    match mode {
        LockMode::None => "UNLOCK",
        LockMode::Power => "POWER",
        LockMode::Frequency => "FREQ",
        // UHF-R has no separate all-controls lock.
        LockMode::FrequencyPower | LockMode::All => "FREQ_AND_POWER",
    }
}

/// `ANTENNA` metering keyword to diversity flags.
pub fn antenna_from_wire(args: &str) -> DiversityIndicator {
    match args {
        "A" => DiversityIndicator::ANTENNA_A,
        "B" => DiversityIndicator::ANTENNA_B,
        "BOTH" => DiversityIndicator::ANTENNA_A.union(DiversityIndicator::ANTENNA_B),
        _ => DiversityIndicator::NONE,
    }
}
