//! Receiver-driven RF spectrum scan.
//!
//! The UHF-R runs the sweep itself; the client reserves the channel,
//! hands it the range, and consumes streamed level batches:
//!
//! ```text
//! -> * SCAN RESERVE 1 <token> *
//! <- * REPORT 1 SCAN RESERVE ACK <token> *
//! -> * SCAN RANGE 1 <stepKHz> <startKHz> <endKHz> *
//! <- * REPORT 1 RFLEVEL <n> <freqKHz> <dBm> ... *     (repeated)
//! <- * REPORT 1 SCAN DONE *
//! -> * SCAN RELEASE 1 *                               (until RELEASED)
//! <- * REPORT 1 SCAN RELEASED *
//! ```
//!
//! While a channel is reserved it stops metering; the worker re-enables
//! metering after release. The whole exchange is bounded by a 180 second
//! timeout, after which the scan settles into `Failure` and the channel
//! is released best-effort.

use std::sync::Arc;
use std::time::Duration;

use micnet_core::{Error, Result, RfScanState, ScanPublisher};
use tokio::sync::mpsc;

use crate::commands::{cmd_meter, cmd_scan_range, cmd_scan_release, cmd_scan_reserve};
use crate::link::ReceiverLink;

/// Overall time limit for one sweep, reservation to completion.
pub(crate) const SCAN_TIMEOUT: Duration = Duration::from_secs(180);

/// How long to wait for `RELEASED` before re-sending `SCAN RELEASE`.
const RELEASE_RETRY: Duration = Duration::from_secs(2);
const MAX_RELEASE_ATTEMPTS: u32 = 5;

/// Capacity of the per-scan inbound event queue.
pub(crate) const SCAN_EVENT_CAPACITY: usize = 64;

/// Scan-protocol messages routed from the receive loop to the worker.
#[derive(Debug)]
pub(crate) enum ScanEvent {
    ReserveAck(u32),
    /// One `RFLEVEL` batch of `(frequency_hz, strength_dbm)` samples.
    Batch(Vec<(u64, f32)>),
    Done,
    Released,
}

/// Drive one sweep to a terminal state. Consumes the event queue created
/// for this scan; the caller clears the channel's scan-event slot when
/// this returns.
pub(crate) async fn run_scan(
    link: Arc<ReceiverLink>,
    index: usize,
    publisher: ScanPublisher,
    mut events: mpsc::Receiver<ScanEvent>,
    token: u32,
    meter_interval: u32,
) {
    match tokio::time::timeout(SCAN_TIMEOUT, drive(&link, index, &publisher, &mut events, token))
        .await
    {
        Ok(Ok(())) => {
            publisher.complete();
            tracing::debug!(uid = %link.uid, channel = index, "RF scan completed");
        }
        Ok(Err(e)) => {
            tracing::warn!(uid = %link.uid, channel = index, error = %e, "RF scan failed");
            publisher.fail(e.to_string());
        }
        Err(_) => {
            tracing::warn!(uid = %link.uid, channel = index, "RF scan timed out");
            publisher.fail("scan protocol timed out");
        }
    }

    release(&link, index, &mut events).await;
    // Reserved channels stop metering; turn it back on.
    link.send_text(&cmd_meter(index, meter_interval));
}

async fn drive(
    link: &ReceiverLink,
    index: usize,
    publisher: &ScanPublisher,
    events: &mut mpsc::Receiver<ScanEvent>,
    token: u32,
) -> Result<()> {
    link.send_text(&cmd_scan_reserve(index, token));
    loop {
        match events.recv().await.ok_or(Error::ChannelClosed)? {
            ScanEvent::ReserveAck(t) if t == token => break,
            other => {
                tracing::trace!(?other, "ignoring scan event while awaiting reservation");
            }
        }
    }

    let (step_khz, start_khz, end_khz, expected) = {
        let mut out = (0, 0, 0, 0);
        publisher.update(|d| {
            d.state = RfScanState::Running;
            out = (
                d.step_hz / 1000,
                d.range.start_hz / 1000,
                d.range.end_hz / 1000,
                d.expected_samples(),
            );
        });
        out
    };
    link.send_text(&cmd_scan_range(index, step_khz, start_khz, end_khz));

    loop {
        match events.recv().await.ok_or(Error::ChannelClosed)? {
            ScanEvent::Batch(samples) => {
                publisher.update(|d| {
                    d.samples.extend_from_slice(&samples);
                    if expected > 0 {
                        d.progress = (d.samples.len() as f32 / expected as f32).min(1.0);
                    }
                });
            }
            ScanEvent::Done => return Ok(()),
            other => {
                tracing::trace!(?other, "ignoring scan event while sweeping");
            }
        }
    }
}

/// Ask the device to release the channel, retrying until `RELEASED` is
/// observed or attempts run out.
async fn release(link: &ReceiverLink, index: usize, events: &mut mpsc::Receiver<ScanEvent>) {
    for attempt in 0..MAX_RELEASE_ATTEMPTS {
        link.send_text(&cmd_scan_release(index));
        let deadline = tokio::time::sleep(RELEASE_RETRY);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.recv() => match event {
                    Some(ScanEvent::Released) => return,
                    Some(_) => continue,
                    None => return,
                },
            }
        }
        tracing::debug!(uid = %link.uid, channel = index, attempt, "no RELEASED yet, retrying");
    }
    tracing::warn!(uid = %link.uid, channel = index, "device never confirmed scan release");
}

/// Parse the arguments of an `RFLEVEL` report: a sample count followed by
/// `count` pairs of frequency (kHz) and level (dBm, negative).
pub(crate) fn parse_rflevel(args: &str) -> Result<Vec<(u64, f32)>> {
    let mut tokens = args.split_ascii_whitespace();
    let count: usize = tokens
        .next()
        .ok_or_else(|| Error::Protocol("RFLEVEL missing sample count".into()))?
        .parse()
        .map_err(|_| Error::Protocol(format!("bad RFLEVEL count in '{args}'")))?;
    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        let freq_khz: u64 = tokens
            .next()
            .ok_or_else(|| Error::Protocol(format!("RFLEVEL truncated: '{args}'")))?
            .parse()
            .map_err(|_| Error::Protocol(format!("bad RFLEVEL frequency in '{args}'")))?;
        let dbm: f32 = tokens
            .next()
            .ok_or_else(|| Error::Protocol(format!("RFLEVEL truncated: '{args}'")))?
            .parse()
            .map_err(|_| Error::Protocol(format!("bad RFLEVEL level in '{args}'")))?;
        samples.push((freq_khz * 1000, dbm));
    }
    Ok(samples)
}
