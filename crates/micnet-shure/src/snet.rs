//! Shure sNet datagram framing.
//!
//! Every sNet datagram starts with a fixed 16-byte big-endian header:
//!
//! ```text
//! offset  size  field
//! 0       4     destination device id (0xffffffff = all devices)
//! 4       4     source device id
//! 8       2     reserved (zero)
//! 10      2     message kind (1 = discovery, 3 = message, 4 = special)
//! 12      2     payload length in bytes
//! 14      2     CRC-16 over the first 14 header bytes
//! ```
//!
//! The checksum is table-driven CRC-16 (reflected 0xA001 polynomial) and
//! covers only the header bytes before the checksum field. It is always
//! computed on outbound frames; inbound frames are accepted without
//! verification, matching how the devices themselves behave when talking
//! to the official control software.

use bytes::{BufMut, BytesMut};
use micnet_core::{Error, Result};

/// The device id this manager claims as its sNet source address.
pub const MANAGER_SNET_ID: u32 = 0x6A05_ADAD;

/// Destination id addressing every device on the segment.
pub const ALL_DEVICES_ID: u32 = 0xffff_ffff;

/// Size of the fixed header.
pub const HEADER_SIZE: usize = 16;

/// Number of leading header bytes covered by the checksum.
const CHECKSUM_SPAN: usize = HEADER_SIZE - 2;

/// sNet message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnetKind {
    Discovery,
    Message,
    Special,
    Unknown(u16),
}

impl SnetKind {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => SnetKind::Discovery,
            3 => SnetKind::Message,
            4 => SnetKind::Special,
            other => SnetKind::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            SnetKind::Discovery => 1,
            SnetKind::Message => 3,
            SnetKind::Special => 4,
            SnetKind::Unknown(other) => other,
        }
    }
}

// ---------------------------------------------------------------------------
// CRC-16
// ---------------------------------------------------------------------------

const fn build_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xA001
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u16; 256] = build_crc_table();

/// Compute the sNet CRC-16 over `data`, continuing from `prev` (0 for a
/// fresh computation).
pub fn checksum(data: &[u8], prev: u16) -> u16 {
    if data.is_empty() {
        return prev;
    }
    let mut sum = !prev;
    for &byte in data {
        let idx = ((sum as u8) ^ byte) as usize;
        sum = CRC_TABLE[idx] ^ (sum >> 8);
    }
    !sum
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// A decoded sNet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnetHeader {
    pub dest_id: u32,
    pub src_id: u32,
    pub kind: SnetKind,
    pub payload_len: u16,
    pub checksum: u16,
}

impl SnetHeader {
    /// Build a header for an outbound frame, computing the checksum.
    pub fn new(dest_id: u32, src_id: u32, kind: SnetKind, payload_len: u16) -> Self {
        let mut header = Self {
            dest_id,
            src_id,
            kind,
            payload_len,
            checksum: 0,
        };
        let mut bytes = [0u8; HEADER_SIZE];
        header.write_to(&mut bytes);
        header.checksum = checksum(&bytes[..CHECKSUM_SPAN], 0);
        header
    }

    /// Decode a header from the front of a datagram.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Protocol(format!(
                "sNet datagram too short: {} bytes",
                data.len()
            )));
        }
        let u32_at = |at: usize| u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let u16_at = |at: usize| u16::from_be_bytes([data[at], data[at + 1]]);
        Ok(Self {
            dest_id: u32_at(0),
            src_id: u32_at(4),
            kind: SnetKind::from_u16(u16_at(10)),
            payload_len: u16_at(12),
            checksum: u16_at(14),
        })
    }

    /// Serialize into a 16-byte buffer.
    pub fn write_to(&self, dst: &mut [u8; HEADER_SIZE]) {
        dst[0..4].copy_from_slice(&self.dest_id.to_be_bytes());
        dst[4..8].copy_from_slice(&self.src_id.to_be_bytes());
        dst[8..10].copy_from_slice(&0u16.to_be_bytes());
        dst[10..12].copy_from_slice(&self.kind.to_u16().to_be_bytes());
        dst[12..14].copy_from_slice(&self.payload_len.to_be_bytes());
        dst[14..16].copy_from_slice(&self.checksum.to_be_bytes());
    }

    /// Recompute the checksum over this header's first 14 bytes and check
    /// it against the stored value.
    pub fn verify_checksum(&self) -> bool {
        let mut bytes = [0u8; HEADER_SIZE];
        self.write_to(&mut bytes);
        checksum(&bytes[..CHECKSUM_SPAN], 0) == self.checksum
    }
}

// ---------------------------------------------------------------------------
// Frame encoding
// ---------------------------------------------------------------------------

/// Encode a text command frame addressed to `dest_id`.
pub fn encode_message(dest_id: u32, body: &str) -> Vec<u8> {
    let payload = body.as_bytes();
    let header = SnetHeader::new(dest_id, MANAGER_SNET_ID, SnetKind::Message, payload.len() as u16);
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    let mut head = [0u8; HEADER_SIZE];
    header.write_to(&mut head);
    buf.put_slice(&head);
    buf.put_slice(payload);
    buf.to_vec()
}

/// Encode the 8-byte discovery probe broadcast to all devices. Devices
/// answer with a discovery frame of their own, which is what registers
/// them.
pub fn encode_discovery() -> Vec<u8> {
    let header = SnetHeader::new(ALL_DEVICES_ID, MANAGER_SNET_ID, SnetKind::Discovery, 8);
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + 8);
    let mut head = [0u8; HEADER_SIZE];
    header.write_to(&mut head);
    buf.put_slice(&head);
    buf.put_u16(1);
    buf.put_u16(1);
    buf.put_u32(MANAGER_SNET_ID);
    buf.to_vec()
}
