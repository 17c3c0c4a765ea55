//! DNS/mDNS wire codec (RFC 1035 subset).
//!
//! Decodes a UDP datagram into a [`DnsMessage`]: a 12-byte header followed
//! by question and answer records. Domain names are sequences of
//! length-prefixed labels terminated by a zero byte; a length byte whose top
//! two bits are set is instead a 14-bit back-reference into the same
//! message, which is followed recursively. Pointers must point strictly
//! backwards, so pointer chains always terminate.
//!
//! Encoding covers what an mDNS *client* needs: query messages with one
//! question record. Classes carry the question/unicast-response distinction
//! in their top bit.
//!
//! # Wire layout
//!
//! ```text
//! header:   id u16 | flags u16 | qdcount u16 | ancount u16 | nscount u16 | arcount u16
//! question: name | type u16 | class u16
//! answer:   name | type u16 | class u16 | ttl i32 | rdlength u16 | rdata
//! ```
//!
//! All integers are big-endian.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};
use micnet_core::{Error, Result};

/// Length of the fixed DNS message header.
pub const HEADER_LEN: usize = 12;

/// `flags` bit set on response messages.
pub const FLAG_RESPONSE: u16 = 1 << 15;

/// Top bit of the class field: question/unicast-response marker.
const CLASS_QUESTION_BIT: u16 = 0x8000;

/// The Internet class.
pub const CLASS_INTERNET: u16 = 1;

fn truncated(what: &str) -> Error {
    Error::Protocol(format!("truncated DNS message: {what}"))
}

fn read_u16(data: &[u8], pos: &mut usize) -> Result<u16> {
    let bytes = data
        .get(*pos..*pos + 2)
        .ok_or_else(|| truncated("u16 field"))?;
    *pos += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = data
        .get(*pos..*pos + 4)
        .ok_or_else(|| truncated("u32 field"))?;
    *pos += 4;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// The fixed 12-byte DNS message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsHeader {
    pub transaction_id: u16,
    pub flags: u16,
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
}

impl DnsHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        Ok(Self {
            transaction_id: read_u16(data, &mut pos)?,
            flags: read_u16(data, &mut pos)?,
            question_count: read_u16(data, &mut pos)?,
            answer_count: read_u16(data, &mut pos)?,
            authority_count: read_u16(data, &mut pos)?,
            additional_count: read_u16(data, &mut pos)?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.transaction_id);
        buf.put_u16(self.flags);
        buf.put_u16(self.question_count);
        buf.put_u16(self.answer_count);
        buf.put_u16(self.authority_count);
        buf.put_u16(self.additional_count);
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0
    }
}

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// DNS record type. Types without a dedicated RDATA parser decode to
/// [`DnsRdata::Raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Ns,
    Cname,
    Soa,
    Ptr,
    Hinfo,
    Mx,
    Txt,
    Aaaa,
    Srv,
    Other(u16),
}

impl RecordType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::Ns,
            5 => RecordType::Cname,
            6 => RecordType::Soa,
            12 => RecordType::Ptr,
            13 => RecordType::Hinfo,
            15 => RecordType::Mx,
            16 => RecordType::Txt,
            28 => RecordType::Aaaa,
            33 => RecordType::Srv,
            other => RecordType::Other(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Ns => 2,
            RecordType::Cname => 5,
            RecordType::Soa => 6,
            RecordType::Ptr => 12,
            RecordType::Hinfo => 13,
            RecordType::Mx => 15,
            RecordType::Txt => 16,
            RecordType::Aaaa => 28,
            RecordType::Srv => 33,
            RecordType::Other(other) => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Domain names and character strings
// ---------------------------------------------------------------------------

/// Parse a domain name at `*pos`, following compression pointers.
///
/// `data` must be the full message buffer (pointers are absolute offsets
/// into it). `*pos` is left just past the name as it appears inline, which
/// for a pointer is two bytes.
pub fn parse_name(data: &[u8], pos: &mut usize) -> Result<String> {
    let mut labels = Vec::new();
    read_labels(data, pos, &mut labels)?;
    Ok(labels.join("."))
}

fn read_labels(data: &[u8], pos: &mut usize, labels: &mut Vec<String>) -> Result<()> {
    loop {
        let here = *pos;
        let len = *data.get(*pos).ok_or_else(|| truncated("name label"))?;
        *pos += 1;
        if len & 0xc0 == 0xc0 {
            let low = *data.get(*pos).ok_or_else(|| truncated("name pointer"))?;
            *pos += 1;
            let target = (((len & 0x3f) as usize) << 8) | low as usize;
            // A pointer may only refer to earlier bytes. Every jump then
            // strictly decreases the offset, so chains cannot loop.
            if target >= here {
                return Err(Error::Protocol(format!(
                    "DNS compression pointer at {here} points forwards to {target}"
                )));
            }
            let mut target_pos = target;
            return read_labels(data, &mut target_pos, labels);
        }
        if len == 0 {
            return Ok(());
        }
        let end = *pos + len as usize;
        let bytes = data.get(*pos..end).ok_or_else(|| truncated("name label"))?;
        labels.push(String::from_utf8_lossy(bytes).into_owned());
        *pos = end;
    }
}

/// Encode a dotted name as length-prefixed labels plus the terminating
/// zero byte. No compression is emitted.
pub fn encode_name(name: &str, buf: &mut BytesMut) {
    for label in name.split('.') {
        buf.put_u8(label.len() as u8);
        buf.put_slice(label.as_bytes());
    }
    buf.put_u8(0);
}

/// Parse one length-prefixed character string (TXT/HINFO payloads).
fn parse_character_string(data: &[u8], pos: &mut usize) -> Result<String> {
    let len = *data
        .get(*pos)
        .ok_or_else(|| truncated("character string"))? as usize;
    *pos += 1;
    let end = *pos + len;
    let bytes = data
        .get(*pos..end)
        .ok_or_else(|| truncated("character string"))?;
    *pos = end;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

// ---------------------------------------------------------------------------
// RDATA
// ---------------------------------------------------------------------------

/// Typed RDATA payload of an answer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsRdata {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Hinfo {
        cpu: String,
        os: String,
    },
    Mx {
        preference: i16,
        exchange: String,
    },
    Ns(String),
    Ptr(String),
    Soa {
        mname: String,
        rname: String,
        serial: u32,
        refresh: i32,
        retry: i32,
        expire: i32,
        minimum: u32,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Txt(Vec<String>),
    /// Unrecognized record type: raw RDATA bytes.
    Raw(Vec<u8>),
}

impl DnsRdata {
    /// Parse RDATA of `rtype` spanning `start..end` of the full message.
    fn parse(rtype: RecordType, data: &[u8], start: usize, end: usize) -> Result<Self> {
        if end > data.len() || start > end {
            return Err(truncated("rdata"));
        }
        let mut pos = start;
        let rdata = match rtype {
            RecordType::A => {
                let bytes = data.get(pos..pos + 4).ok_or_else(|| truncated("A rdata"))?;
                DnsRdata::A(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
            }
            RecordType::Aaaa => {
                let bytes = data
                    .get(pos..pos + 16)
                    .ok_or_else(|| truncated("AAAA rdata"))?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                DnsRdata::Aaaa(Ipv6Addr::from(octets))
            }
            RecordType::Cname => DnsRdata::Cname(parse_name(data, &mut pos)?),
            RecordType::Ns => DnsRdata::Ns(parse_name(data, &mut pos)?),
            RecordType::Ptr => DnsRdata::Ptr(parse_name(data, &mut pos)?),
            RecordType::Hinfo => {
                let cpu = parse_character_string(data, &mut pos)?;
                let os = parse_character_string(data, &mut pos)?;
                DnsRdata::Hinfo { cpu, os }
            }
            RecordType::Mx => {
                let preference = read_u16(data, &mut pos)? as i16;
                let exchange = parse_name(data, &mut pos)?;
                DnsRdata::Mx {
                    preference,
                    exchange,
                }
            }
            RecordType::Soa => {
                let mname = parse_name(data, &mut pos)?;
                let rname = parse_name(data, &mut pos)?;
                DnsRdata::Soa {
                    mname,
                    rname,
                    serial: read_u32(data, &mut pos)?,
                    refresh: read_u32(data, &mut pos)? as i32,
                    retry: read_u32(data, &mut pos)? as i32,
                    expire: read_u32(data, &mut pos)? as i32,
                    minimum: read_u32(data, &mut pos)?,
                }
            }
            RecordType::Srv => {
                let priority = read_u16(data, &mut pos)?;
                let weight = read_u16(data, &mut pos)?;
                let port = read_u16(data, &mut pos)?;
                let target = parse_name(data, &mut pos)?;
                DnsRdata::Srv {
                    priority,
                    weight,
                    port,
                    target,
                }
            }
            RecordType::Txt => {
                let mut strings = Vec::new();
                while pos < end {
                    strings.push(parse_character_string(data, &mut pos)?);
                }
                DnsRdata::Txt(strings)
            }
            RecordType::Other(_) => DnsRdata::Raw(data[start..end].to_vec()),
        };
        Ok(rdata)
    }
}

// ---------------------------------------------------------------------------
// Records and messages
// ---------------------------------------------------------------------------

/// One question or answer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: RecordType,
    pub class: u16,
    /// Set when the class field's top bit marks this as a question (or a
    /// unicast-response request).
    pub question: bool,
    /// Present on answer records only.
    pub ttl: Option<i32>,
    /// Present on answer records only.
    pub rdata: Option<DnsRdata>,
}

impl DnsRecord {
    /// Parse a record at `*pos` within the full message buffer.
    pub fn parse(data: &[u8], pos: &mut usize) -> Result<Self> {
        let name = parse_name(data, pos)?;
        let rtype = RecordType::from_u16(read_u16(data, pos)?);
        let class_raw = read_u16(data, pos)?;
        let class = class_raw & 0x7fff;
        let question = class_raw & CLASS_QUESTION_BIT != 0;

        if question {
            return Ok(Self {
                name,
                rtype,
                class,
                question,
                ttl: None,
                rdata: None,
            });
        }

        let ttl = read_u32(data, pos)? as i32;
        let rdlength = read_u16(data, pos)? as usize;
        let start = *pos;
        let end = start + rdlength;
        let rdata = DnsRdata::parse(rtype, data, start, end)?;
        *pos = end;
        Ok(Self {
            name,
            rtype,
            class,
            question,
            ttl: Some(ttl),
            rdata: Some(rdata),
        })
    }
}

/// A decoded DNS/mDNS message.
///
/// Authority and additional records are counted in the header but not
/// decoded; discovery only consumes questions and answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub questions: Vec<DnsRecord>,
    pub answers: Vec<DnsRecord>,
}

impl DnsMessage {
    /// Decode a full datagram.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(truncated("header"));
        }
        let header = DnsHeader::parse(data)?;
        let mut pos = HEADER_LEN;
        let mut questions = Vec::with_capacity(header.question_count as usize);
        for _ in 0..header.question_count {
            questions.push(DnsRecord::parse(data, &mut pos)?);
        }
        let mut answers = Vec::with_capacity(header.answer_count as usize);
        for _ in 0..header.answer_count {
            answers.push(DnsRecord::parse(data, &mut pos)?);
        }
        Ok(Self {
            header,
            questions,
            answers,
        })
    }
}

/// Encode a single-question query for `name` with the unicast-response bit
/// set, so devices answer the querying socket directly.
pub fn encode_query(transaction_id: u16, name: &str, rtype: RecordType) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + name.len() + 6);
    let header = DnsHeader {
        transaction_id,
        flags: 0,
        question_count: 1,
        answer_count: 0,
        authority_count: 0,
        additional_count: 0,
    };
    header.encode(&mut buf);
    encode_name(name, &mut buf);
    buf.put_u16(rtype.to_u16());
    buf.put_u16(CLASS_INTERNET | CLASS_QUESTION_BIT);
    buf.to_vec()
}
