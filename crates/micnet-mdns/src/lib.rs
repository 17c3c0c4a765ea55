//! # micnet-mdns
//!
//! DNS/mDNS support for micnet device discovery: a wire codec for DNS
//! messages (header, compressed domain names, typed RDATA) and an async
//! multicast client that sends service queries and streams back decoded
//! responses.
//!
//! Sennheiser receivers advertise themselves via mDNS under
//! `_ssc._udp.local`; the `micnet-sennheiser` crate drives [`MdnsClient`]
//! to find them.

pub mod client;
pub mod codec;

pub use client::{MdnsClient, MDNS_GROUP, MDNS_PORT};
pub use codec::{
    encode_query, DnsHeader, DnsMessage, DnsRdata, DnsRecord, RecordType, FLAG_RESPONSE,
    HEADER_LEN,
};
