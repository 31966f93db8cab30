//! Minimal SNMPv1 GET client for a single `Counter32` object.
//!
//! Requests are stateless: every call resolves the agent, opens a fresh UDP
//! socket, sends one GET-Request and waits at most [`RECV_TIMEOUT`] for the
//! answer. There is no retry here; the sampling loop retries on its next tick.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use thiserror::Error;

pub const SNMP_PORT: u16 = 161;
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_MESSAGE_SIZE: usize = 1500;

/// `ifInOctets` column of the interfaces table.
pub const IF_IN_OCTETS: u32 = 10;
/// `ifOutOctets` column of the interfaces table.
pub const IF_OUT_OCTETS: u32 = 16;

const SNMP_VERSION_1: i64 = 0;

mod tag {
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OID: u8 = 0x06;
    pub const SEQUENCE: u8 = 0x30;
    pub const COUNTER32: u8 = 0x41;
    pub const GET_REQUEST: u8 = 0xA0;
    pub const GET_RESPONSE: u8 = 0xA2;
}

static NEXT_REQUEST_ID: Lazy<AtomicU32> = Lazy::new(|| {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(1);
    AtomicU32::new(seed)
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message truncated at offset {0}")]
    Truncated(usize),
    #[error("expected tag {expected:#04x} at offset {offset}, found {found:#04x}")]
    UnexpectedTag { expected: u8, found: u8, offset: usize },
    #[error("unsupported length form {0:#04x}")]
    UnsupportedLength(u8),
    #[error("invalid {0} encoding")]
    Invalid(&'static str),
}

#[derive(Debug, Error)]
pub enum SnmpError {
    #[error("cannot resolve {0}")]
    Resolve(String),
    #[error("request cannot be encoded: {0}")]
    Encode(&'static str),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    Decode(#[from] DecodeError),
    #[error("response request-id {received} does not match {sent}")]
    RequestIdMismatch { sent: i64, received: i64 },
    #[error("agent reported error-status {status} at index {index}")]
    Agent { status: i64, index: i64 },
}

/// Decoded GetResponse carrying a `Counter32` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponse {
    pub community: String,
    pub request_id: i64,
    pub error_status: i64,
    pub error_index: i64,
    pub oid: Vec<u32>,
    pub value: u32,
}

/// OID of an interfaces-table column for one interface:
/// `1.3.6.1.2.1.2.2.1.<column>.<if_index>`.
pub fn if_table_oid(column: u32, if_index: u32) -> [u32; 11] {
    [1, 3, 6, 1, 2, 1, 2, 2, 1, column, if_index]
}

/// Append a BER length: short form below 128, `0x81 nn` up to 255,
/// `0x82 nn nn` up to 65535.
pub fn encode_length(len: usize, out: &mut Vec<u8>) -> Result<(), SnmpError> {
    match len {
        0..=127 => out.push(len as u8),
        128..=255 => out.extend_from_slice(&[0x81, len as u8]),
        256..=65535 => out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]),
        _ => return Err(SnmpError::Encode("length exceeds 65535")),
    }
    Ok(())
}

fn encode_tlv(tag: u8, content: &[u8], out: &mut Vec<u8>) -> Result<(), SnmpError> {
    out.push(tag);
    encode_length(content.len(), out)?;
    out.extend_from_slice(content);
    Ok(())
}

/// Minimal big-endian two's complement content of a non-negative integer.
fn integer_content(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    let mut content = Vec::with_capacity(5);
    if bytes[first] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[first..]);
    content
}

/// Base-128 sub-identifiers; the first two arcs share one as `arc0 * 40 + arc1`.
fn oid_content(oid: &[u32]) -> Result<Vec<u8>, SnmpError> {
    let [arc0, arc1, rest @ ..] = oid else {
        return Err(SnmpError::Encode("OID needs at least two arcs"));
    };
    if *arc0 > 2 || (*arc0 < 2 && *arc1 >= 40) {
        return Err(SnmpError::Encode("OID root arcs out of range"));
    }

    let mut content = Vec::with_capacity(oid.len() + 4);
    push_subidentifier(arc0 * 40 + arc1, &mut content);
    for &arc in rest {
        push_subidentifier(arc, &mut content);
    }
    Ok(content)
}

fn push_subidentifier(mut value: u32, out: &mut Vec<u8>) {
    let mut groups = [0u8; 5];
    let mut n = 0;
    loop {
        groups[n] = (value & 0x7F) as u8;
        n += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let continuation = if i > 0 { 0x80 } else { 0 };
        out.push(groups[i] | continuation);
    }
}

fn encode_message(
    community: &str,
    pdu_tag: u8,
    request_id: u32,
    oid: &[u32],
    value: (u8, &[u8]),
) -> Result<Vec<u8>, SnmpError> {
    let mut varbind = Vec::new();
    encode_tlv(tag::OID, &oid_content(oid)?, &mut varbind)?;
    encode_tlv(value.0, value.1, &mut varbind)?;

    let mut varbind_list = Vec::new();
    encode_tlv(tag::SEQUENCE, &varbind, &mut varbind_list)?;

    let mut pdu = Vec::new();
    encode_tlv(tag::INTEGER, &integer_content(request_id), &mut pdu)?;
    encode_tlv(tag::INTEGER, &integer_content(0), &mut pdu)?;
    encode_tlv(tag::INTEGER, &integer_content(0), &mut pdu)?;
    encode_tlv(tag::SEQUENCE, &varbind_list, &mut pdu)?;

    let mut message = Vec::new();
    encode_tlv(tag::INTEGER, &integer_content(SNMP_VERSION_1 as u32), &mut message)?;
    encode_tlv(tag::OCTET_STRING, community.as_bytes(), &mut message)?;
    encode_tlv(pdu_tag, &pdu, &mut message)?;

    let mut out = Vec::with_capacity(message.len() + 4);
    encode_tlv(tag::SEQUENCE, &message, &mut out)?;
    Ok(out)
}

/// Build a complete SNMPv1 GET-Request for one OID with a NULL value.
pub fn encode_get_request(community: &str, oid: &[u32], request_id: u32) -> Result<Vec<u8>, SnmpError> {
    encode_message(community, tag::GET_REQUEST, request_id, oid, (tag::NULL, &[]))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8, DecodeError> {
        let b = *self.buf.get(self.pos).ok_or(DecodeError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn length(&mut self) -> Result<usize, DecodeError> {
        let first = self.byte()?;
        if first < 0x80 {
            return Ok(first as usize);
        }
        let width = (first & 0x7F) as usize;
        if width == 0 || width > 4 {
            return Err(DecodeError::UnsupportedLength(first));
        }
        let mut len = 0usize;
        for _ in 0..width {
            len = (len << 8) | self.byte()? as usize;
        }
        Ok(len)
    }

    /// Consume a tag and length header, failing on any other tag.
    fn header(&mut self, expected: u8) -> Result<usize, DecodeError> {
        let offset = self.pos;
        let found = self.byte()?;
        if found != expected {
            return Err(DecodeError::UnexpectedTag { expected, found, offset });
        }
        self.length()
    }

    /// Consume a whole primitive element and return its content.
    fn primitive(&mut self, expected: u8) -> Result<&'a [u8], DecodeError> {
        let len = self.header(expected)?;
        self.content(len)
    }

    /// Consume an element of whatever tag is next.
    fn any(&mut self) -> Result<(u8, &'a [u8]), DecodeError> {
        let found = self.byte()?;
        let len = self.length()?;
        Ok((found, self.content(len)?))
    }

    fn content(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(len).ok_or(DecodeError::Truncated(self.pos))?;
        let content = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated(self.buf.len()))?;
        self.pos = end;
        Ok(content)
    }

    fn integer(&mut self) -> Result<i64, DecodeError> {
        decode_integer(self.primitive(tag::INTEGER)?)
    }
}

fn decode_integer(content: &[u8]) -> Result<i64, DecodeError> {
    if content.is_empty() || content.len() > 8 {
        return Err(DecodeError::Invalid("INTEGER"));
    }
    let negative = content[0] & 0x80 != 0;
    let init = if negative { -1i64 } else { 0 };
    Ok(content.iter().fold(init, |acc, &b| (acc << 8) | i64::from(b)))
}

fn decode_unsigned32(content: &[u8]) -> Result<u32, DecodeError> {
    if content.is_empty() || content.len() > 5 {
        return Err(DecodeError::Invalid("Counter32"));
    }
    let value = content.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    u32::try_from(value).map_err(|_| DecodeError::Invalid("Counter32"))
}

fn decode_oid(content: &[u8]) -> Result<Vec<u32>, DecodeError> {
    let mut arcs = Vec::with_capacity(content.len() + 1);
    let mut value: u32 = 0;
    let mut pending = false;
    for &b in content {
        if value > (u32::MAX >> 7) {
            return Err(DecodeError::Invalid("OID"));
        }
        value = (value << 7) | u32::from(b & 0x7F);
        pending = b & 0x80 != 0;
        if !pending {
            if arcs.is_empty() {
                let first = (value / 40).min(2);
                arcs.push(first);
                arcs.push(value - first * 40);
            } else {
                arcs.push(value);
            }
            value = 0;
        }
    }
    if pending || arcs.is_empty() {
        return Err(DecodeError::Invalid("OID"));
    }
    Ok(arcs)
}

/// One SNMPv1 message with a single variable binding.
#[derive(Debug)]
struct Message<'a> {
    version: i64,
    community: &'a [u8],
    request_id: i64,
    error_status: i64,
    error_index: i64,
    oid: Vec<u32>,
    value_tag: u8,
    value: &'a [u8],
}

/// Strict ordered walk of SEQUENCE, version, community, PDU, request-id,
/// error-status, error-index, VarBindList, VarBind, OID, value.
fn decode_message(buf: &[u8], pdu_tag: u8) -> Result<Message<'_>, DecodeError> {
    let mut r = Reader::new(buf);
    r.header(tag::SEQUENCE)?;
    let version = r.integer()?;
    let community = r.primitive(tag::OCTET_STRING)?;
    r.header(pdu_tag)?;
    let request_id = r.integer()?;
    let error_status = r.integer()?;
    let error_index = r.integer()?;
    r.header(tag::SEQUENCE)?;
    r.header(tag::SEQUENCE)?;
    let oid = decode_oid(r.primitive(tag::OID)?)?;
    let (value_tag, value) = r.any()?;

    Ok(Message {
        version,
        community,
        request_id,
        error_status,
        error_index,
        oid,
        value_tag,
        value,
    })
}

/// Decode a GetResponse whose single variable binding is a `Counter32`.
pub fn decode_get_response(buf: &[u8]) -> Result<GetResponse, DecodeError> {
    let message = decode_message(buf, tag::GET_RESPONSE)?;
    if message.version != SNMP_VERSION_1 {
        return Err(DecodeError::Invalid("version"));
    }
    if message.value_tag != tag::COUNTER32 {
        return Err(DecodeError::UnexpectedTag {
            expected: tag::COUNTER32,
            found: message.value_tag,
            offset: buf.len() - message.value.len(),
        });
    }

    Ok(GetResponse {
        community: String::from_utf8_lossy(message.community).into_owned(),
        request_id: message.request_id,
        error_status: message.error_status,
        error_index: message.error_index,
        oid: message.oid,
        value: decode_unsigned32(message.value)?,
    })
}

fn next_request_id() -> u32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed) & 0x7FFF_FFFF
}

/// Resolve an agent address, preferring IPv4.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, SnmpError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|_| SnmpError::Resolve(host.to_string()))?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| SnmpError::Resolve(host.to_string()))
}

/// Fetch one `Counter32` from an already resolved agent address.
pub fn get_counter32_from(
    agent: SocketAddr,
    community: &str,
    oid: &[u32],
    timeout: Duration,
) -> Result<u32, SnmpError> {
    let bind: SocketAddr = if agent.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(bind)?;
    socket.set_read_timeout(Some(timeout))?;

    let request_id = next_request_id();
    let request = encode_get_request(community, oid, request_id)?;
    socket.send_to(&request, agent)?;

    let mut buf = [0u8; MAX_MESSAGE_SIZE];
    let len = match socket.recv_from(&mut buf) {
        Ok((len, _)) => len,
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            return Err(SnmpError::Timeout(timeout));
        }
        Err(e) => return Err(e.into()),
    };

    let response = decode_get_response(&buf[..len])?;
    if response.request_id != i64::from(request_id) {
        return Err(SnmpError::RequestIdMismatch {
            sent: i64::from(request_id),
            received: response.request_id,
        });
    }
    if response.error_status != 0 {
        return Err(SnmpError::Agent {
            status: response.error_status,
            index: response.error_index,
        });
    }

    tracing::trace!(%agent, oid = ?oid, value = response.value, "SNMP counter read");
    Ok(response.value)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::thread;

    /// Loopback agent serving `requests` GETs. `reply` maps the requested
    /// OID to a counter value; `None` leaves the request unanswered.
    pub fn spawn_counter_agent(
        requests: usize,
        mut reply: impl FnMut(&[u32]) -> Option<u32> + Send + 'static,
    ) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; MAX_MESSAGE_SIZE];
            for _ in 0..requests {
                let (len, peer) = socket.recv_from(&mut buf).unwrap();
                let request = decode_message(&buf[..len], tag::GET_REQUEST).unwrap();
                let Some(value) = reply(request.oid.as_slice()) else {
                    continue;
                };
                let content = integer_content(value);
                let response = encode_message(
                    "public",
                    tag::GET_RESPONSE,
                    request.request_id as u32,
                    &request.oid,
                    (tag::COUNTER32, &content),
                )
                .unwrap();
                socket.send_to(&response, peer).unwrap();
            }
        });
        addr
    }
}
