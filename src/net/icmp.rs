//! ICMP / ICMPv6 echo over raw sockets.
//!
//! Raw sockets need `CAP_NET_RAW` (or root). A [`Pinger`] resolves its host
//! once, keeps one non-blocking socket open and sends one echo per call to
//! [`Pinger::ping`], waiting up to the configured timeout for the matching
//! reply.

use std::io;
use std::mem;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const ICMPV6_NEXT_HEADER: u8 = 58;

const HEADER_LEN: usize = 8;
const PAYLOAD_LEN: usize = 56;
const RECV_BUFFER_SIZE: usize = 4096;

static NEXT_SESSION: AtomicU16 = AtomicU16::new(0);

#[derive(Debug, Error)]
pub enum PingError {
    #[error("cannot resolve {0}")]
    Resolve(String),
    #[error("cannot open raw socket: {0}")]
    Socket(#[source] io::Error),
    #[error("send failed: {0}")]
    Send(#[source] io::Error),
    #[error("receive failed: {0}")]
    Recv(#[source] io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("reply checksum mismatch")]
    Checksum,
}

/// RFC 1071 Internet checksum: one's complement of the one's complement sum
/// of big-endian 16-bit words, an odd trailing byte padded with zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Checksum of an ICMPv6 message including the IPv6 pseudo-header.
fn checksum_v6(src: &Ipv6Addr, dst: &Ipv6Addr, message: &[u8]) -> u16 {
    let mut buf = Vec::with_capacity(40 + message.len());
    buf.extend_from_slice(&src.octets());
    buf.extend_from_slice(&dst.octets());
    buf.extend_from_slice(&(message.len() as u32).to_be_bytes());
    buf.extend_from_slice(&[0, 0, 0, ICMPV6_NEXT_HEADER]);
    buf.extend_from_slice(message);
    checksum(&buf)
}

/// Source and destination used for the ICMPv6 pseudo-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V6Route {
    pub local: Ipv6Addr,
    pub remote: Ipv6Addr,
}

/// Build an echo request. `v6` selects ICMPv6 and supplies the addresses for
/// its checksum.
pub fn build_echo_request(id: u16, seq: u16, v6: Option<&V6Route>) -> Vec<u8> {
    let kind = if v6.is_some() { ICMPV6_ECHO_REQUEST } else { ICMP_ECHO_REQUEST };
    let mut packet = Vec::with_capacity(HEADER_LEN + PAYLOAD_LEN);
    packet.extend_from_slice(&[kind, 0, 0, 0]);
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend((0..PAYLOAD_LEN).map(|i| i as u8));

    let sum = match v6 {
        Some(route) => checksum_v6(&route.local, &route.remote, &packet),
        None => checksum(&packet),
    };
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Echo reply for this session and sequence with a valid checksum
    Matched,
    /// Anything else arriving on the raw socket
    Unrelated,
    /// Matching reply whose checksum does not verify
    Corrupt,
}

/// Classify one datagram read from the raw socket. IPv4 datagrams still
/// carry their IP header; IPv6 ones start at the ICMPv6 header.
pub fn parse_echo_reply(datagram: &[u8], id: u16, seq: u16, v6: Option<&V6Route>) -> Reply {
    let offset = match v6 {
        Some(_) => 0,
        None => match datagram.first() {
            Some(b) => usize::from(b & 0x0F) * 4,
            None => return Reply::Unrelated,
        },
    };
    let Some(message) = datagram.get(offset..).filter(|m| m.len() >= HEADER_LEN) else {
        return Reply::Unrelated;
    };

    let expected_kind = if v6.is_some() { ICMPV6_ECHO_REPLY } else { ICMP_ECHO_REPLY };
    let reply_id = u16::from_be_bytes([message[4], message[5]]);
    let reply_seq = u16::from_be_bytes([message[6], message[7]]);
    if message[0] != expected_kind || reply_id != id || reply_seq != seq {
        return Reply::Unrelated;
    }

    // A checksum over data that already contains its checksum folds to zero.
    let folded = match v6 {
        Some(route) => checksum_v6(&route.remote, &route.local, message),
        None => checksum(message),
    };
    if folded == 0 {
        Reply::Matched
    } else {
        Reply::Corrupt
    }
}

fn resolve(host: &str) -> Result<SocketAddr, PingError> {
    let addrs: Vec<SocketAddr> = (host, 0)
        .to_socket_addrs()
        .map_err(|_| PingError::Resolve(host.to_string()))?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| PingError::Resolve(host.to_string()))
}

/// Local address the kernel would use to reach `remote`.
fn local_v6_for(remote: Ipv6Addr) -> io::Result<Ipv6Addr> {
    let probe = UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?;
    probe.connect((remote, 9))?;
    match probe.local_addr()?.ip() {
        IpAddr::V6(local) => Ok(local),
        IpAddr::V4(v4) => Ok(v4.to_ipv6_mapped()),
    }
}

fn open_raw_socket(v6: bool) -> io::Result<OwnedFd> {
    let (domain, protocol) = if v6 {
        (libc::AF_INET6, libc::IPPROTO_ICMPV6)
    } else {
        (libc::AF_INET, libc::IPPROTO_ICMP)
    };
    // SAFETY: plain syscalls; the descriptor is owned by `OwnedFd` as soon as
    // it is known to be valid.
    unsafe {
        let fd = libc::socket(domain, libc::SOCK_RAW, protocol);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = OwnedFd::from_raw_fd(fd);
        let flags = libc::fcntl(fd.as_raw_fd(), libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(fd)
    }
}

fn to_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // SAFETY: all-zero is a valid bit pattern for these plain C structs.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            // SAFETY: sockaddr_storage is large enough and suitably aligned.
            unsafe { std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin) };
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            sin6.sin6_scope_id = v6.scope_id();
            unsafe { std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6) };
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

/// Wait until `fd` is readable or `timeout` elapses. Returns false on timeout.
fn wait_readable(fd: &OwnedFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    // SAFETY: one valid pollfd for the duration of the call.
    let ready = unsafe { libc::poll(&mut pfd, 1, millis) };
    match ready {
        n if n < 0 => {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                Ok(true)
            } else {
                Err(err)
            }
        }
        0 => Ok(false),
        _ => Ok(true),
    }
}

/// One echo session towards a single host.
pub struct Pinger {
    target: SocketAddr,
    route: Option<V6Route>,
    socket: OwnedFd,
    id: u16,
    seq: u16,
    timeout: Duration,
}

impl Pinger {
    /// Resolve `host` (IPv4 preferred) and open the raw socket.
    pub fn new(host: &str, timeout: Duration) -> Result<Self, PingError> {
        let target = resolve(host)?;
        let route = match target.ip() {
            IpAddr::V6(remote) => Some(V6Route {
                local: local_v6_for(remote).map_err(PingError::Socket)?,
                remote,
            }),
            IpAddr::V4(_) => None,
        };
        let socket = open_raw_socket(route.is_some()).map_err(PingError::Socket)?;
        let id = (std::process::id() as u16).wrapping_add(NEXT_SESSION.fetch_add(1, Ordering::Relaxed).wrapping_add(1));

        tracing::debug!(host, %target, id, "ping session opened");
        Ok(Self {
            target,
            route,
            socket,
            id,
            seq: 0,
            timeout,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send one echo request and return the round trip time in milliseconds.
    pub fn ping(&mut self) -> Result<f64, PingError> {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);

        let request = build_echo_request(self.id, seq, self.route.as_ref());
        let (addr, addr_len) = to_sockaddr(&self.target);

        let start = Instant::now();
        // SAFETY: buffer and address stay alive for the call.
        let sent = unsafe {
            libc::sendto(
                self.socket.as_raw_fd(),
                request.as_ptr() as *const libc::c_void,
                request.len(),
                0,
                &addr as *const _ as *const libc::sockaddr,
                addr_len,
            )
        };
        if sent < 0 {
            return Err(PingError::Send(io::Error::last_os_error()));
        }

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(PingError::Timeout(self.timeout));
            }
            if !wait_readable(&self.socket, self.timeout - elapsed).map_err(PingError::Recv)? {
                return Err(PingError::Timeout(self.timeout));
            }

            // SAFETY: `buf` is writable for its full length.
            let received = unsafe {
                libc::recv(
                    self.socket.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if received < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => continue,
                    _ => return Err(PingError::Recv(err)),
                }
            }

            let rtt = start.elapsed();
            match parse_echo_reply(&buf[..received as usize], self.id, seq, self.route.as_ref()) {
                Reply::Matched => return Ok(rtt.as_secs_f64() * 1000.0),
                Reply::Corrupt => return Err(PingError::Checksum),
                Reply::Unrelated => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_reply(mut request: Vec<u8>, v6: Option<&V6Route>) -> Vec<u8> {
        request[0] = if v6.is_some() { ICMPV6_ECHO_REPLY } else { ICMP_ECHO_REPLY };
        request[2] = 0;
        request[3] = 0;
        let sum = match v6 {
            Some(route) => checksum_v6(&route.remote, &route.local, &request),
            None => checksum(&request),
        };
        request[2..4].copy_from_slice(&sum.to_be_bytes());
        request
    }

    fn with_ipv4_header(message: &[u8]) -> Vec<u8> {
        let mut datagram = vec![0x45, 0, 0, 0, 0, 0, 0, 0, 64, 1, 0, 0, 127, 0, 0, 1, 127, 0, 0, 1];
        datagram.extend_from_slice(message);
        datagram
    }

    #[test]
    fn rfc1071_example() {
        assert_eq!(checksum(&[0x00, 0x01, 0xF2, 0x03, 0xF4, 0xF5, 0xF6, 0xF7]), 0x220D);
        assert_eq!(checksum(&[]), 0xFFFF);
        // odd length pads the last byte on the right
        assert_eq!(checksum(&[0x01]), !0x0100);
    }

    #[test]
    fn request_layout_and_checksum() {
        let packet = build_echo_request(0x1234, 7, None);
        assert_eq!(packet.len(), HEADER_LEN + PAYLOAD_LEN);
        assert_eq!(packet[0], ICMP_ECHO_REQUEST);
        assert_eq!(&packet[4..8], &[0x12, 0x34, 0x00, 0x07]);
        assert_eq!(checksum(&packet), 0);
    }

    #[test]
    fn v4_reply_is_matched_through_ip_header() {
        let reply = as_reply(build_echo_request(42, 3, None), None);
        let datagram = with_ipv4_header(&reply);
        assert_eq!(parse_echo_reply(&datagram, 42, 3, None), Reply::Matched);
        assert_eq!(parse_echo_reply(&datagram, 43, 3, None), Reply::Unrelated);
        assert_eq!(parse_echo_reply(&datagram, 42, 4, None), Reply::Unrelated);
    }

    #[test]
    fn own_request_is_not_a_reply() {
        let datagram = with_ipv4_header(&build_echo_request(42, 3, None));
        assert_eq!(parse_echo_reply(&datagram, 42, 3, None), Reply::Unrelated);
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let mut datagram = with_ipv4_header(&as_reply(build_echo_request(9, 1, None), None));
        let last = datagram.len() - 1;
        datagram[last] ^= 0xFF;
        assert_eq!(parse_echo_reply(&datagram, 9, 1, None), Reply::Corrupt);
    }

    #[test]
    fn v6_checksum_covers_pseudo_header() {
        let route = V6Route {
            local: "fe80::1".parse().unwrap(),
            remote: "2001:db8::2".parse().unwrap(),
        };
        let request = build_echo_request(5, 6, Some(&route));
        assert_eq!(request[0], ICMPV6_ECHO_REQUEST);
        assert_eq!(checksum_v6(&route.local, &route.remote, &request), 0);

        let reply = as_reply(request, Some(&route));
        assert_eq!(parse_echo_reply(&reply, 5, 6, Some(&route)), Reply::Matched);

        let swapped = V6Route {
            local: "fe80::9".parse().unwrap(),
            ..route
        };
        assert_eq!(parse_echo_reply(&reply, 5, 6, Some(&swapped)), Reply::Corrupt);
    }

    #[test]
    fn short_datagrams_are_ignored() {
        assert_eq!(parse_echo_reply(&[], 1, 1, None), Reply::Unrelated);
        assert_eq!(parse_echo_reply(&[0x45, 0, 0], 1, 1, None), Reply::Unrelated);
    }
}
