//! Raw ICMP socket wrapper
//!
//! The socket is non-blocking and polled from the async runtime, yielding
//! between attempts so that many probes can wait on their own sockets at once.

use super::packet::{build_echo_request_v4, build_echo_request_v6, parse_reply_v4, parse_reply_v6};
use super::{IcmpReply, IpVersion};
use crate::error::ProbeError;
use crate::probe::EchoIds;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::trace;

/// Receive buffer size, large enough for any ICMP message we care about
const RECV_BUFFER_SIZE: usize = 1500;

/// A datagram read from a raw ICMP socket
#[derive(Debug, Clone)]
pub struct Received {
    /// Source address of the datagram
    pub peer: Option<IpAddr>,
    /// Parsed message, `None` when parsing failed
    pub reply: Option<IcmpReply>,
    /// When the datagram was read
    pub at: Instant,
}

/// A raw ICMP socket bound to one IP version
pub struct RawIcmpSocket {
    socket: Socket,
    version: IpVersion,
    poll_interval: Duration,
}

impl RawIcmpSocket {
    /// Open a non-blocking raw ICMP socket
    pub fn open(version: IpVersion, poll_interval: Duration) -> Result<Self, ProbeError> {
        let (domain, protocol) = match version {
            IpVersion::V4 => (Domain::IPV4, Protocol::ICMPV4),
            IpVersion::V6 => (Domain::IPV6, Protocol::ICMPV6),
        };

        let socket =
            Socket::new(domain, Type::RAW, Some(protocol)).map_err(ProbeError::from_socket_open)?;
        socket
            .set_nonblocking(true)
            .map_err(|e| ProbeError::SocketError(e.to_string()))?;

        trace!(version = version.description(), "opened raw socket");

        Ok(Self {
            socket,
            version,
            poll_interval,
        })
    }

    /// IP version this socket was opened for
    pub fn version(&self) -> IpVersion {
        self.version
    }

    /// Set the TTL (IPv4) or unicast hop limit (IPv6) of outgoing datagrams
    pub fn set_ttl(&self, ttl: u8) -> Result<(), ProbeError> {
        let result = match self.version {
            IpVersion::V4 => self.socket.set_ttl_v4(u32::from(ttl)),
            IpVersion::V6 => self.socket.set_unicast_hops_v6(u32::from(ttl)),
        };
        result.map_err(|e| ProbeError::SocketError(e.to_string()))
    }

    /// Send an echo request and return the send timestamp
    pub fn send_echo(&self, dest: IpAddr, ids: EchoIds) -> Result<Instant, ProbeError> {
        let packet = match (self.version, dest) {
            (IpVersion::V4, IpAddr::V4(_)) => build_echo_request_v4(ids)?,
            (IpVersion::V6, IpAddr::V6(_)) => build_echo_request_v6(ids),
            _ => {
                return Err(ProbeError::SendError(format!(
                    "{dest} does not match {} socket",
                    self.version.description()
                )))
            }
        };

        let target: SockAddr = SocketAddr::new(dest, 0).into();
        let sent_at = Instant::now();
        self.socket
            .send_to(&packet, &target)
            .map_err(|e| ProbeError::SendError(e.to_string()))?;

        trace!(%dest, id = ids.identifier, seq = ids.sequence, "sent echo request");
        Ok(sent_at)
    }

    /// Wait for the next datagram until `deadline`
    ///
    /// Returns `Ok(None)` once the deadline has passed, even while datagrams
    /// keep arriving.
    pub async fn recv_until(&self, deadline: Instant) -> Result<Option<Received>, ProbeError> {
        let mut buf = [MaybeUninit::<u8>::uninit(); RECV_BUFFER_SIZE];

        let read = poll_until(deadline, self.poll_interval, || {
            self.socket
                .recv_from(&mut buf)
                .map(|(size, addr)| (size, addr, Instant::now()))
        })
        .await
        .map_err(|e| ProbeError::ReceiveError(e.to_string()))?;
        let Some((size, addr, at)) = read else {
            return Ok(None);
        };

        let initialized: &[MaybeUninit<u8>] = &buf[..size];
        // recv_from initialized the first `size` bytes
        let data = unsafe { &*(initialized as *const [MaybeUninit<u8>] as *const [u8]) };

        let reply = match self.version {
            IpVersion::V4 => parse_reply_v4(data),
            IpVersion::V6 => parse_reply_v6(data),
        };
        Ok(Some(Received {
            peer: addr.as_socket().map(|s| s.ip()),
            reply,
            at,
        }))
    }
}

/// Retry a non-blocking `attempt` every `poll_interval` until it yields or
/// `deadline` passes
///
/// The deadline is checked before every attempt.
async fn poll_until<T>(
    deadline: Instant,
    poll_interval: Duration,
    mut attempt: impl FnMut() -> io::Result<T>,
) -> io::Result<Option<T>> {
    loop {
        if Instant::now() >= deadline {
            return Ok(None);
        }
        match attempt() {
            Ok(value) => return Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(poll_interval.min(remaining)).await;
    }
}
