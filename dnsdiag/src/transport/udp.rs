//! Plain UDP transport.
//!
//! One unconnected datagram out, one matching datagram back. Replies from
//! the wrong source or with the wrong transaction id are discarded silently
//! and the wait continues; the dispatcher's outer timeout bounds the whole
//! exchange.

use std::net::SocketAddr;

use async_trait::async_trait;
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};

use crate::error::Result;
use crate::hostname::AddressFamily;
use crate::proto::ServerTarget;

use super::{bind_addr, DispatchOptions, Transport};

const RECV_BUFFER: usize = 4096;

pub(super) struct UdpTransport;

#[async_trait]
impl Transport for UdpTransport {
    async fn exchange(
        &self,
        wire: &[u8],
        target: &ServerTarget,
        opts: &DispatchOptions,
    ) -> Result<Vec<u8>> {
        let socket = make_socket(target, opts)?;
        let dest = SocketAddr::new(target.ip, target.port);
        socket.send_to(wire, dest).await?;

        let mut buf = vec![0u8; RECV_BUFFER];
        loop {
            let (len, src) = socket.recv_from(&mut buf).await?;
            if src.ip() != target.ip {
                log::debug!("discarding datagram from unexpected source {}", src);
                continue;
            }
            if len < 2 || buf[..2] != wire[..2] {
                log::debug!("discarding datagram with unexpected transaction id");
                continue;
            }
            return Ok(buf[..len].to_vec());
        }
    }
}

/// Build the probe socket through socket2 so the trace engine can install a
/// TTL / hop limit before the first packet leaves.
fn make_socket(target: &ServerTarget, opts: &DispatchOptions) -> Result<tokio::net::UdpSocket> {
    let family = target.family();
    let domain = match family {
        AddressFamily::Ipv4 => Domain::IPV4,
        AddressFamily::Ipv6 => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(SockProtocol::UDP))?;
    if let Some(ttl) = opts.socket_ttl {
        match family {
            AddressFamily::Ipv4 => socket.set_ttl(ttl)?,
            AddressFamily::Ipv6 => socket.set_unicast_hops_v6(ttl)?,
        }
    }
    socket.bind(&bind_addr(target, opts).into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(tokio::net::UdpSocket::from_std(std_socket)?)
}
