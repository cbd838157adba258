//! TCP transport with RFC 1035 two-byte length framing.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpSocket, TcpStream};

use crate::error::{DiagError, Result};
use crate::hostname::AddressFamily;
use crate::proto::ServerTarget;

use super::{bind_addr, read_prefixed, write_prefixed, DispatchOptions, Transport};

pub(super) struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn exchange(
        &self,
        wire: &[u8],
        target: &ServerTarget,
        opts: &DispatchOptions,
    ) -> Result<Vec<u8>> {
        let mut stream = connect(target, opts).await?;
        write_prefixed(&mut stream, wire).await?;
        read_prefixed(&mut stream).await
    }
}

/// Connect to the target, binding the requested source address first.
/// Connection refusal and resets are handshake failures, not losses.
pub(super) async fn connect(
    target: &ServerTarget,
    opts: &DispatchOptions,
) -> Result<TcpStream> {
    let socket = match target.family() {
        AddressFamily::Ipv4 => TcpSocket::new_v4()?,
        AddressFamily::Ipv6 => TcpSocket::new_v6()?,
    };
    if opts.source_ip.is_some() || opts.source_port != 0 {
        socket.bind(bind_addr(target, opts))?;
    }

    socket
        .connect(SocketAddr::new(target.ip, target.port))
        .await
        .map_err(|e| match DiagError::from(e) {
            DiagError::Timeout => DiagError::Timeout,
            DiagError::TransientNetwork(msg) => DiagError::TransientNetwork(msg),
            other => DiagError::ConnectionFailed(other.to_string()),
        })
}
