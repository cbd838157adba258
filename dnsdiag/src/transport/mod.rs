//! Transport dispatch.
//!
//! One operation is exposed: [`dispatch`] maps the target's protocol tag to
//! the matching [`Transport`] implementation, bounds the whole exchange by
//! the per-probe timeout and measures latency with a single monotonic clock
//! so every transport reports it identically.
//!
//! QUIC-based transports are compile-time optional; without the `doq` /
//! `doh3` features the dispatcher reports
//! [`DiagError::UnsupportedTransport`] at runtime.

mod https;
mod tcp;
mod tls;
mod udp;

#[cfg(feature = "doh3")]
mod http3;
#[cfg(any(feature = "doq", feature = "doh3"))]
mod quic;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_proto::op::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{DiagError, Result};
use crate::hostname::AddressFamily;
use crate::proto::{Protocol, ServerTarget};
use crate::response::ResponseHandle;

/// Per-dispatch knobs shared by every transport.
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub timeout: Duration,
    pub source_ip: Option<IpAddr>,
    pub source_port: u16,
    /// IP TTL / hop limit installed on UDP probe sockets by the trace engine.
    pub socket_ttl: Option<u32>,
}

impl DispatchOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            source_ip: None,
            source_port: 0,
            socket_ttl: None,
        }
    }
}

/// One send/receive exchange over a concrete transport.
#[async_trait]
pub(crate) trait Transport: Send + Sync {
    async fn exchange(
        &self,
        wire: &[u8],
        target: &ServerTarget,
        opts: &DispatchOptions,
    ) -> Result<Vec<u8>>;
}

/// Execute one query against the target and return the parsed response.
///
/// The message is consumed because DoQ requires a zero transaction id on the
/// wire; the adjusted id is what the response is validated against.
pub async fn dispatch(
    mut message: Message,
    target: &ServerTarget,
    opts: &DispatchOptions,
) -> Result<ResponseHandle> {
    if target.protocol == Protocol::Quic {
        // RFC 9250 section 4.2.1: DoQ messages use a transaction id of 0
        message.set_id(0);
    }
    let expect_id = message.id();
    let wire = message.to_vec()?;

    let transport: Box<dyn Transport> = match target.protocol {
        Protocol::Udp => Box::new(udp::UdpTransport),
        Protocol::Tcp => Box::new(tcp::TcpTransport),
        Protocol::Tls => Box::new(tls::TlsTransport),
        Protocol::Https => Box::new(https::HttpsTransport),
        #[cfg(feature = "doq")]
        Protocol::Quic => Box::new(quic::QuicTransport),
        #[cfg(not(feature = "doq"))]
        Protocol::Quic => return Err(DiagError::UnsupportedTransport("QUIC")),
        #[cfg(feature = "doh3")]
        Protocol::Http3 => Box::new(http3::Http3Transport),
        #[cfg(not(feature = "doh3"))]
        Protocol::Http3 => return Err(DiagError::UnsupportedTransport("HTTP3")),
    };

    let started = Instant::now();
    let reply = tokio::time::timeout(opts.timeout, transport.exchange(&wire, target, opts))
        .await
        .map_err(|_| DiagError::Timeout)??;
    let elapsed = started.elapsed();

    ResponseHandle::parse(reply, elapsed, expect_id)
}

/// Local bind address for the target's family, honoring `-S`/`-P`.
pub(crate) fn bind_addr(target: &ServerTarget, opts: &DispatchOptions) -> SocketAddr {
    let ip = opts.source_ip.unwrap_or(match target.family() {
        AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    });
    SocketAddr::new(ip, opts.source_port)
}

/// Write a DNS message with the 2-byte length prefix used by TCP, DoT and DoQ.
pub(crate) async fn write_prefixed<W>(stream: &mut W, wire: &[u8]) -> Result<()>
where
    W: AsyncWriteExt + Unpin + Send,
{
    let len = u16::try_from(wire.len())
        .map_err(|_| DiagError::Proto("query exceeds 65535 bytes".to_string()))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(wire).await?;
    Ok(())
}

/// Read one length-prefixed DNS message.
pub(crate) async fn read_prefixed<R>(stream: &mut R) -> Result<Vec<u8>>
where
    R: AsyncReadExt + Unpin + Send,
{
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Shared rustls client configuration: ring provider, webpki roots,
/// optional ALPN. The provider is pinned explicitly so the configuration
/// stays unambiguous regardless of which providers other dependencies
/// compile in.
pub(crate) fn tls_client_config(alpn: &[&[u8]]) -> Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = std::sync::Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DiagError::ConnectionFailed(format!("TLS config: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_follows_family() {
        let v6 = ServerTarget::new(
            "2001:4860:4860::8888".parse().unwrap(),
            None,
            53,
            Protocol::Udp,
        );
        let opts = DispatchOptions::new(Duration::from_secs(1));
        assert!(bind_addr(&v6, &opts).is_ipv6());

        let v4 = ServerTarget::new("8.8.8.8".parse().unwrap(), None, 53, Protocol::Udp);
        let mut opts = DispatchOptions::new(Duration::from_secs(1));
        opts.source_port = 5353;
        let bound = bind_addr(&v4, &opts);
        assert!(bound.is_ipv4());
        assert_eq!(bound.port(), 5353);
    }

    #[tokio::test]
    async fn prefixed_round_trip() {
        let mut writer = std::io::Cursor::new(Vec::new());
        write_prefixed(&mut writer, b"\x12\x34payload").await.unwrap();
        let buf = writer.into_inner();
        assert_eq!(&buf[..2], &[0, 9]);

        let mut reader = std::io::Cursor::new(buf);
        let read = read_prefixed(&mut reader).await.unwrap();
        assert_eq!(read, b"\x12\x34payload");
    }
}
