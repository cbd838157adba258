//! DNS over QUIC (RFC 9250).
//!
//! One bidirectional stream per query, carrying the same two-byte length
//! framing as TCP. ALPN is `doq`; SNI handling mirrors the TLS transport.

use std::net::SocketAddr;
use std::sync::Arc;

#[cfg(feature = "doq")]
use async_trait::async_trait;

use crate::error::{DiagError, Result};
use crate::proto::ServerTarget;

#[cfg(feature = "doq")]
use super::Transport;
use super::{bind_addr, tls_client_config, DispatchOptions};

#[cfg(feature = "doq")]
pub(super) struct QuicTransport;

#[cfg(feature = "doq")]
#[async_trait]
impl Transport for QuicTransport {
    async fn exchange(
        &self,
        wire: &[u8],
        target: &ServerTarget,
        opts: &DispatchOptions,
    ) -> Result<Vec<u8>> {
        let connection = connect(target, opts, &[b"doq"]).await?;

        let (mut send, mut recv) = connection
            .open_bi()
            .await
            .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?;

        let len = u16::try_from(wire.len())
            .map_err(|_| DiagError::Proto("query exceeds 65535 bytes".to_string()))?;
        send.write_all(&len.to_be_bytes())
            .await
            .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?;
        send.write_all(wire)
            .await
            .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?;
        send.finish()
            .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?;

        let mut len_buf = [0u8; 2];
        recv.read_exact(&mut len_buf)
            .await
            .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?;
        let mut buf = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        recv.read_exact(&mut buf)
            .await
            .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?;

        connection.close(0u32.into(), b"");
        Ok(buf)
    }
}

/// Open a QUIC connection with the given ALPN set. Shared with DoH3.
pub(super) async fn connect(
    target: &ServerTarget,
    opts: &DispatchOptions,
    alpn: &[&[u8]],
) -> Result<quinn::Connection> {
    let mut endpoint = quinn::Endpoint::client(bind_addr(target, opts))?;

    let tls = tls_client_config(alpn)?;
    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(tls)
        .map_err(|e| DiagError::ConnectionFailed(format!("QUIC TLS config: {}", e)))?;
    endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(crypto)));

    let server_name = target.tls_name();
    let connecting = endpoint
        .connect(SocketAddr::new(target.ip, target.port), &server_name)
        .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?;

    connecting
        .await
        .map_err(|e| DiagError::ConnectionFailed(e.to_string()))
}
