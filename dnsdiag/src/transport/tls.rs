//! DNS over TLS (RFC 7858): TCP framing inside a TLS 1.2+ session.
//!
//! When the resolver was given as a hostname that name drives SNI and
//! certificate validation; an IP literal is validated against the
//! certificate's IP subjectAltName instead.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::error::{DiagError, Result};
use crate::proto::ServerTarget;

use super::{read_prefixed, tls_client_config, write_prefixed, DispatchOptions, Transport};

pub(super) struct TlsTransport;

#[async_trait]
impl Transport for TlsTransport {
    async fn exchange(
        &self,
        wire: &[u8],
        target: &ServerTarget,
        opts: &DispatchOptions,
    ) -> Result<Vec<u8>> {
        let tcp = super::tcp::connect(target, opts).await?;

        let config = tls_client_config(&[])?;
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = match &target.hostname {
            Some(name) => ServerName::try_from(name.clone())
                .map_err(|_| DiagError::InvalidInput(format!("invalid TLS name: {}", name)))?,
            None => ServerName::IpAddress(target.ip.into()),
        };

        let mut stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| DiagError::ConnectionFailed(format!("TLS handshake: {}", e)))?;

        write_prefixed(&mut stream, wire).await?;
        read_prefixed(&mut stream).await
    }
}
