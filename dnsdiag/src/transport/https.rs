//! DNS over HTTPS (RFC 8484): HTTP/2 POST of `application/dns-message` to
//! `/dns-query`.
//!
//! When the resolver was given as a hostname the URL carries that name (so
//! SNI and the Host header match the certificate) and the connection is
//! pinned to the already-resolved address; an IP literal goes straight into
//! the URL.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::{DiagError, Result};
use crate::proto::ServerTarget;

use super::{DispatchOptions, Transport};

pub(crate) const DOH_CONTENT_TYPE: &str = "application/dns-message";
pub(crate) const DOH_PATH: &str = "/dns-query";

pub(super) struct HttpsTransport;

#[async_trait]
impl Transport for HttpsTransport {
    async fn exchange(
        &self,
        wire: &[u8],
        target: &ServerTarget,
        opts: &DispatchOptions,
    ) -> Result<Vec<u8>> {
        let url = format!("https://{}:{}{}", target.url_host(), target.port, DOH_PATH);

        let mut builder = reqwest::Client::builder()
            .timeout(opts.timeout)
            .https_only(true);
        if let Some(name) = &target.hostname {
            builder = builder.resolve(name, SocketAddr::new(target.ip, target.port));
        }
        if let Some(src) = opts.source_ip {
            builder = builder.local_address(src);
        }
        let client = builder.build()?;

        let response = client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, DOH_CONTENT_TYPE)
            .header(reqwest::header::ACCEPT, DOH_CONTENT_TYPE)
            .body(wire.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DiagError::ConnectionFailed(format!(
                "HTTP status {}",
                response.status()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}
