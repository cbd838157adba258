//! DNS over HTTP/3: the RFC 8484 exchange carried on an `h3` request over
//! the same quinn endpoint as DoQ, ALPN `h3`.

use async_trait::async_trait;
use bytes::Buf;

use crate::error::{DiagError, Result};
use crate::proto::ServerTarget;

use super::https::{DOH_CONTENT_TYPE, DOH_PATH};
use super::{DispatchOptions, Transport};

pub(super) struct Http3Transport;

#[async_trait]
impl Transport for Http3Transport {
    async fn exchange(
        &self,
        wire: &[u8],
        target: &ServerTarget,
        opts: &DispatchOptions,
    ) -> Result<Vec<u8>> {
        let connection = super::quic::connect(target, opts, &[b"h3"]).await?;

        let quinn_conn = h3_quinn::Connection::new(connection);
        let (mut driver, mut send_request) = h3::client::new(quinn_conn)
            .await
            .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?;

        // the driver has to be polled for the request streams to make progress
        let drive = tokio::spawn(async move {
            let _ = std::future::poll_fn(|cx| driver.poll_close(cx)).await;
        });

        let uri: http::Uri = format!("https://{}:{}{}", target.url_host(), target.port, DOH_PATH)
            .parse()
            .map_err(|e| DiagError::InvalidInput(format!("DoH3 URL: {}", e)))?;
        let request = http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", DOH_CONTENT_TYPE)
            .header("accept", DOH_CONTENT_TYPE)
            .body(())
            .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?;

        let result = async {
            let mut stream = send_request
                .send_request(request)
                .await
                .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?;
            stream
                .send_data(bytes::Bytes::copy_from_slice(wire))
                .await
                .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?;
            stream
                .finish()
                .await
                .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?;

            let response = stream
                .recv_response()
                .await
                .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?;
            if !response.status().is_success() {
                return Err(DiagError::ConnectionFailed(format!(
                    "HTTP status {}",
                    response.status()
                )));
            }

            let mut body = Vec::new();
            while let Some(mut chunk) = stream
                .recv_data()
                .await
                .map_err(|e| DiagError::ConnectionFailed(e.to_string()))?
            {
                while chunk.has_remaining() {
                    let part = chunk.chunk();
                    body.extend_from_slice(part);
                    let advance = part.len();
                    chunk.advance(advance);
                }
            }
            Ok(body)
        }
        .await;

        drive.abort();
        result
    }
}
