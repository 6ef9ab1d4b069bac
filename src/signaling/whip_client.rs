//! HTTP(S) transport for WHIP signaling.
//!
//! hyper client with webpki roots, shared by the offer POST and the
//! teardown DELETE.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use log::debug;

use super::{HttpResponse, SignalingTransport, TransportError};

/// hyper based [`SignalingTransport`]
pub struct HttpTransport {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpTransport {
    pub fn new() -> Self {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();

        let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build(https);

        Self { client }
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();

        let body_bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?
            .to_bytes();

        let body = String::from_utf8_lossy(&body_bytes).to_string();
        debug!("HTTP {} ({} body bytes)", status, body.len());

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalingTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: &str,
    ) -> Result<HttpResponse, TransportError> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header("Content-Type", content_type)
            .body(Full::new(Bytes::from(body.to_string())))
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        self.send(request).await
    }

    async fn delete(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(url)
            .body(Full::new(Bytes::new()))
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        self.send(request).await
    }
}
