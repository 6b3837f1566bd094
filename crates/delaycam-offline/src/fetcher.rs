use std::time::Duration;

use async_trait::async_trait;
use delaycam_types::{DelaycamError, Result};
use reqwest::{header::CONTENT_TYPE, redirect, Client, Method};
use tracing::debug;

use crate::{CachedResponse, FetchRequest, NetworkFetcher};

/// Network fetcher over HTTP(S).
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Without a timeout a hung origin keeps the request waiting indefinitely.
    ///
    /// Redirects are returned as-is so a response is only ever cached under
    /// the URL that produced it.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().redirect(redirect::Policy::none());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| network_error(format!("failed to build http client: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NetworkFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|err| network_error(format!("invalid method {}: {err}", request.method)))?;
        let resp = self
            .client
            .request(method, request.url.clone())
            .send()
            .await
            .map_err(|err| network_error(format!("request to {} failed: {err}", request.url)))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .await
            .map_err(|err| network_error(format!("reading {} failed: {err}", request.url)))?;
        debug!(status, bytes = body.len(), "fetched {}", request.url);
        Ok(CachedResponse {
            status,
            content_type,
            body,
        })
    }
}

fn network_error(message: String) -> DelaycamError {
    DelaycamError::Network(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use url::Url;

    #[tokio::test]
    async fn unreachable_origin_is_a_network_error() {
        let fetcher = HttpFetcher::new(Some(Duration::from_secs(2))).unwrap();
        // Port 9 (discard) on loopback is closed on any sane test host.
        let request = FetchRequest::get(Url::parse("http://127.0.0.1:9/").unwrap());
        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(matches!(err, DelaycamError::Network(_)));
    }

    #[tokio::test]
    async fn redirects_are_not_followed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(
                    b"HTTP/1.1 302 Found\r\nLocation: http://elsewhere.invalid/\r\n\
                      Content-Length: 0\r\nConnection: close\r\n\r\n",
                )
                .await
                .unwrap();
        });

        let fetcher = HttpFetcher::new(Some(Duration::from_secs(5))).unwrap();
        let url = Url::parse(&format!("http://{addr}/moved")).unwrap();
        let response = fetcher.fetch(&FetchRequest::get(url)).await.unwrap();
        assert_eq!(response.status, 302);
        assert!(!response.is_ok());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn invalid_method_is_rejected() {
        let fetcher = HttpFetcher::new(None).unwrap();
        let request = FetchRequest::new(
            "BAD METHOD",
            Url::parse("http://127.0.0.1:9/").unwrap(),
            crate::RequestMode::Cors,
        );
        assert!(fetcher.fetch(&request).await.is_err());
    }
}
