//! Local HTTP front end that routes requests through the offline worker.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use delaycam_offline::{
    CacheStorage, CachedResponse, FetchOutcome, FetchRequest, NetworkFetcher, OfflineWorker,
    RequestMode, ResponseSource, WorkerConfig,
};
use delaycam_types::{DelaycamError, Result};
use http_body_util::Full;
use hyper::{
    body::Incoming,
    header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE},
    server::conn::http1,
    service::service_fn,
    HeaderMap, Method, Request, Response, StatusCode, Uri,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use url::Url;

/// Response header naming which path produced the body.
pub const SOURCE_HEADER: HeaderName = HeaderName::from_static("x-delaycam-source");

const SEC_FETCH_MODE: HeaderName = HeaderName::from_static("sec-fetch-mode");

pub struct CacheProxy<S, F>
where
    S: CacheStorage + 'static,
    F: NetworkFetcher + 'static,
{
    listener: TcpListener,
    worker: Arc<OfflineWorker<S, F>>,
}

impl<S, F> CacheProxy<S, F>
where
    S: CacheStorage + 'static,
    F: NetworkFetcher + 'static,
{
    pub async fn bind(addr: SocketAddr, worker: Arc<OfflineWorker<S, F>>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| network_error(format!("cannot bind {addr}: {err}")))?;
        Ok(Self { listener, worker })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|err| network_error(format!("listener has no address: {err}")))
    }

    pub async fn run(self) -> Result<()> {
        info!(
            "Offline cache proxy on http://{} for {}",
            self.local_addr()?,
            self.worker.config().origin
        );
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(|err| network_error(format!("accept failed: {err}")))?;
            let io = TokioIo::new(stream);
            let worker = self.worker.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let worker = worker.clone();
                    async move {
                        let (parts, _body) = req.into_parts();
                        Ok::<_, Infallible>(
                            proxy_request(&*worker, &parts.method, &parts.uri, &parts.headers)
                                .await,
                        )
                    }
                });
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("connection from {peer} ended: {err}");
                }
            });
        }
    }
}

/// Resolves the request against the worker's origin and answers it through
/// the worker, going to the network directly for pass-through requests.
/// Request bodies are not forwarded.
pub async fn proxy_request<S, F>(
    worker: &OfflineWorker<S, F>,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Response<Full<Bytes>>
where
    S: CacheStorage,
    F: NetworkFetcher,
{
    let Some(target) = origin_target(worker.config(), uri) else {
        warn!("Rejecting request for {uri} outside {}", worker.config().origin);
        return plain_response(StatusCode::BAD_REQUEST, "Bad Request");
    };
    let request = FetchRequest::new(method.as_str(), target, request_mode(headers));

    match worker.handle_fetch(&request).await {
        FetchOutcome::Respond { source, response } => {
            debug!("{} {} -> {:?}", method, request.url, source);
            into_response(response, source_label(source))
        }
        FetchOutcome::PassThrough => match worker.fetcher().fetch(&request).await {
            Ok(response) => into_response(response, "passthrough"),
            Err(err) => {
                warn!("Pass-through fetch for {} failed: {err}", request.url);
                plain_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
        },
    }
}

/// The origin with the request's path and query. Any scheme or authority in
/// the request target is ignored, so the result never leaves the origin.
fn origin_target(config: &WorkerConfig, uri: &Uri) -> Option<Url> {
    let mut target = config.origin.clone();
    target.set_path(uri.path());
    target.set_query(uri.query());
    target.set_fragment(None);
    config.is_same_origin(&target).then_some(target)
}

/// Navigation when the browser says so, or when it asks for HTML.
pub fn request_mode(headers: &HeaderMap) -> RequestMode {
    let header_str = |name: &HeaderName| headers.get(name).and_then(|v| v.to_str().ok());
    if header_str(&SEC_FETCH_MODE) == Some("navigate") {
        return RequestMode::Navigate;
    }
    if header_str(&ACCEPT).is_some_and(|accept| accept.contains("text/html")) {
        return RequestMode::Navigate;
    }
    RequestMode::NoCors
}

fn source_label(source: ResponseSource) -> &'static str {
    match source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
        ResponseSource::OfflineFallback => "offline-fallback",
        ResponseSource::Unavailable => "unavailable",
    }
}

fn into_response(cached: CachedResponse, source: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(cached.body));
    *response.status_mut() = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::BAD_GATEWAY);
    if let Some(value) = cached
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
        .headers_mut()
        .insert(SOURCE_HEADER, HeaderValue::from_static(source));
    response
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn network_error(message: impl Into<String>) -> DelaycamError {
    DelaycamError::Network(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use delaycam_offline::MemoryCacheStorage;
    use delaycam_types::config::OfflineConfig;
    use http_body_util::BodyExt;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Answers every URL with its own path and remembers what it was asked
    /// for; fails when `down` is set.
    #[derive(Default)]
    struct EchoFetcher {
        down: AtomicBool,
        requested: Mutex<Vec<Url>>,
    }

    impl EchoFetcher {
        fn requested(&self) -> Vec<Url> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NetworkFetcher for EchoFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse> {
            self.requested.lock().unwrap().push(request.url.clone());
            if self.down.load(Ordering::SeqCst) {
                return Err(network_error("unreachable"));
            }
            Ok(CachedResponse::new(
                200,
                Some("text/html".into()),
                request.url.path().to_string(),
            ))
        }
    }

    fn worker() -> OfflineWorker<MemoryCacheStorage, EchoFetcher> {
        let config = WorkerConfig::from_offline(&OfflineConfig {
            cache_prefix: "delaycam".into(),
            version: "v1".into(),
            origin: "http://127.0.0.1:8000".into(),
            assets: vec!["/".into()],
            cache_dir: "unused".into(),
        })
        .unwrap();
        OfflineWorker::new(config, MemoryCacheStorage::new(), EchoFetcher::default())
    }

    async fn read_body(response: Response<Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn navigation_detection() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_mode(&headers), RequestMode::NoCors);
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        assert_eq!(request_mode(&headers), RequestMode::Navigate);
        let mut headers = HeaderMap::new();
        headers.insert(SEC_FETCH_MODE, HeaderValue::from_static("navigate"));
        assert_eq!(request_mode(&headers), RequestMode::Navigate);
    }

    #[tokio::test]
    async fn active_worker_answers_from_cache() {
        let worker = worker();
        worker.install().await.unwrap();
        worker.activate().await.unwrap();

        let uri: Uri = "/".parse().unwrap();
        let response = proxy_request(&worker, &Method::GET, &uri, &HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[&SOURCE_HEADER], "cache");
        assert_eq!(read_body(response).await, Bytes::from_static(b"/"));
    }

    #[tokio::test]
    async fn offline_navigation_falls_back_to_root() {
        let worker = worker();
        worker.install().await.unwrap();
        worker.activate().await.unwrap();
        worker.fetcher().down.store(true, Ordering::SeqCst);

        let uri: Uri = "/review?t=3".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(SEC_FETCH_MODE, HeaderValue::from_static("navigate"));
        let response = proxy_request(&worker, &Method::GET, &uri, &headers).await;
        assert_eq!(response.headers()[&SOURCE_HEADER], "offline-fallback");

        let uri: Uri = "/style.css".parse().unwrap();
        let response = proxy_request(&worker, &Method::GET, &uri, &HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn inactive_worker_passes_through() {
        let worker = worker();
        let uri: Uri = "/index.html".parse().unwrap();
        let response = proxy_request(&worker, &Method::GET, &uri, &HeaderMap::new()).await;
        assert_eq!(response.headers()[&SOURCE_HEADER], "passthrough");

        worker.fetcher().down.store(true, Ordering::SeqCst);
        let response = proxy_request(&worker, &Method::GET, &uri, &HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn request_targets_stay_on_origin() {
        let worker = worker();
        for target in [
            "//evil.example.com/steal",
            "http://evil.example.com/steal?x=1",
            "/a/../../b?q=1",
        ] {
            let uri: Uri = target.parse().unwrap();
            let response = proxy_request(&worker, &Method::GET, &uri, &HeaderMap::new()).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let requested = worker.fetcher().requested();
        assert_eq!(requested.len(), 3);
        for url in &requested {
            assert_eq!(url.host_str(), Some("127.0.0.1"));
            assert_eq!(url.port(), Some(8000));
        }
        assert_eq!(requested[0].path(), "//evil.example.com/steal");
        assert_eq!(requested[1].as_str(), "http://127.0.0.1:8000/steal?x=1");
        assert_eq!(requested[2].query(), Some("q=1"));
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let worker = Arc::new(worker());
        worker.install().await.unwrap();
        worker.activate().await.unwrap();

        let proxy = CacheProxy::bind("127.0.0.1:0".parse().unwrap(), worker)
            .await
            .unwrap();
        let addr = proxy.local_addr().unwrap();
        let server = tokio::spawn(proxy.run());

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 200 OK"));
        assert!(raw.contains("x-delaycam-source: cache"));

        server.abort();
    }
}
