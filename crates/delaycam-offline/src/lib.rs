//! Offline asset cache: a cache-first fetch handler over versioned named caches.

mod disk;
mod fetcher;
mod memory;
mod worker;

pub use disk::DiskCacheStorage;
pub use fetcher::HttpFetcher;
pub use memory::MemoryCacheStorage;
pub use worker::{
    ControlMessage, FetchOutcome, MessageReply, OfflineWorker, ResponseSource, WorkerConfig,
    WorkerState, WorkerStatus,
};

use async_trait::async_trait;
use bytes::Bytes;
use delaycam_types::{DelaycamError, Result};
use url::Url;

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Top-level page load.
    Navigate,
    SameOrigin,
    Cors,
    NoCors,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: String,
    pub url: Url,
    pub mode: RequestMode,
}

impl FetchRequest {
    pub fn new(method: impl Into<String>, url: Url, mode: RequestMode) -> Self {
        Self {
            method: method.into(),
            url,
            mode,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new("GET", url, RequestMode::NoCors)
    }

    pub fn navigate(url: Url) -> Self {
        Self::new("GET", url, RequestMode::Navigate)
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// A response as stored in, or served from, a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: u16, content_type: Option<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Synthetic reply used when neither cache nor network can answer.
    pub fn service_unavailable() -> Self {
        Self::new(
            503,
            Some("text/plain; charset=utf-8".into()),
            Bytes::from_static(b"Service Unavailable"),
        )
    }
}

/// Named caches of URL → response, in the manner of a browser cache store.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn has(&self, cache: &str) -> Result<bool>;
    /// Create the cache if it does not exist yet.
    async fn open(&self, cache: &str) -> Result<()>;
    /// Names of every existing cache.
    async fn keys(&self) -> Result<Vec<String>>;
    /// Returns whether the cache existed.
    async fn delete(&self, cache: &str) -> Result<bool>;
    async fn lookup(&self, cache: &str, url: &str) -> Result<Option<CachedResponse>>;
    /// Store a response, creating the cache on demand.
    async fn put(&self, cache: &str, url: &str, response: CachedResponse) -> Result<()>;
    /// URLs stored in a cache.
    async fn entries(&self, cache: &str) -> Result<Vec<String>>;
}

/// Network access. HTTP error statuses are successful fetches; `Err` means
/// no response arrived at all.
#[async_trait]
pub trait NetworkFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse>;
}

/// Key under which a request URL is stored: the URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_fragment(None);
    key.into()
}

pub fn cache_error(message: impl Into<String>) -> DelaycamError {
    DelaycamError::Cache(message.into())
}

pub fn worker_error(message: impl Into<String>) -> DelaycamError {
    DelaycamError::Worker(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_drops_fragment() {
        let url = Url::parse("http://localhost:8000/index.html?v=2#top").unwrap();
        assert_eq!(cache_key(&url), "http://localhost:8000/index.html?v=2");
    }

    #[test]
    fn method_check_is_case_insensitive() {
        let url = Url::parse("http://localhost/").unwrap();
        assert!(FetchRequest::new("get", url.clone(), RequestMode::Cors).is_get());
        assert!(!FetchRequest::new("POST", url.clone(), RequestMode::Cors).is_get());
        assert!(FetchRequest::navigate(url).is_navigation());
    }

    #[test]
    fn unavailable_reply_is_503() {
        let reply = CachedResponse::service_unavailable();
        assert_eq!(reply.status, 503);
        assert!(!reply.is_ok());
    }
}
