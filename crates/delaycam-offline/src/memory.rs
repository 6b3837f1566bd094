use std::collections::BTreeMap;

use async_trait::async_trait;
use delaycam_types::Result;
use tokio::sync::RwLock;

use crate::{CacheStorage, CachedResponse};

type Entries = BTreeMap<String, CachedResponse>;

/// In-process cache store; contents vanish with the process.
#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<BTreeMap<String, Entries>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn has(&self, cache: &str) -> Result<bool> {
        Ok(self.caches.read().await.contains_key(cache))
    }

    async fn open(&self, cache: &str) -> Result<()> {
        self.caches
            .write()
            .await
            .entry(cache.to_string())
            .or_default();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn delete(&self, cache: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(cache).is_some())
    }

    async fn lookup(&self, cache: &str, url: &str) -> Result<Option<CachedResponse>> {
        Ok(self
            .caches
            .read()
            .await
            .get(cache)
            .and_then(|entries| entries.get(url).cloned()))
    }

    async fn put(&self, cache: &str, url: &str, response: CachedResponse) -> Result<()> {
        self.caches
            .write()
            .await
            .entry(cache.to_string())
            .or_default()
            .insert(url.to_string(), response);
        Ok(())
    }

    async fn entries(&self, cache: &str) -> Result<Vec<String>> {
        Ok(self
            .caches
            .read()
            .await
            .get(cache)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_opens_cache_on_demand() {
        let storage = MemoryCacheStorage::new();
        assert!(!storage.has("app-v1").await.unwrap());
        storage
            .put("app-v1", "http://x/", CachedResponse::new(200, None, "hi"))
            .await
            .unwrap();
        assert!(storage.has("app-v1").await.unwrap());
        let hit = storage.lookup("app-v1", "http://x/").await.unwrap();
        assert_eq!(hit.map(|r| r.body), Some("hi".into()));
        assert_eq!(storage.entries("app-v1").await.unwrap(), vec!["http://x/"]);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let storage = MemoryCacheStorage::new();
        storage.open("a").await.unwrap();
        storage.open("b").await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["a", "b"]);
        assert!(storage.delete("a").await.unwrap());
        assert!(!storage.delete("a").await.unwrap());
        assert!(storage.lookup("a", "http://x/").await.unwrap().is_none());
    }
}
