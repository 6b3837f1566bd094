use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use delaycam_types::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::{cache_error, CacheStorage, CachedResponse};

/// Sidecar describing a stored body.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    status: u16,
    content_type: Option<String>,
}

/// Cache store on disk: one directory per cache, each entry a body file named
/// by the SHA-256 of its URL plus a `.meta` JSON sidecar.
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|err| cache_error(format!("cannot create {}: {err}", root.display())))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, cache: &str) -> Result<PathBuf> {
        if cache.is_empty() || cache == "." || cache == ".." || cache.contains(is_separator) {
            return Err(cache_error(format!("invalid cache name {cache:?}")));
        }
        Ok(self.root.join(cache))
    }

    fn entry_path(&self, cache: &str, url: &str) -> Result<PathBuf> {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let hash = hex::encode(hasher.finalize());
        Ok(self.cache_dir(cache)?.join(hash))
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn has(&self, cache: &str) -> Result<bool> {
        let dir = self.cache_dir(cache)?;
        Ok(fs::metadata(&dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false))
    }

    async fn open(&self, cache: &str) -> Result<()> {
        let dir = self.cache_dir(cache)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|err| cache_error(format!("cannot open cache {cache}: {err}")))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|err| cache_error(format!("cannot list caches: {err}")))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| cache_error(format!("cannot list caches: {err}")))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|kind| kind.is_dir())
                .unwrap_or(false);
            if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, cache: &str) -> Result<bool> {
        let dir = self.cache_dir(cache)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(cache_error(format!("cannot delete cache {cache}: {err}"))),
        }
    }

    async fn lookup(&self, cache: &str, url: &str) -> Result<Option<CachedResponse>> {
        let path = self.entry_path(cache, url)?;
        let meta_raw = match fs::read(path.with_extension("meta")).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(cache_error(format!("cannot read entry for {url}: {err}"))),
        };
        let meta: EntryMeta = serde_json::from_slice(&meta_raw)
            .map_err(|err| cache_error(format!("corrupt metadata for {url}: {err}")))?;
        let body = fs::read(&path)
            .await
            .map_err(|err| cache_error(format!("cannot read body for {url}: {err}")))?;
        Ok(Some(CachedResponse {
            status: meta.status,
            content_type: meta.content_type,
            body: Bytes::from(body),
        }))
    }

    async fn put(&self, cache: &str, url: &str, response: CachedResponse) -> Result<()> {
        self.open(cache).await?;
        let path = self.entry_path(cache, url)?;
        fs::write(&path, &response.body)
            .await
            .map_err(|err| cache_error(format!("cannot store body for {url}: {err}")))?;
        // The sidecar goes last: an entry without one is invisible to lookups.
        let meta = EntryMeta {
            url: url.to_string(),
            status: response.status,
            content_type: response.content_type,
        };
        let meta_raw = serde_json::to_vec(&meta)
            .map_err(|err| cache_error(format!("cannot encode metadata: {err}")))?;
        fs::write(path.with_extension("meta"), meta_raw)
            .await
            .map_err(|err| cache_error(format!("cannot store metadata for {url}: {err}")))
    }

    async fn entries(&self, cache: &str) -> Result<Vec<String>> {
        let dir = self.cache_dir(cache)?;
        let mut listing = match fs::read_dir(&dir).await {
            Ok(listing) => listing,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(cache_error(format!("cannot list cache {cache}: {err}"))),
        };
        let mut urls = Vec::new();
        while let Some(entry) = listing
            .next_entry()
            .await
            .map_err(|err| cache_error(format!("cannot list cache {cache}: {err}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("meta") {
                continue;
            }
            let raw = fs::read(&path)
                .await
                .map_err(|err| cache_error(format!("cannot read {}: {err}", path.display())))?;
            if let Ok(meta) = serde_json::from_slice::<EntryMeta>(&raw) {
                urls.push(meta.url);
            }
        }
        urls.sort();
        Ok(urls)
    }
}
