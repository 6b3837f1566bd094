use std::{fmt, str::FromStr};

use delaycam_types::{config::OfflineConfig, DelaycamError, Result};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    cache_key, worker_error, CacheStorage, CachedResponse, FetchRequest, NetworkFetcher,
};

/// Lifecycle of the offline worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    /// Installed and waiting to take over.
    Installed,
    Activating,
    Active,
    /// Install failed; this worker will never serve.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(label)
    }
}

/// Control messages posted to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    SkipWaiting,
    ClearCache,
}

impl FromStr for ControlMessage {
    type Err = DelaycamError;

    fn from_str(token: &str) -> Result<Self> {
        match token.trim() {
            "SKIP_WAITING" => Ok(ControlMessage::SkipWaiting),
            "CLEAR_CACHE" => Ok(ControlMessage::ClearCache),
            other => Err(worker_error(format!("unknown control message {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageReply {
    /// The waiting worker took over; stale caches that were removed.
    Activated { deleted: Vec<String> },
    /// Activation will follow as soon as install completes.
    ActivationQueued,
    AlreadyActive,
    CacheCleared { existed: bool },
}

/// Where a handled response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    /// Cached root document served for a failed navigation.
    OfflineFallback,
    /// Synthetic 503.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not intercepted; the caller goes to the network itself.
    PassThrough,
    Respond {
        source: ResponseSource,
        response: CachedResponse,
    },
}

impl FetchOutcome {
    fn respond(source: ResponseSource, response: CachedResponse) -> Self {
        FetchOutcome::Respond { source, response }
    }
}

/// Resolved worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub cache_prefix: String,
    pub cache_name: String,
    pub origin: Url,
    pub assets: Vec<Url>,
}

impl WorkerConfig {
    pub fn from_offline(config: &OfflineConfig) -> Result<Self> {
        let origin = config.origin_url()?;
        let assets = config
            .assets
            .iter()
            .map(|path| {
                origin.join(path).map_err(|err| {
                    DelaycamError::Configuration(format!("invalid asset path {path}: {err}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            cache_prefix: config.cache_prefix.clone(),
            cache_name: config.cache_name(),
            origin,
            assets,
        })
    }

    /// URL of the document served to navigations while offline.
    pub fn root_document(&self) -> Url {
        let mut root = self.origin.clone();
        root.set_path("/");
        root.set_query(None);
        root.set_fragment(None);
        root
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Caches named `<prefix>-<version>` for a version other than the current one.
    pub fn is_stale_cache(&self, name: &str) -> bool {
        name.strip_prefix(self.cache_prefix.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
            && name != self.cache_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub cache_name: String,
    pub caches: Vec<String>,
    pub entries: Vec<String>,
}

#[derive(Debug)]
struct Lifecycle {
    state: WorkerState,
    skip_waiting: bool,
}

/// Cache-first fetch handler with an install/activate lifecycle.
pub struct OfflineWorker<S, F>
where
    S: CacheStorage,
    F: NetworkFetcher,
{
    config: WorkerConfig,
    storage: S,
    fetcher: F,
    lifecycle: RwLock<Lifecycle>,
}

impl<S, F> OfflineWorker<S, F>
where
    S: CacheStorage,
    F: NetworkFetcher,
{
    pub fn new(config: WorkerConfig, storage: S, fetcher: F) -> Self {
        Self {
            config,
            storage,
            fetcher,
            lifecycle: RwLock::new(Lifecycle {
                state: WorkerState::Parsed,
                skip_waiting: false,
            }),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.read().await.state
    }

    /// Picks up a cache left by an earlier run: a fresh worker whose current
    /// cache already exists starts out installed and waiting.
    pub async fn restore(&self) -> Result<WorkerState> {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.state == WorkerState::Parsed
            && self.storage.has(&self.config.cache_name).await?
        {
            lifecycle.state = WorkerState::Installed;
            info!("Restored installed cache {}", self.config.cache_name);
        }
        Ok(lifecycle.state)
    }

    /// Pre-caches every asset. All or nothing: one failed asset fails the
    /// install, nothing is written and the worker becomes redundant.
    /// Returns the number of assets cached.
    pub async fn install(&self) -> Result<usize> {
        self.transition(WorkerState::Parsed, WorkerState::Installing)
            .await?;
        info!(
            "Installing {} with {} assets",
            self.config.cache_name,
            self.config.assets.len()
        );

        match self.populate().await {
            Ok(count) => {
                let skip_waiting = {
                    let mut lifecycle = self.lifecycle.write().await;
                    lifecycle.state = WorkerState::Installed;
                    lifecycle.skip_waiting
                };
                info!("Installed {} ({} assets)", self.config.cache_name, count);
                if skip_waiting {
                    if let Err(err) = self.activate().await {
                        warn!(
                            "Queued activation of {} failed, staying installed: {err}",
                            self.config.cache_name
                        );
                    }
                }
                Ok(count)
            }
            Err(err) => {
                error!("Install of {} failed: {err}", self.config.cache_name);
                self.lifecycle.write().await.state = WorkerState::Redundant;
                Err(err)
            }
        }
    }

    async fn populate(&self) -> Result<usize> {
        let mut fetched = Vec::with_capacity(self.config.assets.len());
        for asset in &self.config.assets {
            let response = self.fetcher.fetch(&FetchRequest::get(asset.clone())).await?;
            if !response.is_ok() {
                return Err(worker_error(format!(
                    "asset {asset} answered with status {}",
                    response.status
                )));
            }
            fetched.push((cache_key(asset), response));
        }

        self.storage.open(&self.config.cache_name).await?;
        let count = fetched.len();
        for (key, response) in fetched {
            if let Err(err) = self.storage.put(&self.config.cache_name, &key, response).await {
                if let Err(cleanup) = self.storage.delete(&self.config.cache_name).await {
                    warn!("Could not discard partial cache: {cleanup}");
                }
                return Err(err);
            }
        }
        Ok(count)
    }

    /// Deletes every stale cache of this app and starts serving. Returns the
    /// names of the deleted caches.
    pub async fn activate(&self) -> Result<Vec<String>> {
        self.transition(WorkerState::Installed, WorkerState::Activating)
            .await?;

        match self.purge_stale().await {
            Ok(deleted) => {
                let mut lifecycle = self.lifecycle.write().await;
                lifecycle.state = WorkerState::Active;
                lifecycle.skip_waiting = false;
                info!(
                    "Activated {}; removed {} stale cache(s)",
                    self.config.cache_name,
                    deleted.len()
                );
                Ok(deleted)
            }
            Err(err) => {
                warn!("Activation of {} failed: {err}", self.config.cache_name);
                self.lifecycle.write().await.state = WorkerState::Installed;
                Err(err)
            }
        }
    }

    async fn purge_stale(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in self.storage.keys().await? {
            if self.config.is_stale_cache(&name) {
                self.storage.delete(&name).await?;
                debug!("Deleted stale cache {name}");
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Cache-first handling of one request.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> FetchOutcome {
        if self.state().await != WorkerState::Active {
            return FetchOutcome::PassThrough;
        }
        if !request.is_get() || !matches!(request.url.scheme(), "http" | "https") {
            return FetchOutcome::PassThrough;
        }

        let key = cache_key(&request.url);
        match self.storage.lookup(&self.config.cache_name, &key).await {
            Ok(Some(hit)) => {
                debug!("Cache hit {key}");
                return FetchOutcome::respond(ResponseSource::Cache, hit);
            }
            Ok(None) => {}
            Err(err) => warn!("Cache lookup for {key} failed: {err}"),
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() && self.config.is_same_origin(&request.url) {
                    if let Err(err) = self
                        .storage
                        .put(&self.config.cache_name, &key, response.clone())
                        .await
                    {
                        warn!("Could not cache {key}: {err}");
                    }
                }
                FetchOutcome::respond(ResponseSource::Network, response)
            }
            Err(err) => {
                warn!("Network fetch for {key} failed: {err}");
                self.offline_response(request).await
            }
        }
    }

    async fn offline_response(&self, request: &FetchRequest) -> FetchOutcome {
        if request.is_navigation() {
            let root = cache_key(&self.config.root_document());
            match self.storage.lookup(&self.config.cache_name, &root).await {
                Ok(Some(document)) => {
                    return FetchOutcome::respond(ResponseSource::OfflineFallback, document)
                }
                Ok(None) => debug!("No cached root document for offline navigation"),
                Err(err) => warn!("Root document lookup failed: {err}"),
            }
        }
        FetchOutcome::respond(
            ResponseSource::Unavailable,
            CachedResponse::service_unavailable(),
        )
    }

    pub async fn handle_message(&self, message: ControlMessage) -> Result<MessageReply> {
        match message {
            ControlMessage::SkipWaiting => {
                let state = {
                    let mut lifecycle = self.lifecycle.write().await;
                    lifecycle.skip_waiting = true;
                    lifecycle.state
                };
                match state {
                    WorkerState::Installed => {
                        let deleted = self.activate().await?;
                        Ok(MessageReply::Activated { deleted })
                    }
                    WorkerState::Parsed | WorkerState::Installing => {
                        Ok(MessageReply::ActivationQueued)
                    }
                    WorkerState::Activating | WorkerState::Active => {
                        Ok(MessageReply::AlreadyActive)
                    }
                    WorkerState::Redundant => {
                        Err(worker_error("redundant worker cannot be activated"))
                    }
                }
            }
            ControlMessage::ClearCache => {
                let existed = self.storage.delete(&self.config.cache_name).await?;
                info!("Cleared cache {} (existed: {existed})", self.config.cache_name);
                Ok(MessageReply::CacheCleared { existed })
            }
        }
    }

    pub async fn status(&self) -> Result<WorkerStatus> {
        Ok(WorkerStatus {
            state: self.state().await,
            cache_name: self.config.cache_name.clone(),
            caches: self.storage.keys().await?,
            entries: self.storage.entries(&self.config.cache_name).await?,
        })
    }

    async fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.state != from {
            return Err(worker_error(format!(
                "cannot move to {to} while {}",
                lifecycle.state
            )));
        }
        lifecycle.state = to;
        Ok(())
    }
}
