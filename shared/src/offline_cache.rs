//! Offline asset cache driven by the service-worker lifecycle.
//!
//! Install pre-caches a fixed asset list into a bucket named after the cache
//! version, activate evicts every other bucket, and fetches are served
//! cache-first with successful network responses written back.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

pub const DEFAULT_CACHE_VERSION: &str = "IMG2PDF-v1";
pub const DEFAULT_CACHE_ORIGIN: &str = "http://localhost:8000";
pub const DEFAULT_ASSETS: [&str; 7] = [
    "/",
    "/static/views/home.html",
    "/static/views/camera.html",
    "/static/views/my_pdfs.html",
    "/static/manifest.json",
    "/static/css/style.css",
    "/static/app.js",
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("install failed while caching '{asset}': {reason}")]
    InstallFailed { asset: String, reason: String },

    #[error("network request for '{url}' failed: {reason}")]
    Network { url: String, reason: String },

    #[error("cache storage error: {0}")]
    Storage(String),

    #[error("cannot {operation} while {phase:?}")]
    InvalidPhase {
        phase: CachePhase,
        operation: &'static str,
    },

    #[error("invalid cache manifest: {0}")]
    InvalidManifest(String),

    #[error("invalid request URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheManifest {
    /// Bucket name; bumping it evicts everything cached under older names.
    pub version: String,
    pub origin: String,
    pub asset_paths: BTreeSet<String>,
}

impl Default for CacheManifest {
    fn default() -> Self {
        Self {
            version: DEFAULT_CACHE_VERSION.to_string(),
            origin: DEFAULT_CACHE_ORIGIN.to_string(),
            asset_paths: DEFAULT_ASSETS.iter().map(|p| (*p).to_string()).collect(),
        }
    }
}

impl CacheManifest {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.version.trim().is_empty() {
            return Err(CacheError::InvalidManifest("version cannot be empty".into()));
        }
        self.origin_url()?;
        if let Some(path) = self.asset_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(CacheError::InvalidManifest(format!(
                "asset path '{path}' must be absolute"
            )));
        }
        Ok(())
    }

    fn origin_url(&self) -> Result<Url, CacheError> {
        Url::parse(&self.origin).map_err(|e| CacheError::InvalidManifest(format!("origin: {e}")))
    }

    /// Resolves a request URL to its cache key. Relative URLs are taken
    /// against the manifest origin.
    pub fn resolve(&self, url: &str) -> Result<String, CacheError> {
        let invalid = |reason: String| CacheError::InvalidUrl {
            url: url.to_string(),
            reason,
        };
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute.to_string()),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .origin_url()?
                .join(url)
                .map(|u| u.to_string())
                .map_err(|e| invalid(e.to_string())),
            Err(e) => Err(invalid(e.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
        }
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Cached(CachedResponse),
    Network(CachedResponse),
    /// Not handled here; the browser performs the request itself.
    Passthrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachePhase {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

#[async_trait::async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens a bucket, creating it when missing.
    async fn open(&self, bucket: &str) -> Result<(), CacheError>;
    async fn put(&self, bucket: &str, key: &str, response: CachedResponse) -> Result<(), CacheError>;
    /// Writes all entries or none of them.
    async fn put_all(
        &self,
        bucket: &str,
        entries: Vec<(String, CachedResponse)>,
    ) -> Result<(), CacheError>;
    /// First match across all buckets, in creation order.
    async fn match_any(&self, key: &str) -> Result<Option<CachedResponse>, CacheError>;
    async fn keys(&self) -> Result<Vec<String>, CacheError>;
    async fn delete(&self, bucket: &str) -> Result<bool, CacheError>;
}

#[async_trait::async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, CacheError>;
}

#[async_trait::async_trait]
pub trait WorkerScope: Send + Sync {
    async fn skip_waiting(&self);
    async fn claim_clients(&self);
}

/// In-memory [`CacheStorage`] keeping buckets in creation order.
#[derive(Default)]
pub struct MemoryCacheStorage {
    buckets: RwLock<Vec<(String, BTreeMap<String, CachedResponse>)>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bucket_len(&self, bucket: &str) -> Option<usize> {
        self.buckets
            .read()
            .await
            .iter()
            .find(|(name, _)| name == bucket)
            .map(|(_, entries)| entries.len())
    }
}

fn bucket_mut<'a>(
    buckets: &'a mut Vec<(String, BTreeMap<String, CachedResponse>)>,
    name: &str,
) -> &'a mut BTreeMap<String, CachedResponse> {
    let index = match buckets.iter().position(|(n, _)| n == name) {
        Some(index) => index,
        None => {
            buckets.push((name.to_string(), BTreeMap::new()));
            buckets.len() - 1
        }
    };
    &mut buckets[index].1
}

#[async_trait::async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, bucket: &str) -> Result<(), CacheError> {
        bucket_mut(&mut *self.buckets.write().await, bucket);
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, response: CachedResponse) -> Result<(), CacheError> {
        bucket_mut(&mut *self.buckets.write().await, bucket).insert(key.to_string(), response);
        Ok(())
    }

    async fn put_all(
        &self,
        bucket: &str,
        entries: Vec<(String, CachedResponse)>,
    ) -> Result<(), CacheError> {
        bucket_mut(&mut *self.buckets.write().await, bucket).extend(entries);
        Ok(())
    }

    async fn match_any(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        Ok(self
            .buckets
            .read()
            .await
            .iter()
            .find_map(|(_, entries)| entries.get(key).cloned()))
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .buckets
            .read()
            .await
            .iter()
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn delete(&self, bucket: &str) -> Result<bool, CacheError> {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|(name, _)| name != bucket);
        Ok(buckets.len() != before)
    }
}

pub struct OfflineCache<S: CacheStorage, N: Network, W: WorkerScope> {
    manifest: CacheManifest,
    storage: Arc<S>,
    network: Arc<N>,
    scope: Arc<W>,
    phase: RwLock<CachePhase>,
}

impl<S: CacheStorage, N: Network, W: WorkerScope> OfflineCache<S, N, W> {
    pub fn new(
        manifest: CacheManifest,
        storage: Arc<S>,
        network: Arc<N>,
        scope: Arc<W>,
    ) -> Result<Self, CacheError> {
        manifest.validate()?;
        Ok(Self {
            manifest,
            storage,
            network,
            scope,
            phase: RwLock::new(CachePhase::Parsed),
        })
    }

    pub fn manifest(&self) -> &CacheManifest {
        &self.manifest
    }

    pub async fn phase(&self) -> CachePhase {
        *self.phase.read().await
    }

    async fn enter(&self, from: CachePhase, to: CachePhase, operation: &'static str) -> Result<(), CacheError> {
        let mut phase = self.phase.write().await;
        if *phase != from {
            return Err(CacheError::InvalidPhase {
                phase: *phase,
                operation,
            });
        }
        *phase = to;
        Ok(())
    }

    async fn set_phase(&self, to: CachePhase) {
        *self.phase.write().await = to;
    }

    /// Pre-caches every manifest asset. Either all of them land in the
    /// versioned bucket or none do and this worker becomes redundant.
    #[instrument(skip(self), fields(version = %self.manifest.version))]
    pub async fn install(&self) -> Result<(), CacheError> {
        self.enter(CachePhase::Parsed, CachePhase::Installing, "install").await?;

        match self.fetch_assets().await {
            Ok(entries) => {
                let count = entries.len();
                if let Err(e) = self.store_assets(entries).await {
                    error!(error = %e, "failed to store pre-cached assets");
                    self.set_phase(CachePhase::Redundant).await;
                    return Err(e);
                }
                self.set_phase(CachePhase::Installed).await;
                info!(assets = count, "assets cached");
                self.scope.skip_waiting().await;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "install failed");
                self.set_phase(CachePhase::Redundant).await;
                Err(e)
            }
        }
    }

    async fn fetch_assets(&self) -> Result<Vec<(String, CachedResponse)>, CacheError> {
        let mut entries = Vec::with_capacity(self.manifest.asset_paths.len());

        for path in &self.manifest.asset_paths {
            let key = self.manifest.resolve(path)?;
            let response = self
                .network
                .fetch(&FetchRequest::get(key.clone()))
                .await
                .map_err(|e| CacheError::InstallFailed {
                    asset: path.clone(),
                    reason: e.to_string(),
                })?;

            if !response.is_success() {
                return Err(CacheError::InstallFailed {
                    asset: path.clone(),
                    reason: format!("HTTP {}", response.status),
                });
            }
            entries.push((key, response));
        }

        Ok(entries)
    }

    async fn store_assets(&self, entries: Vec<(String, CachedResponse)>) -> Result<(), CacheError> {
        self.storage.open(&self.manifest.version).await?;
        self.storage.put_all(&self.manifest.version, entries).await
    }

    /// Deletes every bucket but the current one and takes control of open
    /// pages. Returns the deleted bucket names.
    #[instrument(skip(self), fields(version = %self.manifest.version))]
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        self.enter(CachePhase::Installed, CachePhase::Activating, "activate").await?;

        let deleted = match self.evict_stale().await {
            Ok(deleted) => deleted,
            Err(e) => {
                error!(error = %e, "activation failed");
                self.set_phase(CachePhase::Installed).await;
                return Err(e);
            }
        };

        self.scope.claim_clients().await;
        self.set_phase(CachePhase::Activated).await;
        info!(evicted = ?deleted, "activated");
        Ok(deleted)
    }

    async fn evict_stale(&self) -> Result<Vec<String>, CacheError> {
        let mut deleted = Vec::new();
        for bucket in self.storage.keys().await? {
            if bucket != self.manifest.version && self.storage.delete(&bucket).await? {
                debug!(bucket = %bucket, "deleted stale cache");
                deleted.push(bucket);
            }
        }
        Ok(deleted)
    }

    /// Cache-first fetch. Successful network responses are copied into the
    /// current bucket; failures to store them are logged only.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, CacheError> {
        if !request.is_get() {
            return Ok(FetchOutcome::Passthrough);
        }

        let key = self.manifest.resolve(&request.url)?;

        match self.storage.match_any(&key).await {
            Ok(Some(cached)) => {
                debug!("cache hit");
                return Ok(FetchOutcome::Cached(cached));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cache lookup failed, falling back to network"),
        }

        let resolved = FetchRequest {
            method: request.method.clone(),
            url: key.clone(),
        };
        let response = match self.network.fetch(&resolved).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "fetch failed");
                return Err(match e {
                    CacheError::Network { .. } => e,
                    other => CacheError::Network {
                        url: key,
                        reason: other.to_string(),
                    },
                });
            }
        };

        if response.is_success() {
            if let Err(e) = self
                .storage
                .put(&self.manifest.version, &key, response.clone())
                .await
            {
                warn!(error = %e, "failed to cache response");
            }
        } else {
            debug!(status = response.status, "not caching unsuccessful response");
        }

        Ok(FetchOutcome::Network(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeNetwork {
        responses: HashMap<String, CachedResponse>,
        calls: AtomicUsize,
    }

    impl FakeNetwork {
        fn serving_assets(manifest: &CacheManifest) -> Self {
            let responses = manifest
                .asset_paths
                .iter()
                .map(|p| {
                    let key = manifest.resolve(p).unwrap();
                    (key, CachedResponse::ok(p.clone()))
                })
                .collect();
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }

        fn with(mut self, url: &str, response: CachedResponse) -> Self {
            self.responses.insert(url.to_string(), response);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Network for FakeNetwork {
        async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(&request.url)
                .cloned()
                .ok_or_else(|| CacheError::Network {
                    url: request.url.clone(),
                    reason: "offline".into(),
                })
        }
    }

    #[derive(Default)]
    struct FakeScope {
        skipped: AtomicBool,
        claimed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl WorkerScope for FakeScope {
        async fn skip_waiting(&self) {
            self.skipped.store(true, Ordering::SeqCst);
        }

        async fn claim_clients(&self) {
            self.claimed.store(true, Ordering::SeqCst);
        }
    }

    fn setup(
        network: FakeNetwork,
    ) -> (
        OfflineCache<MemoryCacheStorage, FakeNetwork, FakeScope>,
        Arc<MemoryCacheStorage>,
        Arc<FakeNetwork>,
        Arc<FakeScope>,
    ) {
        let storage = Arc::new(MemoryCacheStorage::new());
        let network = Arc::new(network);
        let scope = Arc::new(FakeScope::default());
        let cache = OfflineCache::new(
            CacheManifest::default(),
            storage.clone(),
            network.clone(),
            scope.clone(),
        )
        .unwrap();
        (cache, storage, network, scope)
    }

    #[test]
    fn test_default_manifest() {
        let manifest = CacheManifest::default();
        assert_eq!(manifest.version, "IMG2PDF-v1");
        assert_eq!(manifest.asset_paths.len(), 7);
        assert!(manifest.asset_paths.contains("/static/views/camera.html"));
        assert_eq!(manifest.validate(), Ok(()));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let manifest = CacheManifest::default();
        assert_eq!(
            manifest.resolve("/static/app.js").unwrap(),
            "http://localhost:8000/static/app.js"
        );
        assert_eq!(
            manifest.resolve("https://cdn.example.com/cropper.js").unwrap(),
            "https://cdn.example.com/cropper.js"
        );
    }

    #[tokio::test]
    async fn test_install_caches_every_asset() {
        let manifest = CacheManifest::default();
        let (cache, storage, _, scope) = setup(FakeNetwork::serving_assets(&manifest));

        cache.install().await.unwrap();

        assert_eq!(cache.phase().await, CachePhase::Installed);
        assert_eq!(storage.bucket_len("IMG2PDF-v1").await, Some(7));
        assert!(scope.skipped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let manifest = CacheManifest::default();
        let network = FakeNetwork::serving_assets(&manifest).with(
            "http://localhost:8000/static/app.js",
            CachedResponse {
                status: 404,
                headers: Vec::new(),
                body: Bytes::new(),
            },
        );
        let (cache, storage, _, scope) = setup(network);

        let err = cache.install().await.unwrap_err();
        assert!(matches!(err, CacheError::InstallFailed { .. }));
        assert_eq!(cache.phase().await, CachePhase::Redundant);
        assert_eq!(storage.bucket_len("IMG2PDF-v1").await, None);
        assert!(!scope.skipped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let (cache, _, _, _) = setup(FakeNetwork::default());
        assert!(matches!(
            cache.activate().await,
            Err(CacheError::InvalidPhase { .. })
        ));
    }

    #[tokio::test]
    async fn test_activate_evicts_old_versions() {
        let manifest = CacheManifest::default();
        let (cache, storage, _, scope) = setup(FakeNetwork::serving_assets(&manifest));
        storage.open("IMG2PDF-v0").await.unwrap();

        cache.install().await.unwrap();
        let deleted = cache.activate().await.unwrap();

        assert_eq!(deleted, vec!["IMG2PDF-v0".to_string()]);
        assert_eq!(storage.keys().await.unwrap(), vec!["IMG2PDF-v1".to_string()]);
        assert!(scope.claimed.load(Ordering::SeqCst));
        assert_eq!(cache.phase().await, CachePhase::Activated);
    }

    #[tokio::test]
    async fn test_cached_asset_served_without_network() {
        let manifest = CacheManifest::default();
        let (cache, _, network, _) = setup(FakeNetwork::serving_assets(&manifest));
        cache.install().await.unwrap();
        let calls = network.calls();

        let outcome = cache
            .handle_fetch(&FetchRequest::get("/static/css/style.css"))
            .await
            .unwrap();

        assert!(matches!(outcome, FetchOutcome::Cached(_)));
        assert_eq!(network.calls(), calls);
    }

    #[tokio::test]
    async fn test_miss_populates_cache_on_success_only() {
        let network = FakeNetwork::default()
            .with("http://localhost:8000/img/logo.png", CachedResponse::ok("png"))
            .with(
                "http://localhost:8000/missing",
                CachedResponse {
                    status: 404,
                    headers: Vec::new(),
                    body: Bytes::new(),
                },
            );
        let (cache, storage, network, _) = setup(network);

        let first = cache
            .handle_fetch(&FetchRequest::get("http://localhost:8000/img/logo.png"))
            .await
            .unwrap();
        assert!(matches!(first, FetchOutcome::Network(_)));
        let second = cache
            .handle_fetch(&FetchRequest::get("http://localhost:8000/img/logo.png"))
            .await
            .unwrap();
        assert!(matches!(second, FetchOutcome::Cached(_)));
        assert_eq!(network.calls(), 1);

        cache
            .handle_fetch(&FetchRequest::get("http://localhost:8000/missing"))
            .await
            .unwrap();
        assert_eq!(storage.bucket_len("IMG2PDF-v1").await, Some(1));
    }

    #[tokio::test]
    async fn test_non_get_passes_through() {
        let (cache, _, network, _) = setup(FakeNetwork::default());
        let outcome = cache
            .handle_fetch(&FetchRequest {
                method: "POST".into(),
                url: "/process-image".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Passthrough);
        assert_eq!(network.calls(), 0);
    }

    #[tokio::test]
    async fn test_network_error_propagates() {
        let (cache, _, _, _) = setup(FakeNetwork::default());
        let err = cache
            .handle_fetch(&FetchRequest::get("http://localhost:8000/offline"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Network { .. }));
    }
}
