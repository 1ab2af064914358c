use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use shared::offline_cache::{
    CacheError, CacheManifest, CachePhase, CacheStorage, CachedResponse, FetchOutcome,
    FetchRequest, MemoryCacheStorage, Network, OfflineCache, WorkerScope,
};

struct StaticServer {
    body_prefix: &'static str,
    calls: AtomicUsize,
}

impl StaticServer {
    fn new(body_prefix: &'static str) -> Self {
        Self {
            body_prefix,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Network for StaticServer {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CachedResponse::ok(format!("{}{}", self.body_prefix, request.url)))
    }
}

#[derive(Default)]
struct Scope {
    claims: AtomicUsize,
}

#[async_trait::async_trait]
impl WorkerScope for Scope {
    async fn skip_waiting(&self) {}

    async fn claim_clients(&self) {
        self.claims.fetch_add(1, Ordering::SeqCst);
    }
}

fn manifest(version: &str) -> CacheManifest {
    CacheManifest {
        version: version.to_string(),
        ..CacheManifest::default()
    }
}

#[tokio::test]
async fn test_new_version_replaces_old_cache() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let scope = Arc::new(Scope::default());

    let v1 = OfflineCache::new(
        manifest("IMG2PDF-v1"),
        storage.clone(),
        Arc::new(StaticServer::new("v1:")),
        scope.clone(),
    )
    .unwrap();
    v1.install().await.unwrap();
    assert!(v1.activate().await.unwrap().is_empty());

    let server = Arc::new(StaticServer::new("v2:"));
    let v2 = OfflineCache::new(manifest("IMG2PDF-v2"), storage.clone(), server.clone(), scope.clone())
        .unwrap();
    v2.install().await.unwrap();

    // Until activation both generations are present.
    assert_eq!(storage.keys().await.unwrap().len(), 2);

    let deleted = v2.activate().await.unwrap();
    assert_eq!(deleted, vec!["IMG2PDF-v1".to_string()]);
    assert_eq!(v2.phase().await, CachePhase::Activated);
    assert_eq!(scope.claims.load(Ordering::SeqCst), 2);

    let calls = server.calls.load(Ordering::SeqCst);
    match v2.handle_fetch(&FetchRequest::get("/static/app.js")).await.unwrap() {
        FetchOutcome::Cached(response) => {
            assert!(response.body.starts_with(b"v2:"));
        }
        other => panic!("expected a cache hit, got {other:?}"),
    }
    assert_eq!(server.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_install_twice_is_rejected() {
    let cache = OfflineCache::new(
        CacheManifest::default(),
        Arc::new(MemoryCacheStorage::new()),
        Arc::new(StaticServer::new("")),
        Arc::new(Scope::default()),
    )
    .unwrap();

    cache.install().await.unwrap();
    assert!(matches!(
        cache.install().await,
        Err(CacheError::InvalidPhase {
            phase: CachePhase::Installed,
            ..
        })
    ));
}

#[test]
fn test_manifest_rejects_relative_assets() {
    let mut assets = CacheManifest::default().asset_paths;
    assets.insert("static/app.js".into());
    let manifest = CacheManifest {
        asset_paths: assets,
        ..CacheManifest::default()
    };
    assert!(matches!(
        manifest.validate(),
        Err(CacheError::InvalidManifest(_))
    ));
}
