//! Application state shared across handlers.

use crate::content::ContentFinder;
use crate::error::ApiResult;
use crate::tape::BundleSource;
use stacks_cache::TimeCache;
use stacks_core::AppConfig;
use stacks_fragment::FragmentStore;
use stacks_storage::BlobStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Daemon configuration.
    pub config: Arc<AppConfig>,
    /// Blob cache in front of tape.
    pub cache: Arc<TimeCache>,
    /// Upload staging area.
    pub fragments: Arc<FragmentStore>,
    /// Read coordinator for the blob path.
    pub finder: Arc<ContentFinder>,
}

impl AppState {
    /// Create application state. The cache and the fragment store get
    /// their own backing stores so their key namespaces cannot collide.
    ///
    /// # Panics
    ///
    /// Panics if the cache configuration is invalid; a zero TTL would
    /// put the eviction worker into a busy loop.
    pub fn new(
        config: AppConfig,
        cache_store: Arc<dyn BlobStore>,
        upload_store: Arc<dyn BlobStore>,
        tape: Arc<dyn BundleSource>,
    ) -> Self {
        if let Err(error) = config.cache.validate() {
            panic!("invalid cache configuration: {error}");
        }

        let cache = Arc::new(TimeCache::new(
            cache_store,
            config.cache.ttl(),
            config.cache.max_size,
        ));
        let fragments = Arc::new(FragmentStore::new(upload_store));
        let finder = Arc::new(ContentFinder::new(cache.clone(), tape));

        Self {
            config: Arc::new(config),
            cache,
            fragments,
            finder,
        }
    }

    /// Recover persisted state after a cold start: rebuild the cache
    /// index from its manifest and reload staged files.
    pub async fn recover(&self) -> ApiResult<()> {
        self.cache.scan().await?;
        self.fragments.load().await?;
        Ok(())
    }
}
