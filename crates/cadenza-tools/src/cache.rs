//! Two-tier (memory, disk) TTL cache over the remote release catalog.
//!
//! Resolution order: fresh memory copy, fresh disk copy, network fetch.
//! Any fetch failure falls back to the newest disk copy regardless of age:
//! tool installation keeps working while the publishing endpoint is down,
//! but a fetch that does succeed is never accepted unvalidated.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::catalog::{parse_and_validate, CachedCatalog, RemoteCatalog};
use crate::error::ToolError;
use crate::fetch::Fetcher;

pub const CATALOG_TTL_MILLIS: i64 = 6 * 60 * 60 * 1000;

/// Injected clock so TTL expiry is testable without wall-clock sleeps.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        cadenza_util::now_millis()
    }
}

pub struct CatalogCache {
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    catalog_url: String,
    trust_key: Option<String>,
    cache_path: PathBuf,
    // Shared mutable memory tier; the lock is never held across I/O, so
    // concurrent refreshes can at worst duplicate a fetch.
    memory: Mutex<Option<CachedCatalog>>,
}

impl CatalogCache {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        catalog_url: String,
        trust_key: Option<String>,
        cache_path: PathBuf,
    ) -> Self {
        Self {
            fetcher,
            clock,
            catalog_url,
            trust_key,
            cache_path,
            memory: Mutex::new(None),
        }
    }

    pub fn default_cache_path() -> PathBuf {
        cadenza_util::state_file_path("catalog-cache.json")
    }

    /// Single entry point. `None` only when every tier comes up empty:
    /// no fresh cache, fetch failed, and no stale disk copy to fall
    /// back on.
    pub async fn get_catalog(&self) -> Option<RemoteCatalog> {
        let now = self.clock.now_millis();

        if let Some(cached) = self.fresh_from_memory(now) {
            return Some(cached.catalog);
        }

        if let Some(cached) = self.read_disk() {
            if now - cached.fetched_at < CATALOG_TTL_MILLIS {
                debug!("promoting fresh on-disk catalog to memory cache");
                self.store_memory(cached.clone());
                return Some(cached.catalog);
            }
        }

        match self.refresh(now).await {
            Ok(catalog) => Some(catalog),
            Err(err) => {
                warn!("catalog refresh failed, falling back to cached copy: {err}");
                let stale = self.read_disk()?;
                self.store_memory(stale.clone());
                Some(stale.catalog)
            }
        }
    }

    async fn refresh(&self, now: i64) -> Result<RemoteCatalog, ToolError> {
        let raw = self.fetcher.fetch_buffer(&self.catalog_url).await?;
        let catalog = parse_and_validate(&raw, self.trust_key.as_deref())?;

        // fetched_at never goes backwards, even under a skewed clock.
        let previous = self.newest_known_fetched_at();
        let cached = CachedCatalog {
            fetched_at: now.max(previous),
            catalog: catalog.clone(),
        };

        if let Err(err) = cadenza_util::write_json_atomic(&self.cache_path, &cached) {
            warn!(
                "failed to persist catalog cache {}: {}",
                self.cache_path.display(),
                err
            );
        }
        self.store_memory(cached);
        Ok(catalog)
    }

    fn fresh_from_memory(&self, now: i64) -> Option<CachedCatalog> {
        let guard = self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .as_ref()
            .filter(|cached| now - cached.fetched_at < CATALOG_TTL_MILLIS)
            .cloned()
    }

    fn store_memory(&self, cached: CachedCatalog) {
        let mut guard = self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(cached);
    }

    fn newest_known_fetched_at(&self) -> i64 {
        let memory = {
            let guard = self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.as_ref().map(|cached| cached.fetched_at).unwrap_or(0)
        };
        let disk = self
            .read_disk()
            .map(|cached| cached.fetched_at)
            .unwrap_or(0);
        memory.max(disk)
    }

    fn read_disk(&self) -> Option<CachedCatalog> {
        let data = std::fs::read(&self.cache_path).ok()?;
        match serde_json::from_slice(&data) {
            Ok(cached) => Some(cached),
            Err(err) => {
                warn!(
                    "ignoring unparsable catalog cache {}: {}",
                    self.cache_path.display(),
                    err
                );
                None
            }
        }
    }
}
