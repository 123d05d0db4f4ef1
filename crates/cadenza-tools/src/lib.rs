//! Acquisition and verification of Cadenza's optional external tools.
//!
//! The crate answers one question, "is this tool present, verified, and
//! usable?", by way of a signed remote release catalog (TTL-cached with
//! stale fallback), mandatory content hashing, optional Ed25519
//! signatures, and an atomically-written local install manifest. It also
//! runs the installed media downloader to extract audio from hosting
//! sites.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod installer;
pub mod integrity;
pub mod manifest;
pub mod resolver;

use std::sync::Arc;

pub use error::ToolError;

use cache::{CatalogCache, SystemClock};
use config::ToolsConfig;
use fetch::HttpFetcher;
use installer::ToolInstaller;
use manifest::ManifestStore;
use resolver::ReleaseResolver;

/// Wire up an installer against the real network, system clock, and the
/// default on-disk layout under the Cadenza data directory.
pub fn default_installer(config: &ToolsConfig) -> Result<ToolInstaller, ToolError> {
    let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
    let cache = Arc::new(CatalogCache::new(
        fetcher.clone(),
        Arc::new(SystemClock),
        config.catalog_url.clone(),
        config.trust_key.clone(),
        CatalogCache::default_cache_path(),
    ));
    Ok(ToolInstaller::new(
        ReleaseResolver::new(cache),
        fetcher,
        ManifestStore::new(ManifestStore::default_path()),
        cadenza_util::bin_dir(),
        cadenza_util::downloads_dir(),
    ))
}
