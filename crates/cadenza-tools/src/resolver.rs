//! Release resolution: remote catalog first, compiled-in table second.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use tracing::warn;

use crate::cache::CatalogCache;
use crate::catalog::ToolRelease;
use crate::error::ToolError;

/// The media downloader used for audio extraction.
pub const MEDIA_DOWNLOADER: &str = "yt-dlp";
/// The audio transcoder.
pub const AUDIO_TRANSCODER: &str = "ffmpeg";

const PLATFORM_OVERRIDE_ENV: &str = "CADENZA_PLATFORM";

/// `"{os}-{arch}"` lookup key for the running platform, `None` when no
/// release could exist for this host. `CADENZA_PLATFORM` overrides.
pub fn platform_key() -> Option<String> {
    if let Ok(override_key) = std::env::var(PLATFORM_OVERRIDE_ENV) {
        if !override_key.trim().is_empty() {
            return Some(override_key);
        }
    }
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "x86_64") => Some("linux-x86_64".into()),
        ("linux", "aarch64") => Some("linux-aarch64".into()),
        ("macos", "x86_64") => Some("darwin-x86_64".into()),
        ("macos", "aarch64") => Some("darwin-aarch64".into()),
        ("windows", "x86_64") => Some("windows-x86_64".into()),
        _ => None,
    }
}

type BuiltinTable = BTreeMap<String, BTreeMap<String, ToolRelease>>;

fn builtin_table() -> &'static BuiltinTable {
    static TABLE: OnceLock<BuiltinTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        let raw = include_str!("../builtin_releases.json");
        match serde_json::from_str(raw) {
            Ok(table) => table,
            Err(err) => {
                warn!("failed to parse builtin release table: {err}");
                BuiltinTable::new()
            }
        }
    })
}

pub fn builtin_release(tool: &str, platform: &str) -> Option<ToolRelease> {
    builtin_table()
        .get(tool)
        .and_then(|by_platform| by_platform.get(platform))
        .cloned()
}

pub struct ReleaseResolver {
    cache: Arc<CatalogCache>,
}

impl ReleaseResolver {
    pub fn new(cache: Arc<CatalogCache>) -> Self {
        Self { cache }
    }

    /// Pick the release descriptor for `tool` on the current platform.
    ///
    /// A catalog entry is accepted only if it is well-formed (§`ToolRelease::
    /// is_well_formed`); a malformed or missing entry falls back to the
    /// builtin table. Catalog unavailability never surfaces here.
    pub async fn resolve(&self, tool: &str) -> Result<ToolRelease, ToolError> {
        let platform = platform_key().ok_or_else(|| ToolError::UnsupportedPlatform {
            tool: tool.to_string(),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        })?;

        if let Some(catalog) = self.cache.get_catalog().await {
            if let Some(release) = catalog.release_for(tool, &platform) {
                if release.is_well_formed() {
                    return Ok(release.clone());
                }
                warn!("catalog entry for {tool} on {platform} is malformed, using builtin table");
            }
        }

        builtin_release(tool, &platform).ok_or(ToolError::UnsupportedPlatform {
            tool: tool.to_string(),
            platform,
        })
    }
}
