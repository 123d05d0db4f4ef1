//! Environment-driven configuration for the acquisition engine.

use std::time::Duration;

use cadenza_util::env_or;

const OWNER_ENV: &str = "CADENZA_CATALOG_OWNER";
const REPO_ENV: &str = "CADENZA_CATALOG_REPO";
const TAG_ENV: &str = "CADENZA_CATALOG_TAG";
const ASSET_ENV: &str = "CADENZA_CATALOG_ASSET";
const TRUST_KEY_ENV: &str = "CADENZA_TRUST_KEY";
const FETCH_TIMEOUT_ENV: &str = "CADENZA_FETCH_TIMEOUT_SECS";
const EXTRACT_TIMEOUT_ENV: &str = "CADENZA_EXTRACT_TIMEOUT_SECS";

const DEFAULT_OWNER: &str = "cadenza-app";
const DEFAULT_REPO: &str = "tool-releases";
const DEFAULT_TAG: &str = "latest";
const DEFAULT_ASSET: &str = "catalog.json";

#[derive(Clone, Debug)]
pub struct ToolsConfig {
    /// Full URL of the published catalog asset.
    pub catalog_url: String,
    /// Optional PEM (or raw base64/hex) public key; absence disables
    /// signature checking, hash checking stays mandatory.
    pub trust_key: Option<String>,
    pub fetch_timeout: Duration,
    pub extract_timeout: Duration,
}

impl ToolsConfig {
    pub fn from_env() -> Self {
        let owner = env_or(OWNER_ENV, DEFAULT_OWNER);
        let repo = env_or(REPO_ENV, DEFAULT_REPO);
        let tag = env_or(TAG_ENV, DEFAULT_TAG);
        let asset = env_or(ASSET_ENV, DEFAULT_ASSET);
        let catalog_url = if tag == "latest" {
            format!("https://github.com/{owner}/{repo}/releases/latest/download/{asset}")
        } else {
            format!("https://github.com/{owner}/{repo}/releases/download/{tag}/{asset}")
        };

        Self {
            catalog_url,
            trust_key: std::env::var(TRUST_KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty()),
            fetch_timeout: duration_from_env(FETCH_TIMEOUT_ENV, 30),
            extract_timeout: duration_from_env(EXTRACT_TIMEOUT_ENV, 600),
        }
    }
}

fn duration_from_env(key: &str, default_secs: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}
