//! Tool installation: resolve a release, verify what is already on disk,
//! and only then download, verify, and atomically commit a new binary.
//!
//! Per install attempt the flow is CheckExisting, then either Verified
//! (terminal) or Download -> Verify -> Commit. Every failure after the
//! download starts removes the temp file before propagating; nothing
//! partial ever lands on the final path.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::ToolRelease;
use crate::error::ToolError;
use crate::fetch::Fetcher;
use crate::integrity;
use crate::manifest::{LocalManifest, LocalToolRecord, ManifestStore};
use crate::resolver::ReleaseResolver;

/// Outcome of re-checking an installed binary against its manifest record.
#[derive(Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    NotInstalled,
    /// The manifest has a record but the binary is gone.
    Missing,
    /// The binary's current hash differs from the recorded one.
    Modified { expected: String, actual: String },
    Verified,
}

pub struct ToolInstaller {
    resolver: ReleaseResolver,
    fetcher: Arc<dyn Fetcher>,
    store: ManifestStore,
    bin_dir: PathBuf,
    scratch_dir: PathBuf,
    // One async mutex per tool name: concurrent ensure_installed calls for
    // the same tool await a single install instead of racing on the
    // temp/final paths.
    in_flight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ToolInstaller {
    pub fn new(
        resolver: ReleaseResolver,
        fetcher: Arc<dyn Fetcher>,
        store: ManifestStore,
        bin_dir: PathBuf,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            store,
            bin_dir,
            scratch_dir,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Ensure a verified binary for `tool` is present locally, installing
    /// or re-installing as needed, and return its path.
    ///
    /// The installed binary is re-hashed on every call, not just on
    /// version changes, so tampering or corruption between runs is
    /// detected and repaired by a fresh download.
    pub async fn ensure_installed(&self, tool: &str) -> Result<PathBuf, ToolError> {
        let slot = self.lock_for(tool);
        let _guard = slot.lock().await;

        let release = self.resolver.resolve(tool).await?;
        let target = self.bin_dir.join(&release.binary_file_name);
        let mut manifest = self.store.read();

        // CheckExisting
        if let Some(record) = manifest.tools.get(tool) {
            if record.version == release.version
                && record.content_hash == release.content_hash
                && record.binary_path == target
                && target.exists()
            {
                let actual = integrity::hash_file(&target)?;
                if actual == record.content_hash {
                    debug!("{tool} {} already installed and verified", record.version);
                    mark_executable(&target)?;
                    let mut refreshed = record.clone();
                    refreshed.last_verified_at = cadenza_util::now_millis();
                    manifest.tools.insert(tool.to_string(), refreshed);
                    self.store.write(&manifest)?;
                    return Ok(target);
                }
                warn!("installed {tool} binary failed re-verification, reinstalling");
            }
        }

        // Download
        fs::create_dir_all(&self.scratch_dir)?;
        let tmp = self.scratch_dir.join(format!(
            "{}.tmp-{}",
            release.binary_file_name,
            Uuid::new_v4()
        ));
        let result = self
            .download_verify_commit(tool, &release, &tmp, &target, &mut manifest)
            .await;
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    async fn download_verify_commit(
        &self,
        tool: &str,
        release: &ToolRelease,
        tmp: &Path,
        target: &Path,
        manifest: &mut LocalManifest,
    ) -> Result<PathBuf, ToolError> {
        info!(
            "downloading {tool} {} from {}",
            release.version, release.download_url
        );
        let bytes = self.fetcher.fetch_buffer(&release.download_url).await?;
        tokio::fs::write(tmp, &bytes).await?;

        // Verify
        let actual = integrity::hash_file(tmp)?;
        if actual != release.content_hash {
            return Err(ToolError::ChecksumMismatch {
                tool: tool.to_string(),
                expected: release.content_hash.clone(),
                actual,
            });
        }
        if let (Some(signature), Some(public_key)) = (&release.signature, &release.public_key) {
            let message = format!("{tool}@{}:{}", release.version, release.content_hash);
            let signature = integrity::decode_signature(signature).ok_or_else(|| {
                ToolError::SignatureInvalid(format!("release signature for {tool} is not base64"))
            })?;
            if !integrity::verify_signature(message.as_bytes(), public_key, &signature) {
                return Err(ToolError::SignatureInvalid(format!(
                    "release signature rejected for {tool} {}",
                    release.version
                )));
            }
        }

        // Commit
        mark_executable(tmp)?;
        fs::create_dir_all(&self.bin_dir)?;
        fs::rename(tmp, target)?;
        let now = cadenza_util::now_millis();
        manifest.tools.insert(
            tool.to_string(),
            LocalToolRecord {
                version: release.version.clone(),
                content_hash: release.content_hash.clone(),
                binary_path: target.to_path_buf(),
                source_url: release.download_url.clone(),
                installed_at: now,
                last_verified_at: now,
            },
        );
        self.store.write(manifest)?;
        info!("installed {tool} {} at {}", release.version, target.display());
        Ok(target.to_path_buf())
    }

    /// Everything the manifest records as installed.
    pub fn installed_tools(&self) -> Vec<(String, LocalToolRecord)> {
        self.store.read().tools.into_iter().collect()
    }

    /// Re-hash an installed binary against its record without installing.
    pub fn verify_installed(&self, tool: &str) -> Result<VerifyOutcome, ToolError> {
        let manifest = self.store.read();
        let Some(record) = manifest.tools.get(tool) else {
            return Ok(VerifyOutcome::NotInstalled);
        };
        if !record.binary_path.exists() {
            return Ok(VerifyOutcome::Missing);
        }
        let actual = integrity::hash_file(&record.binary_path)?;
        if actual != record.content_hash {
            return Ok(VerifyOutcome::Modified {
                expected: record.content_hash.clone(),
                actual,
            });
        }
        Ok(VerifyOutcome::Verified)
    }

    /// Remove a tool's binary and scrub its manifest record. Returns
    /// whether anything was installed to begin with.
    pub async fn uninstall(&self, tool: &str) -> Result<bool, ToolError> {
        let slot = self.lock_for(tool);
        let _guard = slot.lock().await;

        let mut manifest = self.store.read();
        let Some(record) = manifest.tools.remove(tool) else {
            return Ok(false);
        };
        if let Err(err) = fs::remove_file(&record.binary_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "failed to remove {}: {}",
                    record.binary_path.display(),
                    err
                );
            }
        }
        self.store.write(&manifest)?;
        info!("uninstalled {tool} {}", record.version);
        Ok(true)
    }

    /// Sweep temp files left in the scratch directory by crashed installs.
    /// Returns how many entries were removed.
    pub fn clean_downloads(&self) -> std::io::Result<usize> {
        let entries = match fs::read_dir(&self.scratch_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let is_stray = name
                .to_str()
                .map(|name| name.contains(".tmp-"))
                .unwrap_or(false);
            if is_stray && entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn lock_for(&self, tool: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(tool.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

fn mark_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CatalogCache, Clock};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClock;

    impl Clock for FixedClock {
        fn now_millis(&self) -> i64 {
            1_700_000_000_000
        }
    }

    /// Serves the same payload for every artifact URL and counts calls;
    /// catalog URLs always fail so resolution exercises the builtin path
    /// or a pre-seeded disk cache.
    struct StubFetcher {
        payload: Vec<u8>,
        downloads: AtomicUsize,
    }

    impl StubFetcher {
        fn new(payload: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                payload,
                downloads: AtomicUsize::new(0),
            })
        }

        fn downloads(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch_buffer(&self, url: &str) -> Result<Vec<u8>, ToolError> {
            if url.ends_with("catalog.json") {
                return Err(ToolError::Network("no catalog in tests".into()));
            }
            self.downloads.fetch_add(1, Ordering::SeqCst);
            Ok(self.payload.clone())
        }
    }

    const TOOL: &str = "yt-dlp";
    const PAYLOAD: &[u8] = b"#!/bin/sh\nexit 0\n";

    fn seed_catalog(dir: &Path, release: ToolRelease) -> PathBuf {
        let mut by_platform = std::collections::BTreeMap::new();
        by_platform.insert("linux-x86_64".to_string(), release);
        let mut tools = std::collections::BTreeMap::new();
        tools.insert(TOOL.to_string(), by_platform);
        let cached = crate::catalog::CachedCatalog {
            fetched_at: 1_700_000_000_000,
            catalog: crate::catalog::RemoteCatalog {
                catalog_version: 1,
                generated_at: 1,
                tools,
                signature: None,
            },
        };
        let path = dir.join("catalog-cache.json");
        cadenza_util::write_json_atomic(&path, &cached).unwrap();
        path
    }

    fn installer_with(
        dir: &Path,
        fetcher: Arc<StubFetcher>,
        release: ToolRelease,
    ) -> ToolInstaller {
        std::env::set_var("CADENZA_PLATFORM", "linux-x86_64");
        let cache_path = seed_catalog(dir, release);
        let cache = Arc::new(CatalogCache::new(
            fetcher.clone(),
            Arc::new(FixedClock),
            "https://example.com/catalog.json".into(),
            None,
            cache_path,
        ));
        ToolInstaller::new(
            ReleaseResolver::new(cache),
            fetcher,
            ManifestStore::new(dir.join("tools.json")),
            dir.join("bin"),
            dir.join("downloads"),
        )
    }

    fn release_for_payload(payload: &[u8]) -> ToolRelease {
        ToolRelease {
            version: "2025.06.30".into(),
            download_url: "https://example.com/assets/yt-dlp".into(),
            content_hash: integrity::hash_bytes(payload),
            binary_file_name: "yt-dlp".into(),
            signature: None,
            public_key: None,
        }
    }

    #[tokio::test]
    async fn installs_verifies_and_records_a_fresh_tool() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(PAYLOAD.to_vec());
        let installer = installer_with(dir.path(), fetcher.clone(), release_for_payload(PAYLOAD));

        let path = installer.ensure_installed(TOOL).await.unwrap();

        assert!(path.exists());
        assert_eq!(fetcher.downloads(), 1);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111, "binary should be executable");
        }
        let (name, record) = installer.installed_tools().pop().unwrap();
        assert_eq!(name, TOOL);
        assert_eq!(record.version, "2025.06.30");
        assert_eq!(record.content_hash, integrity::hash_bytes(PAYLOAD));
        assert_eq!(installer.verify_installed(TOOL).unwrap(), VerifyOutcome::Verified);
    }

    #[tokio::test]
    async fn second_install_downloads_nothing_and_bumps_last_verified_at() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(PAYLOAD.to_vec());
        let installer = installer_with(dir.path(), fetcher.clone(), release_for_payload(PAYLOAD));

        installer.ensure_installed(TOOL).await.unwrap();
        let first = installer.installed_tools().pop().unwrap().1;

        std::thread::sleep(std::time::Duration::from_millis(5));
        installer.ensure_installed(TOOL).await.unwrap();
        let second = installer.installed_tools().pop().unwrap().1;

        assert_eq!(fetcher.downloads(), 1, "no re-download expected");
        assert_eq!(second.installed_at, first.installed_at);
        assert!(second.last_verified_at > first.last_verified_at);
    }

    #[tokio::test]
    async fn tampered_binary_is_detected_and_reinstalled() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(PAYLOAD.to_vec());
        let installer = installer_with(dir.path(), fetcher.clone(), release_for_payload(PAYLOAD));

        let path = installer.ensure_installed(TOOL).await.unwrap();
        fs::write(&path, b"tampered contents").unwrap();
        assert!(matches!(
            installer.verify_installed(TOOL).unwrap(),
            VerifyOutcome::Modified { .. }
        ));

        let path = installer.ensure_installed(TOOL).await.unwrap();

        assert_eq!(fetcher.downloads(), 2, "tampering should force a re-download");
        assert_eq!(integrity::hash_file(&path).unwrap(), integrity::hash_bytes(PAYLOAD));
    }

    #[tokio::test]
    async fn checksum_mismatch_commits_nothing_and_removes_the_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(b"not the declared bytes".to_vec());
        let installer = installer_with(dir.path(), fetcher, release_for_payload(PAYLOAD));

        let err = installer.ensure_installed(TOOL).await.unwrap_err();

        assert!(matches!(err, ToolError::ChecksumMismatch { .. }), "got {err:?}");
        assert!(!dir.path().join("bin").join("yt-dlp").exists());
        let strays = fs::read_dir(dir.path().join("downloads"))
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(strays, 0, "temp file must not survive the call");
        assert!(installer.installed_tools().is_empty());
    }

    #[tokio::test]
    async fn signed_release_with_bad_signature_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(PAYLOAD.to_vec());
        let mut release = release_for_payload(PAYLOAD);
        release.signature = Some(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            [0u8; 64],
        ));
        release.public_key = Some(hex::encode([1u8; 32]));
        let installer = installer_with(dir.path(), fetcher, release);

        let err = installer.ensure_installed(TOOL).await.unwrap_err();

        assert!(matches!(err, ToolError::SignatureInvalid(_)), "got {err:?}");
        assert!(!dir.path().join("bin").join("yt-dlp").exists());
    }

    #[tokio::test]
    async fn signed_release_with_valid_signature_installs() {
        use ed25519_dalek::{Signer, SigningKey};

        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(PAYLOAD.to_vec());
        let mut release = release_for_payload(PAYLOAD);
        let signing = SigningKey::from_bytes(&[5u8; 32]);
        let message = format!("{TOOL}@{}:{}", release.version, release.content_hash);
        release.signature = Some(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            signing.sign(message.as_bytes()).to_bytes(),
        ));
        release.public_key = Some(hex::encode(signing.verifying_key().as_bytes()));
        let installer = installer_with(dir.path(), fetcher, release);

        assert!(installer.ensure_installed(TOOL).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_installs_of_one_tool_share_a_single_download() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(PAYLOAD.to_vec());
        let installer = Arc::new(installer_with(
            dir.path(),
            fetcher.clone(),
            release_for_payload(PAYLOAD),
        ));

        let a = {
            let installer = installer.clone();
            tokio::spawn(async move { installer.ensure_installed(TOOL).await })
        };
        let b = {
            let installer = installer.clone();
            tokio::spawn(async move { installer.ensure_installed(TOOL).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(fetcher.downloads(), 1);
    }

    #[tokio::test]
    async fn uninstall_removes_binary_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(PAYLOAD.to_vec());
        let installer = installer_with(dir.path(), fetcher, release_for_payload(PAYLOAD));

        let path = installer.ensure_installed(TOOL).await.unwrap();
        assert!(installer.uninstall(TOOL).await.unwrap());

        assert!(!path.exists());
        assert!(installer.installed_tools().is_empty());
        assert!(!installer.uninstall(TOOL).await.unwrap());
        assert_eq!(
            installer.verify_installed(TOOL).unwrap(),
            VerifyOutcome::NotInstalled
        );
    }

    #[tokio::test]
    async fn clean_downloads_sweeps_only_stray_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StubFetcher::new(PAYLOAD.to_vec());
        let installer = installer_with(dir.path(), fetcher, release_for_payload(PAYLOAD));

        let scratch = dir.path().join("downloads");
        fs::create_dir_all(&scratch).unwrap();
        fs::write(scratch.join("yt-dlp.tmp-dead-install"), b"partial").unwrap();
        fs::write(scratch.join("unrelated.bin"), b"keep me").unwrap();

        assert_eq!(installer.clean_downloads().unwrap(), 1);
        assert!(scratch.join("unrelated.bin").exists());
        assert!(!scratch.join("yt-dlp.tmp-dead-install").exists());
    }
}
