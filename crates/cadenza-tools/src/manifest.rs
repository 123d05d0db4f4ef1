//! Local install manifest: the sole on-disk record of which tool versions
//! are present and verified.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocalManifest {
    pub tools: BTreeMap<String, LocalToolRecord>,
}

/// Invariant: while a record exists, the file at `binary_path` was observed
/// to hash to `content_hash` at `last_verified_at`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocalToolRecord {
    pub version: String,
    pub content_hash: String,
    pub binary_path: PathBuf,
    pub source_url: String,
    pub installed_at: i64,
    pub last_verified_at: i64,
}

pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> PathBuf {
        cadenza_util::state_file_path("tools.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read never fails: a missing or unparsable manifest yields the empty
    /// manifest, which forces re-verification of anything claimed
    /// installed rather than blocking tool usage.
    pub fn read(&self) -> LocalManifest {
        let data = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return LocalManifest::default(),
            Err(e) => {
                warn!("failed to read manifest {}: {}", self.path.display(), e);
                return LocalManifest::default();
            }
        };
        match serde_json::from_slice(&data) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("failed to parse manifest {}: {}", self.path.display(), e);
                LocalManifest::default()
            }
        }
    }

    pub fn write(&self, manifest: &LocalManifest) -> io::Result<()> {
        cadenza_util::write_json_atomic(&self.path, manifest)
    }
}
