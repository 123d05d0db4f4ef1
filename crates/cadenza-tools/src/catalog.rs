//! Remote release catalog: wire shapes, structural validation, and the
//! canonical signing payload. The catalog is untrusted input until
//! `parse_and_validate` accepts it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::integrity;

/// One installable artifact for one (tool, platform) pair. Immutable once
/// resolved for an install attempt.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolRelease {
    pub version: String,
    pub download_url: String,
    /// Lowercase hex SHA-256 of the artifact bytes.
    pub content_hash: String,
    pub binary_file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl ToolRelease {
    /// A release is only usable when its required fields are non-empty and
    /// the binary file name cannot escape the binaries directory.
    pub fn is_well_formed(&self) -> bool {
        !self.version.trim().is_empty()
            && !self.download_url.trim().is_empty()
            && !self.content_hash.trim().is_empty()
            && is_safe_binary_name(&self.binary_file_name)
    }
}

/// A compromised or malformed catalog must not be able to name a binary
/// like `../../.bashrc`.
pub fn is_safe_binary_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && !trimmed.contains('/')
        && !trimmed.contains('\\')
        && trimmed != "."
        && trimmed != ".."
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteCatalog {
    pub catalog_version: u32,
    pub generated_at: i64,
    pub tools: BTreeMap<String, BTreeMap<String, ToolRelease>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl RemoteCatalog {
    pub fn release_for(&self, tool: &str, platform: &str) -> Option<&ToolRelease> {
        self.tools.get(tool).and_then(|by_platform| by_platform.get(platform))
    }
}

/// What the catalog cache persists: the catalog plus when it was fetched.
/// `fetched_at` is monotonically non-decreasing across refreshes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CachedCatalog {
    pub fetched_at: i64,
    pub catalog: RemoteCatalog,
}

/// The signed portion of a catalog, serialized with deterministic key
/// order. The `signature` field itself is excluded.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SigningPayload<'a> {
    catalog_version: u32,
    generated_at: i64,
    tools: &'a BTreeMap<String, BTreeMap<String, ToolRelease>>,
}

pub fn signing_payload(catalog: &RemoteCatalog) -> Result<Vec<u8>, ToolError> {
    serde_json::to_vec(&SigningPayload {
        catalog_version: catalog.catalog_version,
        generated_at: catalog.generated_at,
        tools: &catalog.tools,
    })
    .map_err(|e| ToolError::InvalidCatalog(format!("failed to canonicalize catalog: {e}")))
}

/// Validate raw catalog bytes at the trust boundary.
///
/// Structural requirements: a JSON object with a numeric `catalogVersion`
/// and an object-shaped `tools` table. When the catalog carries a
/// signature and a trust key is configured, the signature must verify
/// over the canonical payload; a present-but-invalid signature fails the
/// whole fetch. A signature with no configured key is ignored.
pub fn parse_and_validate(raw: &[u8], trust_key: Option<&str>) -> Result<RemoteCatalog, ToolError> {
    let value: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| ToolError::InvalidCatalog(format!("not valid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| ToolError::InvalidCatalog("top level is not an object".into()))?;
    if !object.get("catalogVersion").map(serde_json::Value::is_u64).unwrap_or(false) {
        return Err(ToolError::InvalidCatalog(
            "catalogVersion missing or not numeric".into(),
        ));
    }
    if !object.get("tools").map(serde_json::Value::is_object).unwrap_or(false) {
        return Err(ToolError::InvalidCatalog("tools missing or not an object".into()));
    }

    let catalog: RemoteCatalog = serde_json::from_value(value)
        .map_err(|e| ToolError::InvalidCatalog(format!("malformed catalog shape: {e}")))?;

    if let (Some(signature), Some(key)) = (catalog.signature.as_deref(), trust_key) {
        let payload = signing_payload(&catalog)?;
        let signature = integrity::decode_signature(signature).ok_or_else(|| {
            ToolError::InvalidCatalog("catalog signature is not valid base64".into())
        })?;
        if !integrity::verify_signature(&payload, key, &signature) {
            return Err(ToolError::InvalidCatalog(
                "catalog signature verification failed".into(),
            ));
        }
    }

    Ok(catalog)
}
