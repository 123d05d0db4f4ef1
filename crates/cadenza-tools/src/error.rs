use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for tool acquisition and extraction.
///
/// `InvalidCatalog` never escapes the catalog cache: a bad remote catalog
/// degrades to the cached or built-in release table. Everything else
/// propagates to the caller unretried.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("redirect limit exceeded fetching {0}")]
    TooManyRedirects(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("no release of {tool} available for platform {platform}")]
    UnsupportedPlatform { tool: String, platform: String },

    #[error("checksum mismatch for {tool}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        tool: String,
        expected: String,
        actual: String,
    },

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("extraction process exited with status {status}: {stderr}")]
    SubprocessFailure { status: i32, stderr: String },

    #[error("extraction reported an output file that does not exist: {0}")]
    OutputFileMissing(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
