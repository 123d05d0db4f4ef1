//! Track-source resolution: decide whether a user-supplied reference is
//! playable as-is or needs to be extracted through the media downloader,
//! and orchestrate the extraction when it does.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use url::Url;

use cadenza_tools::config::ToolsConfig;
use cadenza_tools::extractor::extract_audio;
use cadenza_tools::installer::ToolInstaller;
use cadenza_tools::resolver::MEDIA_DOWNLOADER;
use cadenza_tools::ToolError;

use crate::progress::{ProgressSink, ProgressStage};

/// Hosts whose URLs require extraction. Subdomains count: `youtu.be`
/// matches exactly, `m.youtube.com` via the `youtube.com` suffix.
const HOSTING_DOMAINS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "vimeo.com",
    "dailymotion.com",
    "soundcloud.com",
    "bandcamp.com",
    "twitch.tv",
];

const FALLBACK_PLAYLIST_SEGMENT: &str = "playlist";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Direct,
    Extracted,
}

/// Resolution result; ownership passes to the caller, which is
/// responsible for playback and persistence.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTrackSource {
    pub source_type: SourceType,
    /// A locator the playback layer can open: the original reference for
    /// direct sources, a `file://` URL for extracted ones.
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

/// True only for absolute http(s) URLs on a known hosting domain.
/// Unparsable input is a direct source, not an error.
pub fn needs_extraction(source: &str) -> bool {
    let Ok(url) = Url::parse(source.trim()) else {
        return false;
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    HOSTING_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

/// Reduce a playlist identifier to a path segment that cannot escape the
/// extraction root. Empty results fall back to a fixed name.
pub fn sanitize_playlist_segment(playlist_id: &str) -> String {
    let mut out = String::with_capacity(playlist_id.len());
    let mut prev_underscore = false;
    for c in playlist_id.chars() {
        let keep = c.is_ascii_alphanumeric() || c == '-' || c == '_';
        let replacement = if keep { c } else { '_' };
        if replacement == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replacement);
            prev_underscore = false;
        }
    }
    let trimmed = out.trim_matches('_').to_string();
    if trimmed.is_empty() {
        FALLBACK_PLAYLIST_SEGMENT.to_string()
    } else {
        trimmed
    }
}

pub struct TrackSourceResolver {
    installer: ToolInstaller,
    config: ToolsConfig,
    sink: ProgressSink,
    extract_root: PathBuf,
}

impl TrackSourceResolver {
    pub fn new(installer: ToolInstaller, config: ToolsConfig, sink: ProgressSink) -> Self {
        Self {
            installer,
            config,
            sink,
            extract_root: cadenza_util::extracted_dir(),
        }
    }

    pub fn with_extract_root(mut self, root: PathBuf) -> Self {
        self.extract_root = root;
        self
    }

    /// Resolve a source string to something the playback layer can open.
    ///
    /// Direct sources return immediately. Extraction sources install the
    /// media downloader if needed and run it, emitting progress events
    /// correlated by `request_id` along the way. Install and extraction
    /// failures propagate untried; they are the caller's to surface.
    pub async fn resolve(
        &self,
        source: &str,
        playlist_id: &str,
        request_id: &str,
    ) -> Result<ResolvedTrackSource, ToolError> {
        let trimmed = source.trim();
        if !needs_extraction(trimmed) {
            debug!("source used directly: {trimmed}");
            return Ok(ResolvedTrackSource {
                source_type: SourceType::Direct,
                url: trimmed.to_string(),
                title: None,
                local_path: None,
            });
        }

        self.sink.emit(
            request_id,
            ProgressStage::Prepare,
            "Preparing audio extraction",
            Some(0),
        );
        self.sink.emit(
            request_id,
            ProgressStage::InstallTool,
            "Checking media downloader",
            None,
        );
        let binary = self.installer.ensure_installed(MEDIA_DOWNLOADER).await?;

        let target_dir = self.extract_root.join(sanitize_playlist_segment(playlist_id));
        self.sink.emit(
            request_id,
            ProgressStage::DownloadAudio,
            format!("Extracting audio from {trimmed}"),
            Some(10),
        );
        let extraction =
            extract_audio(&binary, trimmed, &target_dir, self.config.extract_timeout).await?;

        self.sink.emit(
            request_id,
            ProgressStage::Finalize,
            "Audio ready",
            Some(100),
        );
        Ok(ResolvedTrackSource {
            source_type: SourceType::Extracted,
            url: file_url(&extraction.file_path),
            title: Some(extraction.title),
            local_path: Some(extraction.file_path),
        })
    }
}

fn file_url(path: &Path) -> String {
    match Url::from_file_path(path) {
        Ok(url) => url.to_string(),
        Err(()) => format!("file://{}", path.display()),
    }
}
