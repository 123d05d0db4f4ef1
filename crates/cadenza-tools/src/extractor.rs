//! Audio extraction via the installed media downloader.
//!
//! Subprocess contract: the tool is asked for best-available audio-only
//! output with playlist expansion and progress chatter disabled, and for
//! exactly two stdout lines, the resolved title and then, once the file
//! is finalized, its absolute path. Exit status zero is not trusted on
//! its own; the printed path must exist.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::info;

use crate::error::ToolError;

#[derive(Clone, Debug, PartialEq)]
pub struct Extraction {
    pub title: String,
    pub file_path: PathBuf,
}

pub async fn extract_audio(
    binary: &Path,
    source_url: &str,
    target_dir: &Path,
    timeout: Duration,
) -> Result<Extraction, ToolError> {
    std::fs::create_dir_all(target_dir)?;
    let template = target_dir.join("%(title)s-%(id)s.%(ext)s");

    let mut cmd = Command::new(binary);
    cmd.arg("-f")
        .arg("bestaudio")
        .arg("--no-playlist")
        .arg("--no-progress")
        .arg("--no-simulate")
        .arg("--print")
        .arg("title")
        .arg("--print")
        .arg("after_move:filepath")
        .arg("-o")
        .arg(&template)
        .arg(source_url)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    info!("extracting audio from {source_url} into {}", target_dir.display());
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| ToolError::Timeout("audio extraction"))??;

    if !output.status.success() {
        return Err(ToolError::SubprocessFailure {
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let (title, file_path) = parse_output(&stdout).ok_or_else(|| {
        ToolError::SubprocessFailure {
            status: 0,
            stderr: "extractor printed no output path".to_string(),
        }
    })?;
    if !file_path.exists() {
        return Err(ToolError::OutputFileMissing(file_path));
    }

    Ok(Extraction { title, file_path })
}

/// Last non-blank line is the output path, first is the title. An empty
/// (or absent) title line falls back to the file stem.
fn parse_output(stdout: &str) -> Option<(String, PathBuf)> {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let file_path = PathBuf::from(*lines.last()?);
    let title_line = if lines.len() >= 2 { lines[0] } else { "" };
    let title = if title_line.is_empty() {
        file_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        title_line.to_string()
    };
    Some((title, file_path))
}
