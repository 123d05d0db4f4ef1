//! Shared helpers for the Cadenza crates: application data paths, atomic
//! JSON persistence, and wall-clock time.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Serialize;
use uuid::Uuid;

const DATA_DIR_ENV: &str = "CADENZA_DATA_DIR";

/// Root of all Cadenza on-disk state. `CADENZA_DATA_DIR` overrides the
/// default `~/.local/share/cadenza`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return expand_user(&dir);
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local/share/cadenza")
    } else {
        PathBuf::from("/tmp/cadenza")
    }
}

pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}

pub fn state_file_path(file_name: &str) -> PathBuf {
    state_dir().join(file_name)
}

/// Scratch directory for in-flight artifact downloads.
pub fn downloads_dir() -> PathBuf {
    data_dir().join("downloads")
}

/// Final home of installed tool binaries.
pub fn bin_dir() -> PathBuf {
    data_dir().join("bin")
}

/// Directory extracted audio files land under, one subdirectory per playlist.
pub fn extracted_dir() -> PathBuf {
    data_dir().join("extracted")
}

pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let rest = path.strip_prefix("~/").unwrap_or("");
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Serialize `value` as pretty JSON to a uniquely-named temp file next to
/// `path`, then rename it over the canonical path. Readers see either the
/// old or the new complete file, never a partial write.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn expand_user_passes_plain_paths_through() {
        assert_eq!(expand_user("/opt/tools"), PathBuf::from("/opt/tools"));
        assert_eq!(expand_user("relative/dir"), PathBuf::from("relative/dir"));
    }

    #[test]
    fn write_json_atomic_round_trips_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sample.json");
        let value = Sample {
            name: "yt-dlp".into(),
            count: 3,
        };

        write_json_atomic(&path, &value).unwrap();

        let raw = fs::read(&path).unwrap();
        let read: Sample = serde_json::from_slice(&raw).unwrap();
        assert_eq!(read, value);

        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("sample.json")]);
    }

    #[test]
    fn write_json_atomic_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        write_json_atomic(
            &path,
            &Sample {
                name: "a".into(),
                count: 1,
            },
        )
        .unwrap();
        write_json_atomic(
            &path,
            &Sample {
                name: "b".into(),
                count: 2,
            },
        )
        .unwrap();

        let read: Sample = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(read.name, "b");
        assert_eq!(read.count, 2);
    }
}
