//! Write-through directory for cache entries.
//!
//! One `<key>.wav` file per entry. Files are written under a `.tmp` name and
//! renamed into place, so a reader never sees a partial file.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::CacheEntry;
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::wav;

const ENTRY_EXT: &str = "wav";
const TMP_EXT: &str = "tmp";

pub(super) fn entry_path(dir: &Path, key: &CacheKey) -> PathBuf {
    dir.join(format!("{key}.{ENTRY_EXT}"))
}

pub(super) async fn write_entry(dir: &Path, entry: &CacheEntry) -> Result<()> {
    let path = entry_path(dir, &entry.key);
    let tmp = path.with_extension(format!("{ENTRY_EXT}.{TMP_EXT}"));

    tokio::fs::write(&tmp, &entry.audio_bytes)
        .await
        .map_err(|e| Error::cache_io(&format!("write {}", tmp.display()), e))?;

    if let Err(e) = tokio::fs::rename(&tmp, &path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(Error::cache_io(&format!("rename {}", path.display()), e));
    }
    Ok(())
}

/// Remove the file for `key`. A file that is already gone is not an error.
pub(super) async fn remove_entry(dir: &Path, key: &CacheKey) -> Result<()> {
    let path = entry_path(dir, key);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::cache_io(&format!("remove {}", path.display()), e)),
    }
}

/// Read every entry file in `dir`, oldest first. Leftover temporary files are
/// deleted; files whose name is not a key are ignored.
pub(super) async fn scan(dir: &Path, default_sample_rate: u32) -> Result<Vec<CacheEntry>> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::cache_io(&format!("create {}", dir.display()), e))?;

    let mut found: Vec<(Option<SystemTime>, CacheKey, PathBuf)> = Vec::new();
    let mut listing = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::cache_io(&format!("list {}", dir.display()), e))?;

    while let Some(item) = listing
        .next_entry()
        .await
        .map_err(|e| Error::cache_io(&format!("list {}", dir.display()), e))?
    {
        let path = item.path();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(TMP_EXT) => {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("Could not remove stale {}: {e}", path.display());
                }
                continue;
            }
            Some(ENTRY_EXT) => {}
            _ => continue,
        }

        let Some(key) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<CacheKey>().ok())
        else {
            continue;
        };

        let modified = item.metadata().await.ok().and_then(|m| m.modified().ok());
        found.push((modified, key, path));
    }

    found.sort_by_key(|(modified, _, _)| *modified);

    let mut entries = Vec::with_capacity(found.len());
    for (modified, key, path) in found {
        let audio_bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Removing unreadable cache file {}: {e}", path.display());
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }
        };

        let (sample_rate, sample_count) = match wav::inspect_wav(&audio_bytes) {
            Ok(info) => (info.sample_rate, info.sample_count),
            Err(e) => {
                warn!("No usable WAV header in {}: {e}", path.display());
                (
                    default_sample_rate,
                    wav::estimate_sample_count(audio_bytes.len()),
                )
            }
        };

        let created_at = modified
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);

        entries.push(CacheEntry {
            key,
            size_bytes: audio_bytes.len() as u64,
            audio_bytes,
            sample_rate,
            sample_count,
            created_at,
        });
    }

    Ok(entries)
}

/// Remove every entry file in `dir` whose key `in_use` rejects. Temporary
/// files are left to the writer that owns them. Returns how many were removed.
pub(super) async fn sweep<F>(dir: &Path, in_use: F) -> Result<usize>
where
    F: Fn(&CacheKey) -> bool,
{
    let mut listing = match tokio::fs::read_dir(dir).await {
        Ok(listing) => listing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(Error::cache_io(&format!("list {}", dir.display()), e)),
    };

    let mut removed = 0;
    while let Some(item) = listing
        .next_entry()
        .await
        .map_err(|e| Error::cache_io(&format!("list {}", dir.display()), e))?
    {
        let path = item.path();
        let key = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<CacheKey>().ok());
        let stale = match (path.extension().and_then(|ext| ext.to_str()), key) {
            (Some(ENTRY_EXT), Some(key)) => !in_use(&key),
            _ => false,
        };
        if !stale {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::cache_io(&format!("remove {}", path.display()), e)),
        }
    }
    Ok(removed)
}
