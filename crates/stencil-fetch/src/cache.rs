use std::fs;
use std::time::SystemTime;

use anyhow::{Context, Result};
use stencil_core::{collect_relative_file_paths, current_unix_timestamp, ProjectLayout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub origin_kind: String,
    pub version: String,
    pub bytes: u64,
    pub age_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheInfo {
    pub total_bytes: u64,
    pub entries: Vec<CacheEntry>,
}

/// No automatic expiry: this is the only eviction path.
pub(crate) fn clear(layout: &ProjectLayout) -> Result<usize> {
    let cache_dir = layout.cache_dir();
    if !cache_dir.exists() {
        return Ok(0);
    }

    let removed = info(layout)?.entries.len();
    fs::remove_dir_all(&cache_dir)
        .with_context(|| format!("failed clearing cache {}", cache_dir.display()))?;
    fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed recreating cache {}", cache_dir.display()))?;
    Ok(removed)
}

pub(crate) fn info(layout: &ProjectLayout) -> Result<CacheInfo> {
    let cache_dir = layout.cache_dir();
    let mut result = CacheInfo::default();
    if !cache_dir.exists() {
        return Ok(result);
    }

    for kind_entry in fs::read_dir(&cache_dir)
        .with_context(|| format!("failed reading cache {}", cache_dir.display()))?
    {
        let kind_entry = kind_entry?;
        if !kind_entry.file_type()?.is_dir() {
            continue;
        }
        let origin_kind = kind_entry.file_name().to_string_lossy().to_string();

        for version_entry in fs::read_dir(kind_entry.path()).with_context(|| {
            format!("failed reading cache slot {}", kind_entry.path().display())
        })? {
            let version_entry = version_entry?;
            if !version_entry.file_type()?.is_dir() {
                continue;
            }

            let slot = version_entry.path();
            let mut bytes = 0_u64;
            for relative in collect_relative_file_paths(&slot)? {
                bytes += fs::metadata(slot.join(&relative))
                    .map(|meta| meta.len())
                    .unwrap_or(0);
            }

            let age_secs = fs::metadata(&slot)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| {
                    modified
                        .duration_since(SystemTime::UNIX_EPOCH)
                        .ok()
                        .map(|since| current_unix_timestamp().saturating_sub(since.as_secs()))
                })
                .unwrap_or(0);

            result.total_bytes += bytes;
            result.entries.push(CacheEntry {
                origin_kind: origin_kind.clone(),
                version: version_entry.file_name().to_string_lossy().to_string(),
                bytes,
                age_secs,
            });
        }
    }

    result
        .entries
        .sort_by(|a, b| (&a.origin_kind, &a.version).cmp(&(&b.origin_kind, &b.version)));
    Ok(result)
}
