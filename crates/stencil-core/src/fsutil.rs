use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

pub fn copy_dir_recursive(source_root: &Path, destination_root: &Path) -> Result<()> {
    if !source_root.is_dir() {
        anyhow::bail!("source is not a directory: {}", source_root.display());
    }

    if destination_root.exists() {
        fs::remove_dir_all(destination_root).with_context(|| {
            format!(
                "failed clearing destination directory {}",
                destination_root.display()
            )
        })?;
    }
    fs::create_dir_all(destination_root).with_context(|| {
        format!(
            "failed creating destination directory {}",
            destination_root.display()
        )
    })?;

    let mut queue: VecDeque<(PathBuf, PathBuf)> = VecDeque::new();
    queue.push_back((source_root.to_path_buf(), destination_root.to_path_buf()));

    while let Some((from_dir, to_dir)) = queue.pop_front() {
        for entry in fs::read_dir(&from_dir)
            .with_context(|| format!("failed reading directory {}", from_dir.display()))?
        {
            let entry = entry?;
            let from_path = entry.path();
            let to_path = to_dir.join(entry.file_name());
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                fs::create_dir_all(&to_path)
                    .with_context(|| format!("failed creating directory {}", to_path.display()))?;
                queue.push_back((from_path, to_path));
            } else if file_type.is_file() {
                fs::copy(&from_path, &to_path).with_context(|| {
                    format!(
                        "failed copying file from {} to {}",
                        from_path.display(),
                        to_path.display()
                    )
                })?;
            }
        }
    }

    Ok(())
}

pub fn collect_relative_file_paths(root: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    queue.push_back(root.to_path_buf());

    while let Some(dir) = queue.pop_front() {
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed reading directory {}", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                queue.push_back(path);
            } else if file_type.is_file() {
                let relative_path = path.strip_prefix(root).with_context(|| {
                    format!(
                        "failed deriving relative path {} from {}",
                        path.display(),
                        root.display()
                    )
                })?;
                paths.push(relative_path.to_path_buf());
            }
        }
    }

    paths.sort();
    Ok(paths)
}

/// Forward-slash form used for tracking keys and glob matching.
pub fn normalize_relative_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
