use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use stencil_core::{
    collect_relative_file_paths, copy_dir_recursive, current_unix_timestamp,
    normalize_relative_path, unique_suffix, ProjectLayout,
};

const METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSet {
    #[serde(default = "metadata_version")]
    pub version: u32,
    pub name: String,
    pub created_at_unix: u64,
    pub paths: Vec<String>,
    pub tool_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOutcome {
    pub set: BackupSet,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl RestoreReport {
    pub fn ok(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupChecks {
    pub archive_exists: bool,
    pub archive_non_empty: bool,
    pub metadata_exists: bool,
    pub metadata_parses: bool,
}

impl BackupChecks {
    pub fn ok(self) -> bool {
        self.archive_exists && self.archive_non_empty && self.metadata_exists && self.metadata_parses
    }
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    layout: ProjectLayout,
}

impl BackupStore {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    /// Archives `paths` (project-relative; empty means every managed
    /// directory that exists) into one tar.gz plus a metadata sidecar.
    /// Missing paths are skipped and reported. The sidecar is only written
    /// once the archive is fully finalized.
    pub fn create(
        &self,
        label: &str,
        paths: &[String],
        tool_version: &str,
    ) -> Result<BackupOutcome> {
        self.layout.ensure_base_dirs()?;

        let requested: Vec<String> = if paths.is_empty() {
            self.layout
                .managed_dirs()
                .into_iter()
                .filter(|(_, dir)| dir.exists())
                .map(|(component, _)| component.dir_name().to_string())
                .collect()
        } else {
            paths.to_vec()
        };

        let mut archived = Vec::new();
        let mut skipped = Vec::new();
        for path in requested {
            if self.layout.root().join(&path).exists() {
                archived.push(path);
            } else {
                skipped.push(path);
            }
        }
        if archived.is_empty() {
            anyhow::bail!("backup-failed: no existing paths to back up");
        }

        let name = self.unique_name(label);
        let archive_path = self.archive_path(&name);
        if let Err(err) = self.write_archive(&archive_path, &archived) {
            // Never leave a partial archive behind an absent sidecar.
            let _ = fs::remove_file(&archive_path);
            return Err(err.context(format!(
                "backup-failed: could not finalize archive {}",
                archive_path.display()
            )));
        }

        let set = BackupSet {
            version: METADATA_VERSION,
            name: name.clone(),
            created_at_unix: current_unix_timestamp(),
            paths: archived,
            tool_version: tool_version.to_string(),
        };
        let metadata_path = self.metadata_path(&name);
        let content = serde_json::to_string_pretty(&set).with_context(|| {
            format!(
                "backup-failed: could not serialize metadata {}",
                metadata_path.display()
            )
        })?;
        if let Err(err) = fs::write(&metadata_path, content) {
            let _ = fs::remove_file(&archive_path);
            return Err(err).with_context(|| {
                format!(
                    "backup-failed: could not write metadata {}",
                    metadata_path.display()
                )
            });
        }

        Ok(BackupOutcome { set, skipped })
    }

    /// Extracts into an isolated temp area first, then swaps each recorded
    /// path into place. One failed path never aborts the rest.
    pub fn restore(&self, name: &str) -> Result<RestoreReport> {
        let set = self.read_metadata(name)?;
        let archive_path = self.archive_path(name);

        let extract_root = self
            .layout
            .tmp_dir()
            .join(format!("restore-{}-{}", name, unique_suffix()));
        fs::create_dir_all(&extract_root).with_context(|| {
            format!(
                "restore-failed: could not create extraction area {}",
                extract_root.display()
            )
        })?;

        let result = self.restore_into(&set, &archive_path, &extract_root);
        let _ = fs::remove_dir_all(&extract_root);
        result
    }

    fn restore_into(
        &self,
        set: &BackupSet,
        archive_path: &Path,
        extract_root: &Path,
    ) -> Result<RestoreReport> {
        let file = File::open(archive_path).with_context(|| {
            format!(
                "restore-failed: could not open archive {}",
                archive_path.display()
            )
        })?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.unpack(extract_root).with_context(|| {
            format!(
                "restore-failed: could not extract archive {}",
                archive_path.display()
            )
        })?;

        let mut report = RestoreReport::default();
        for path in &set.paths {
            match self.restore_one(extract_root, path) {
                Ok(()) => report.restored.push(path.clone()),
                Err(err) => report.failed.push((path.clone(), format!("{err:#}"))),
            }
        }
        Ok(report)
    }

    fn restore_one(&self, extract_root: &Path, path: &str) -> Result<()> {
        let extracted = extract_root.join(path);
        if !extracted.exists() {
            anyhow::bail!("path missing from archive: {path}");
        }

        let live = self.layout.root().join(path);
        if live.is_dir() {
            fs::remove_dir_all(&live)
                .with_context(|| format!("failed clearing live path {}", live.display()))?;
        } else if live.is_file() {
            fs::remove_file(&live)
                .with_context(|| format!("failed clearing live path {}", live.display()))?;
        }

        if extracted.is_dir() {
            copy_dir_recursive(&extracted, &live)?;
        } else {
            if let Some(parent) = live.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed creating {}", parent.display()))?;
            }
            fs::copy(&extracted, &live).with_context(|| {
                format!(
                    "failed copying {} to {}",
                    extracted.display(),
                    live.display()
                )
            })?;
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<BackupSet>> {
        let dir = self.layout.backups_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut sets = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed reading backups directory {}", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|v| v.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed reading backup metadata {}", path.display()))?;
            let set: BackupSet = serde_json::from_str(&raw)
                .with_context(|| format!("failed parsing backup metadata {}", path.display()))?;
            sets.push(set);
        }

        sets.sort_by(|a, b| {
            b.created_at_unix
                .cmp(&a.created_at_unix)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(sets)
    }

    pub fn latest(&self) -> Result<Option<BackupSet>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Keeps the `keep` newest backups, deletes the rest. Returns how many
    /// were removed.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let sets = self.list()?;
        let mut removed = 0_usize;
        for set in sets.iter().skip(keep) {
            let archive = self.archive_path(&set.name);
            let metadata = self.metadata_path(&set.name);
            if archive.exists() {
                fs::remove_file(&archive).with_context(|| {
                    format!("failed removing backup archive {}", archive.display())
                })?;
            }
            fs::remove_file(&metadata).with_context(|| {
                format!("failed removing backup metadata {}", metadata.display())
            })?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn verify(&self, name: &str) -> BackupChecks {
        let archive_path = self.archive_path(name);
        let metadata_path = self.metadata_path(name);

        let mut checks = BackupChecks::default();
        checks.archive_exists = archive_path.is_file();
        checks.archive_non_empty = fs::metadata(&archive_path)
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        checks.metadata_exists = metadata_path.is_file();
        checks.metadata_parses = fs::read_to_string(&metadata_path)
            .ok()
            .and_then(|raw| serde_json::from_str::<BackupSet>(&raw).ok())
            .is_some();
        checks
    }

    pub fn read_metadata(&self, name: &str) -> Result<BackupSet> {
        let path = self.metadata_path(name);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading backup metadata {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing backup metadata {}", path.display()))
    }

    fn write_archive(&self, archive_path: &Path, paths: &[String]) -> Result<()> {
        let file = File::create(archive_path)
            .with_context(|| format!("failed creating archive {}", archive_path.display()))?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        for path in paths {
            let full = self.layout.root().join(path);
            if full.is_dir() {
                for relative in collect_relative_file_paths(&full)? {
                    let entry_name =
                        format!("{}/{}", path, normalize_relative_path(&relative));
                    append_file(&mut builder, &full.join(&relative), &entry_name)?;
                }
            } else {
                append_file(&mut builder, &full, path)?;
            }
        }

        let encoder = builder
            .into_inner()
            .context("failed finishing archive stream")?;
        let file = encoder.finish().context("failed finishing compression")?;
        file.sync_all().context("failed flushing archive to disk")?;
        Ok(())
    }

    fn unique_name(&self, label: &str) -> String {
        let base = format!("{}-{}", label, current_unix_timestamp());
        if !self.metadata_path(&base).exists() && !self.archive_path(&base).exists() {
            return base;
        }
        format!("{}-{}", base, unique_suffix())
    }

    fn archive_path(&self, name: &str) -> PathBuf {
        self.layout.backups_dir().join(format!("{name}.tar.gz"))
    }

    fn metadata_path(&self, name: &str) -> PathBuf {
        self.layout.backups_dir().join(format!("{name}.json"))
    }
}

fn append_file<W: io::Write>(
    builder: &mut tar::Builder<W>,
    source: &Path,
    entry_name: &str,
) -> Result<()> {
    let mut file = File::open(source)
        .with_context(|| format!("failed opening {} for backup", source.display()))?;
    builder
        .append_file(Path::new(entry_name), &mut file)
        .with_context(|| format!("failed archiving {}", source.display()))?;
    Ok(())
}

fn metadata_version() -> u32 {
    METADATA_VERSION
}

#[cfg(test)]
mod tests;
