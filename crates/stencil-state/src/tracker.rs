use std::collections::BTreeMap;
use std::fs;
use std::io;

use anyhow::{Context, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use stencil_core::{
    collect_relative_file_paths, current_unix_timestamp, fingerprint_bytes, fingerprint_file,
    normalize_relative_path, ProjectLayout,
};

const STATE_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEntry {
    #[serde(default)]
    pub original_fingerprint: Option<String>,
    #[serde(default)]
    pub current_fingerprint: Option<String>,
    #[serde(default)]
    pub user_created: bool,
    pub tracked_since_unix: u64,
}

impl TrackingEntry {
    pub fn modified(&self) -> bool {
        !self.user_created && self.current_fingerprint != self.original_fingerprint
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CustomizationFile {
    #[serde(default = "state_file_version")]
    version: u32,
    created_unix: u64,
    updated_unix: u64,
    #[serde(default)]
    tracked_files: BTreeMap<String, TrackingEntry>,
    #[serde(default)]
    preserve_patterns: Vec<String>,
}

impl Default for CustomizationFile {
    fn default() -> Self {
        let now = current_unix_timestamp();
        Self {
            version: STATE_FILE_VERSION,
            created_unix: now,
            updated_unix: now,
            tracked_files: BTreeMap::new(),
            preserve_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomizationReport {
    pub modified: Vec<String>,
    pub user_created: Vec<String>,
    pub preserved: Vec<String>,
    pub untracked: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CustomizationTracker {
    layout: ProjectLayout,
}

impl CustomizationTracker {
    pub fn new(layout: ProjectLayout) -> Self {
        Self { layout }
    }

    pub fn track(&self, path: &str, original_content: &[u8]) -> Result<()> {
        let fingerprint = fingerprint_bytes(original_content);
        let mut state = self.load_state()?;
        state.tracked_files.insert(
            path.to_string(),
            TrackingEntry {
                original_fingerprint: Some(fingerprint.clone()),
                current_fingerprint: Some(fingerprint),
                user_created: false,
                tracked_since_unix: current_unix_timestamp(),
            },
        );
        self.save_state(state)
    }

    /// Brings every untracked file under managed directories into tracking,
    /// using its present content as the baseline. Returns the count added.
    pub fn track_tree(&self) -> Result<usize> {
        let mut state = self.load_state()?;
        let mut added = 0_usize;

        for path in self.managed_files()? {
            if state.tracked_files.contains_key(&path) {
                continue;
            }
            let fingerprint = fingerprint_file(&self.layout.root().join(&path))?;
            state.tracked_files.insert(
                path,
                TrackingEntry {
                    original_fingerprint: Some(fingerprint.clone()),
                    current_fingerprint: Some(fingerprint),
                    user_created: false,
                    tracked_since_unix: current_unix_timestamp(),
                },
            );
            added += 1;
        }

        if added > 0 {
            self.save_state(state)?;
        }
        Ok(added)
    }

    /// Recomputes the on-disk fingerprint. Unknown paths become user-created
    /// entries; deleted files keep their entry with no current fingerprint.
    pub fn refresh(&self, path: &str) -> Result<()> {
        let mut state = self.load_state()?;
        let current = self.disk_fingerprint(path)?;

        match state.tracked_files.get_mut(path) {
            Some(entry) => {
                entry.current_fingerprint = current;
            }
            None => {
                state.tracked_files.insert(
                    path.to_string(),
                    TrackingEntry {
                        original_fingerprint: None,
                        current_fingerprint: current,
                        user_created: true,
                        tracked_since_unix: current_unix_timestamp(),
                    },
                );
            }
        }
        self.save_state(state)
    }

    pub fn is_customized(&self, path: &str) -> Result<bool> {
        let state = self.load_state()?;

        if let Some(entry) = state.tracked_files.get(path) {
            if entry.user_created {
                return Ok(true);
            }
            let current = self.disk_fingerprint(path)?;
            let Some(current) = current else {
                // Deleting a managed file is itself a customization.
                return Ok(true);
            };
            return Ok(Some(current) != entry.original_fingerprint);
        }

        Ok(matches_any(&compile_patterns(&state.preserve_patterns), path))
    }

    pub fn detect_all(&self) -> Result<CustomizationReport> {
        let state = self.load_state()?;
        let patterns = compile_patterns(&state.preserve_patterns);
        let mut report = CustomizationReport::default();

        for (path, entry) in &state.tracked_files {
            if entry.user_created {
                report.user_created.push(path.clone());
                continue;
            }
            let current = self.disk_fingerprint(path)?;
            if current.is_none() || current != entry.original_fingerprint {
                report.modified.push(path.clone());
            }
        }

        for path in self.managed_files()? {
            let preserved = matches_any(&patterns, &path);
            if preserved {
                report.preserved.push(path.clone());
            }
            if !state.tracked_files.contains_key(&path) && !preserved {
                report.untracked.push(path);
            }
        }

        Ok(report)
    }

    /// Accepts the file's present content as the new unmodified baseline.
    pub fn mark_as_original(&self, path: &str) -> Result<()> {
        let current = self.disk_fingerprint(path)?;
        if current.is_none() {
            anyhow::bail!(
                "cannot mark missing file as original: {}",
                self.layout.root().join(path).display()
            );
        }

        let mut state = self.load_state()?;
        let entry = state
            .tracked_files
            .entry(path.to_string())
            .or_insert_with(|| TrackingEntry {
                original_fingerprint: None,
                current_fingerprint: None,
                user_created: false,
                tracked_since_unix: current_unix_timestamp(),
            });
        entry.original_fingerprint = current.clone();
        entry.current_fingerprint = current;
        entry.user_created = false;
        self.save_state(state)
    }

    /// Re-baselines against upstream content while keeping the on-disk
    /// fingerprint live, so local divergence stays visible after an upgrade.
    pub fn set_baseline(&self, path: &str, content: &[u8]) -> Result<()> {
        let current = self.disk_fingerprint(path)?;
        let mut state = self.load_state()?;
        let entry = state
            .tracked_files
            .entry(path.to_string())
            .or_insert_with(|| TrackingEntry {
                original_fingerprint: None,
                current_fingerprint: None,
                user_created: false,
                tracked_since_unix: current_unix_timestamp(),
            });
        entry.original_fingerprint = Some(fingerprint_bytes(content));
        entry.current_fingerprint = current;
        entry.user_created = false;
        self.save_state(state)
    }

    /// Re-baselines every tracked file under `prefixes` (a path or a
    /// directory prefix) to its present disk content, used after a backup
    /// restore puts an older tree back. Entries whose file no longer exists
    /// are dropped; user-created entries keep their classification and only
    /// refresh the disk fingerprint. Returns the count touched.
    pub fn rebaseline_paths(&self, prefixes: &[String]) -> Result<usize> {
        let mut state = self.load_state()?;
        let keys: Vec<String> = state
            .tracked_files
            .keys()
            .filter(|path| under_any_prefix(path, prefixes))
            .cloned()
            .collect();

        let mut touched = 0_usize;
        for key in keys {
            match self.disk_fingerprint(&key)? {
                None => {
                    state.tracked_files.remove(&key);
                    touched += 1;
                }
                Some(fingerprint) => {
                    if let Some(entry) = state.tracked_files.get_mut(&key) {
                        if !entry.user_created {
                            entry.original_fingerprint = Some(fingerprint.clone());
                        }
                        entry.current_fingerprint = Some(fingerprint);
                        touched += 1;
                    }
                }
            }
        }

        if touched > 0 {
            self.save_state(state)?;
        }
        Ok(touched)
    }

    pub fn add_preserve_pattern(&self, pattern: &str) -> Result<()> {
        Pattern::new(pattern).with_context(|| format!("invalid preserve pattern: '{pattern}'"))?;
        let mut state = self.load_state()?;
        if !state.preserve_patterns.iter().any(|existing| existing == pattern) {
            state.preserve_patterns.push(pattern.to_string());
        }
        self.save_state(state)
    }

    pub fn preserve_patterns(&self) -> Result<Vec<String>> {
        Ok(self.load_state()?.preserve_patterns)
    }

    pub fn matches_preserve(&self, path: &str) -> Result<bool> {
        let state = self.load_state()?;
        Ok(matches_any(&compile_patterns(&state.preserve_patterns), path))
    }

    pub fn tracked_entry(&self, path: &str) -> Result<Option<TrackingEntry>> {
        Ok(self.load_state()?.tracked_files.get(path).cloned())
    }

    fn managed_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for (_, dir) in self.layout.managed_dirs() {
            if !dir.is_dir() {
                continue;
            }
            let component_prefix = dir
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            for relative in collect_relative_file_paths(&dir)? {
                files.push(format!(
                    "{}/{}",
                    component_prefix,
                    normalize_relative_path(&relative)
                ));
            }
        }
        files.sort();
        Ok(files)
    }

    fn disk_fingerprint(&self, path: &str) -> Result<Option<String>> {
        let full = self.layout.root().join(path);
        if !full.is_file() {
            return Ok(None);
        }
        fingerprint_file(&full).map(Some)
    }

    fn load_state(&self) -> Result<CustomizationFile> {
        let path = self.layout.customizations_file();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(CustomizationFile::default());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed reading customization state: {}", path.display())
                });
            }
        };

        serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing customization state: {}", path.display()))
    }

    fn save_state(&self, mut state: CustomizationFile) -> Result<()> {
        self.layout.ensure_base_dirs()?;
        state.version = STATE_FILE_VERSION;
        state.updated_unix = current_unix_timestamp();

        let path = self.layout.customizations_file();
        let content = serde_json::to_string_pretty(&state).with_context(|| {
            format!("failed serializing customization state: {}", path.display())
        })?;
        fs::write(&path, content)
            .with_context(|| format!("failed writing customization state: {}", path.display()))
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|pattern| Pattern::new(pattern).ok())
        .collect()
}

fn matches_any(patterns: &[Pattern], path: &str) -> bool {
    patterns.iter().any(|pattern| pattern.matches(path))
}

fn under_any_prefix(path: &str, prefixes: &[String]) -> bool {
    prefixes
        .iter()
        .any(|prefix| path == prefix || path.starts_with(&format!("{prefix}/")))
}

fn state_file_version() -> u32 {
    STATE_FILE_VERSION
}
