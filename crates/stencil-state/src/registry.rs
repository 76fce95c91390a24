use std::collections::BTreeMap;
use std::fs;
use std::io;

use anyhow::{Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use stencil_core::{current_unix_timestamp, Component, ProjectLayout};

pub const HISTORY_LIMIT: usize = 50;

const STATE_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(default = "state_file_version")]
    pub version: u32,
    pub tool_version: String,
    pub template_version: String,
    pub installed_at_unix: u64,
    #[serde(default)]
    pub last_upgrade_at_unix: Option<u64>,
    pub components: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Major,
    Minor,
    Patch,
    None,
    Unknown,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Patch => "patch",
            Self::None => "none",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeCheck {
    pub available: bool,
    pub current: String,
    pub latest: String,
    pub change: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryEntryKind {
    Upgrade,
    Rollback,
}

impl HistoryEntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upgrade => "upgrade",
            Self::Rollback => "rollback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: String,
    pub timestamp_unix: u64,
    pub kind: HistoryEntryKind,
}

#[derive(Debug, Clone)]
pub struct VersionRegistry {
    layout: ProjectLayout,
    tool_version: String,
}

impl VersionRegistry {
    pub fn new(layout: ProjectLayout, tool_version: impl Into<String>) -> Self {
        Self {
            layout,
            tool_version: tool_version.into(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.layout.version_file().exists()
    }

    pub fn initialize(&self, version: &str) -> Result<VersionRecord> {
        let path = self.layout.version_file();
        if path.exists() {
            anyhow::bail!(
                "already-initialized: version record exists: {}",
                path.display()
            );
        }

        let components = Component::ALL
            .iter()
            .map(|component| (component.as_str().to_string(), version.to_string()))
            .collect();
        let record = VersionRecord {
            version: STATE_FILE_VERSION,
            tool_version: self.tool_version.clone(),
            template_version: version.to_string(),
            installed_at_unix: current_unix_timestamp(),
            last_upgrade_at_unix: None,
            components,
        };
        self.save(&record)?;
        Ok(record)
    }

    /// Reads the persisted record, auto-initializing on first run.
    pub fn current(&self) -> Result<VersionRecord> {
        let path = self.layout.version_file();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return self.initialize(&self.tool_version);
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed reading version record: {}", path.display())
                });
            }
        };

        let mut record: VersionRecord = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing version record: {}", path.display()))?;
        validate_components(&mut record)?;
        Ok(record)
    }

    pub fn check_upgrade(&self, latest: &str) -> Result<UpgradeCheck> {
        let record = self.current()?;
        let current = record.template_version;

        let (available, change) = match (
            Version::parse(&current),
            Version::parse(latest),
        ) {
            (Ok(installed), Ok(candidate)) => {
                if candidate > installed {
                    let change = if candidate.major != installed.major {
                        ChangeKind::Major
                    } else if candidate.minor != installed.minor {
                        ChangeKind::Minor
                    } else {
                        ChangeKind::Patch
                    };
                    (true, change)
                } else {
                    (false, ChangeKind::None)
                }
            }
            _ => (false, ChangeKind::Unknown),
        };

        Ok(UpgradeCheck {
            available,
            current,
            latest: latest.to_string(),
            change,
        })
    }

    pub fn record_upgrade(
        &self,
        new_version: &str,
        component_overrides: Option<&BTreeMap<String, String>>,
    ) -> Result<VersionRecord> {
        let mut record = self.current()?;
        record.tool_version = self.tool_version.clone();
        record.template_version = new_version.to_string();
        record.last_upgrade_at_unix = Some(current_unix_timestamp());

        for component in Component::ALL {
            let key = component.as_str();
            let value = component_overrides
                .and_then(|overrides| overrides.get(key).cloned())
                .unwrap_or_else(|| new_version.to_string());
            record.components.insert(key.to_string(), value);
        }

        self.save(&record)?;
        self.append_history(HistoryEntry {
            version: new_version.to_string(),
            timestamp_unix: current_unix_timestamp(),
            kind: HistoryEntryKind::Upgrade,
        })?;
        Ok(record)
    }

    pub fn rollback(&self, previous_version: &str) -> Result<VersionRecord> {
        let mut record = self.current()?;
        record.template_version = previous_version.to_string();
        for component in Component::ALL {
            record
                .components
                .insert(component.as_str().to_string(), previous_version.to_string());
        }

        self.save(&record)?;
        self.append_history(HistoryEntry {
            version: previous_version.to_string(),
            timestamp_unix: current_unix_timestamp(),
            kind: HistoryEntryKind::Rollback,
        })?;
        Ok(record)
    }

    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        let path = self.layout.history_file();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading history: {}", path.display()));
            }
        };

        serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing history: {}", path.display()))
    }

    fn append_history(&self, entry: HistoryEntry) -> Result<()> {
        let mut entries = self.history()?;
        entries.push(entry);
        while entries.len() > HISTORY_LIMIT {
            entries.remove(0);
        }

        let path = self.layout.history_file();
        let content = serde_json::to_string_pretty(&entries)
            .with_context(|| format!("failed serializing history: {}", path.display()))?;
        fs::write(&path, content)
            .with_context(|| format!("failed writing history: {}", path.display()))
    }

    fn save(&self, record: &VersionRecord) -> Result<()> {
        self.layout.ensure_base_dirs()?;
        let path = self.layout.version_file();
        let content = serde_json::to_string_pretty(record)
            .with_context(|| format!("failed serializing version record: {}", path.display()))?;
        fs::write(&path, content)
            .with_context(|| format!("failed writing version record: {}", path.display()))
    }
}

fn validate_components(record: &mut VersionRecord) -> Result<()> {
    for key in record.components.keys() {
        Component::parse(key)
            .with_context(|| format!("version record carries unknown component '{key}'"))?;
    }

    // The component set is closed: missing keys are backfilled, never left absent.
    let fallback = record.template_version.clone();
    for component in Component::ALL {
        record
            .components
            .entry(component.as_str().to_string())
            .or_insert_with(|| fallback.clone());
    }
    Ok(())
}

fn state_file_version() -> u32 {
    STATE_FILE_VERSION
}
