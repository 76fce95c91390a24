use std::collections::BTreeMap;
use std::fs;
use std::io;

use anyhow::{anyhow, Context, Result};
use stencil_backup::{BackupSet, BackupStore};
use stencil_core::{
    collect_relative_file_paths, copy_dir_recursive, fingerprint_bytes, normalize_relative_path,
    Component, ProjectLayout,
};
use stencil_fetch::{FetchResult, Fetcher, TemplateOrigin};
use stencil_merge::{merge, MergeStrategy};
use stencil_state::{CustomizationReport, CustomizationTracker, HistoryEntry, UpgradeCheck, VersionRecord, VersionRegistry};

use crate::config::ProjectConfig;

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStage {
    Idle,
    CheckingVersion,
    DetectingCustomizations,
    BackingUp,
    Fetching,
    Merging,
    Validating,
    Committed,
    RolledBack,
}

impl UpgradeStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckingVersion => "checking-version",
            Self::DetectingCustomizations => "detecting-customizations",
            Self::BackingUp => "backing-up",
            Self::Fetching => "fetching",
            Self::Merging => "merging",
            Self::Validating => "validating",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    Overwrite,
    Merge,
    Preserve,
    Add,
}

impl PlannedAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overwrite => "overwrite",
            Self::Merge => "merge",
            Self::Preserve => "preserve",
            Self::Add => "add",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewReport {
    pub check: UpgradeCheck,
    pub actions: Vec<(String, PlannedAction)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    NoUpgrade,
    Committed,
    ConflictsPending,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub stage: UpgradeStage,
    pub status: ApplyStatus,
    pub from_version: String,
    pub to_version: String,
    pub backup: Option<String>,
    pub actions: Vec<(String, PlannedAction)>,
    pub conflicts: Vec<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub component: Option<Component>,
    pub auto: bool,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub backup: String,
    pub reverted_to: String,
    pub restored: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryView {
    pub entries: Vec<HistoryEntry>,
    pub backups: Vec<BackupSet>,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub record: VersionRecord,
    pub customizations: CustomizationReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub version: String,
    pub installed: Vec<Component>,
    pub missing: Vec<Component>,
    pub tracked: usize,
}

/// Sets up a fresh project: configuration, an initial component tree from
/// the origin, the version record, and tracker baselines for every file.
pub fn init(
    layout: &ProjectLayout,
    origin: &TemplateOrigin,
    template_version: &str,
) -> Result<InitReport> {
    if layout.config_file().exists() {
        anyhow::bail!(
            "already-initialized: configuration exists: {}",
            layout.config_file().display()
        );
    }
    layout.ensure_base_dirs()?;
    ProjectConfig::for_origin(origin).save(layout)?;

    let fetcher = Fetcher::new(layout.clone(), origin.clone());
    let fetched = fetcher.fetch(template_version)?;
    let (found, missing) = fetcher.extract_components(&fetched.local_path, &[]);
    for (component, upstream_dir) in &found {
        copy_dir_recursive(upstream_dir, &layout.component_dir(*component))?;
    }

    let registry = VersionRegistry::new(layout.clone(), TOOL_VERSION);
    let record = registry.initialize(&fetched.resolved_version)?;
    let tracker = CustomizationTracker::new(layout.clone());
    let tracked = tracker.track_tree()?;

    Ok(InitReport {
        version: record.template_version,
        installed: found.keys().copied().collect(),
        missing,
        tracked,
    })
}

pub struct Orchestrator {
    layout: ProjectLayout,
    config: ProjectConfig,
}

impl Orchestrator {
    pub fn open(layout: ProjectLayout) -> Result<Self> {
        let config = ProjectConfig::load(&layout)?;
        Ok(Self { layout, config })
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    fn registry(&self) -> VersionRegistry {
        VersionRegistry::new(self.layout.clone(), TOOL_VERSION)
    }

    fn tracker(&self) -> CustomizationTracker {
        CustomizationTracker::new(self.layout.clone())
    }

    fn backup_store(&self) -> BackupStore {
        BackupStore::new(self.layout.clone())
    }

    fn fetcher(&self) -> Result<Fetcher> {
        Ok(Fetcher::new(self.layout.clone(), self.config.origin()?))
    }

    pub fn check(&self) -> Result<UpgradeCheck> {
        let latest = self.fetcher()?.resolve_latest()?;
        self.registry().check_upgrade(&latest)
    }

    /// Read-only upgrade plan: what each upstream file would get. The fetch
    /// cache may be populated, nothing in the project is touched.
    pub fn preview(&self) -> Result<PreviewReport> {
        let fetcher = self.fetcher()?;
        let latest = fetcher.resolve_latest()?;
        let check = self.registry().check_upgrade(&latest)?;
        let target = fetcher.fetch(&latest)?;
        let tracker = self.tracker();

        let mut actions = Vec::new();
        let (found, _) = fetcher.extract_components(&target.local_path, &[]);
        for (component, upstream_dir) in &found {
            for relative in collect_relative_file_paths(upstream_dir)? {
                let key = file_key(*component, &relative);
                let action = if tracker.matches_preserve(&key)? {
                    PlannedAction::Preserve
                } else if !self.layout.root().join(&key).exists() {
                    PlannedAction::Add
                } else if tracker.is_customized(&key)? {
                    PlannedAction::Merge
                } else {
                    PlannedAction::Overwrite
                };
                actions.push((key, action));
            }
        }

        Ok(PreviewReport { check, actions })
    }

    /// The full upgrade chain. State is only committed at the very end;
    /// every earlier exit leaves the registry and tracker untouched.
    pub fn apply(&self, options: &ApplyOptions) -> Result<ApplyReport> {
        let fetcher = self.fetcher()?;
        let registry = self.registry();
        let tracker = self.tracker();

        let latest = fetcher.resolve_latest()?;
        let check = registry.check_upgrade(&latest)?;
        if !check.available && !options.force {
            return Ok(ApplyReport {
                stage: UpgradeStage::CheckingVersion,
                status: ApplyStatus::NoUpgrade,
                from_version: check.current,
                to_version: check.latest,
                backup: None,
                actions: Vec::new(),
                conflicts: Vec::new(),
                detail: None,
            });
        }

        let record = registry.current()?;
        let from_version = record.template_version.clone();

        let backup = self
            .backup_store()
            .create("pre-upgrade", &[], &from_version)
            .context("upgrade aborted before any mutation")?;

        let target = fetcher.fetch(&latest)?;
        let baseline = fetcher.fetch(&from_version).ok();

        let strategy = if options.auto {
            MergeStrategy::Auto
        } else {
            self.config.merge_strategy()?
        };

        let requested: Vec<Component> = match options.component {
            Some(component) => vec![component],
            None => Component::ALL.to_vec(),
        };
        let (found, _) = fetcher.extract_components(&target.local_path, &requested);

        let mut actions = Vec::new();
        let mut conflicts = Vec::new();
        let mut committed_baselines: Vec<(String, Vec<u8>)> = Vec::new();

        for (component, upstream_dir) in &found {
            for relative in collect_relative_file_paths(upstream_dir)? {
                let key = file_key(*component, &relative);
                if tracker.matches_preserve(&key)? {
                    actions.push((key, PlannedAction::Preserve));
                    continue;
                }

                let source = upstream_dir.join(&relative);
                let theirs = fs::read(&source)
                    .with_context(|| format!("failed reading upstream {}", source.display()))?;
                let destination = self.layout.root().join(&key);
                let existing = read_file_if_exists(&destination)?;

                if !tracker.is_customized(&key)? {
                    if self.is_local_resolution(
                        baseline.as_ref(),
                        &key,
                        existing.as_deref(),
                        &theirs,
                    )? {
                        // Accepted resolution; the file keeps its content and
                        // only its baseline moves to upstream at commit.
                        actions.push((key.clone(), PlannedAction::Merge));
                        committed_baselines.push((key, theirs));
                        continue;
                    }
                    let action = if existing.is_some() {
                        PlannedAction::Overwrite
                    } else {
                        PlannedAction::Add
                    };
                    write_file(&destination, &theirs)?;
                    actions.push((key.clone(), action));
                    committed_baselines.push((key, theirs));
                    continue;
                }

                let ours = existing.unwrap_or_default();
                let base = self.baseline_content(baseline.as_ref(), &key, &ours)?;
                let outcome = merge(&base, &ours, &theirs, strategy);
                if let Some(text) = outcome.merged_text() {
                    write_file(&destination, text.as_bytes())?;
                }
                actions.push((key.clone(), PlannedAction::Merge));
                if outcome.is_conflicted() {
                    conflicts.push(key);
                } else {
                    committed_baselines.push((key, theirs));
                }
            }
        }

        if !conflicts.is_empty() {
            return Ok(ApplyReport {
                stage: UpgradeStage::Merging,
                status: ApplyStatus::ConflictsPending,
                from_version,
                to_version: target.resolved_version,
                backup: Some(backup.set.name),
                actions,
                conflicts,
                detail: Some(
                    "resolve each file, run 'stencil resolve <path>', then re-run apply"
                        .to_string(),
                ),
            });
        }

        let missing_after_merge: Vec<&Component> = found
            .keys()
            .filter(|component| !self.layout.component_dir(**component).is_dir())
            .collect();
        if let Some(component) = missing_after_merge.first() {
            let restore = self.backup_store().restore(&backup.set.name)?;
            if !restore.ok() {
                anyhow::bail!(
                    "restore-failed: rollback after failed validation left paths behind: {:?}",
                    restore.failed
                );
            }
            return Ok(ApplyReport {
                stage: UpgradeStage::Validating,
                status: ApplyStatus::RolledBack,
                from_version,
                to_version: target.resolved_version,
                backup: Some(backup.set.name),
                actions,
                conflicts: Vec::new(),
                detail: Some(format!(
                    "validation-failed: component directory missing after merge: {}",
                    component.dir_name()
                )),
            });
        }

        // Components the upstream never delivered (or a --component filter
        // excluded) keep their previously recorded versions.
        let retained: BTreeMap<String, String> = Component::ALL
            .iter()
            .filter(|component| !found.contains_key(*component))
            .map(|component| {
                let version = record
                    .components
                    .get(component.as_str())
                    .cloned()
                    .unwrap_or_else(|| from_version.clone());
                (component.as_str().to_string(), version)
            })
            .collect();
        registry.record_upgrade(
            &target.resolved_version,
            if retained.is_empty() {
                None
            } else {
                Some(&retained)
            },
        )?;
        for (key, content) in &committed_baselines {
            if tracker.tracked_entry(key)?.is_some() {
                tracker.set_baseline(key, content)?;
            } else {
                tracker.track(key, content)?;
            }
        }

        Ok(ApplyReport {
            stage: UpgradeStage::Committed,
            status: ApplyStatus::Committed,
            from_version,
            to_version: target.resolved_version,
            backup: Some(backup.set.name),
            actions,
            conflicts: Vec::new(),
            detail: None,
        })
    }

    pub fn rollback(&self, name: Option<&str>) -> Result<RollbackOutcome> {
        let store = self.backup_store();
        let set = match name {
            Some(name) => store.read_metadata(name)?,
            None => store
                .latest()?
                .ok_or_else(|| anyhow!("restore-failed: no backups recorded"))?,
        };

        let checks = store.verify(&set.name);
        if !checks.ok() {
            anyhow::bail!(
                "restore-failed: backup '{}' fails verification (archive: {}, metadata: {})",
                set.name,
                checks.archive_exists && checks.archive_non_empty,
                checks.metadata_exists && checks.metadata_parses
            );
        }

        let report = store.restore(&set.name)?;
        if !report.ok() {
            let reasons: Vec<String> = report
                .failed
                .iter()
                .map(|(path, reason)| format!("{path}: {reason}"))
                .collect();
            anyhow::bail!(
                "restore-failed: backup '{}' restored partially: {}",
                set.name,
                reasons.join("; ")
            );
        }

        self.registry().rollback(&set.tool_version)?;
        self.tracker().rebaseline_paths(&report.restored)?;
        Ok(RollbackOutcome {
            backup: set.name,
            reverted_to: set.tool_version,
            restored: report.restored,
        })
    }

    pub fn history(&self) -> Result<HistoryView> {
        let mut entries = self.registry().history()?;
        entries.reverse();
        Ok(HistoryView {
            entries,
            backups: self.backup_store().list()?,
        })
    }

    /// Marks a conflicted file as resolved by accepting its present content
    /// as the new baseline. Re-running apply afterwards commits the upgrade.
    pub fn resolve(&self, path: &str) -> Result<()> {
        self.tracker().mark_as_original(path)
    }

    pub fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport {
            record: self.registry().current()?,
            customizations: self.tracker().detect_all()?,
        })
    }

    pub fn create_backup(&self, label: &str) -> Result<stencil_backup::BackupOutcome> {
        let record = self.registry().current()?;
        self.backup_store().create(label, &[], &record.template_version)
    }

    pub fn list_backups(&self) -> Result<Vec<BackupSet>> {
        self.backup_store().list()
    }

    pub fn verify_backup(&self, name: &str) -> stencil_backup::BackupChecks {
        self.backup_store().verify(name)
    }

    pub fn prune_backups(&self, keep: usize) -> Result<usize> {
        self.backup_store().prune(keep)
    }

    pub fn cache_info(&self) -> Result<stencil_fetch::CacheInfo> {
        self.fetcher()?.cache_info()
    }

    pub fn clear_cache(&self) -> Result<usize> {
        self.fetcher()?.clear_cache()
    }

    /// Baseline bytes for a three-way merge. When the installed version's
    /// tree is unobtainable the file's own content stands in, so upstream's
    /// delta applies cleanly and genuine overlap still surfaces.
    fn baseline_content(
        &self,
        baseline: Option<&FetchResult>,
        key: &str,
        ours: &[u8],
    ) -> Result<Vec<u8>> {
        Ok(self
            .baseline_file(baseline, key)?
            .unwrap_or_else(|| ours.to_vec()))
    }

    fn baseline_file(&self, baseline: Option<&FetchResult>, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(fetched) = baseline {
            let path = fetched.local_path.join(key);
            if path.is_file() {
                return fs::read(&path)
                    .with_context(|| format!("failed reading baseline {}", path.display()))
                    .map(Some);
            }
        }
        Ok(None)
    }

    /// An unmodified tracked file carries its recorded baseline on disk. If
    /// that baseline does not match the installed version's upstream content
    /// the operator moved it there deliberately (an accepted conflict
    /// resolution), and a plain overwrite would destroy it.
    fn is_local_resolution(
        &self,
        baseline: Option<&FetchResult>,
        key: &str,
        existing: Option<&[u8]>,
        theirs: &[u8],
    ) -> Result<bool> {
        let Some(disk) = existing else {
            return Ok(false);
        };
        if disk == theirs {
            return Ok(false);
        }
        if self.tracker().tracked_entry(key)?.is_none() {
            return Ok(false);
        }
        let Some(base) = self.baseline_file(baseline, key)? else {
            return Ok(false);
        };
        Ok(fingerprint_bytes(disk) != fingerprint_bytes(&base))
    }
}

fn file_key(component: Component, relative: &std::path::Path) -> String {
    format!(
        "{}/{}",
        component.dir_name(),
        normalize_relative_path(relative)
    )
}

fn write_file(destination: &std::path::Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    fs::write(destination, content)
        .with_context(|| format!("failed writing {}", destination.display()))
}

/// Absent files are legitimate (a deletion is a customization); every other
/// read failure propagates.
fn read_file_if_exists(path: &std::path::Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed reading {}", path.display())),
    }
}
