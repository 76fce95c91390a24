use stencil_backup::{BackupChecks, BackupOutcome, BackupSet};
use stencil_fetch::CacheInfo;
use stencil_state::UpgradeCheck;

use crate::flows::{
    ApplyReport, ApplyStatus, HistoryView, InitReport, PreviewReport, RollbackOutcome,
    StatusReport,
};

pub fn format_init_lines(report: &InitReport) -> Vec<String> {
    let mut lines = vec![format!("initialized at template version {}", report.version)];
    for component in &report.installed {
        lines.push(format!("  installed: {}", component.dir_name()));
    }
    for component in &report.missing {
        lines.push(format!("  not provided by upstream: {}", component.dir_name()));
    }
    lines.push(format!("tracking {} files", report.tracked));
    lines
}

pub fn format_check_lines(check: &UpgradeCheck) -> Vec<String> {
    if check.available {
        vec![format!(
            "upgrade available: {} -> {} ({})",
            check.current,
            check.latest,
            check.change.as_str()
        )]
    } else {
        vec![format!(
            "up to date: {} (latest {})",
            check.current, check.latest
        )]
    }
}

pub fn format_preview_lines(report: &PreviewReport, verbose: bool) -> Vec<String> {
    let mut lines = format_check_lines(&report.check);
    let merges = count_action(report, "merge");
    let overwrites = count_action(report, "overwrite");
    let adds = count_action(report, "add");
    let preserved = count_action(report, "preserve");
    lines.push(format!(
        "plan: {} overwrite, {} merge, {} add, {} preserve",
        overwrites, merges, adds, preserved
    ));
    if verbose {
        for (path, action) in &report.actions {
            lines.push(format!("  {:<9} {}", action.as_str(), path));
        }
    }
    lines
}

pub fn format_apply_lines(report: &ApplyReport, verbose: bool) -> Vec<String> {
    let mut lines = Vec::new();
    match report.status {
        ApplyStatus::NoUpgrade => {
            lines.push(format!(
                "nothing to apply: {} is current (latest {})",
                report.from_version, report.to_version
            ));
            return lines;
        }
        ApplyStatus::Committed => {
            lines.push(format!(
                "upgraded {} -> {}",
                report.from_version, report.to_version
            ));
        }
        ApplyStatus::ConflictsPending => {
            lines.push(format!(
                "upgrade {} -> {} stopped: {} conflicted file(s)",
                report.from_version,
                report.to_version,
                report.conflicts.len()
            ));
            for path in &report.conflicts {
                lines.push(format!("  conflict: {path}"));
            }
        }
        ApplyStatus::RolledBack => {
            lines.push(format!(
                "upgrade {} -> {} rolled back",
                report.from_version, report.to_version
            ));
        }
    }

    if let Some(backup) = &report.backup {
        lines.push(format!("backup: {backup}"));
    }
    if let Some(detail) = &report.detail {
        lines.push(detail.clone());
    }
    if verbose {
        for (path, action) in &report.actions {
            lines.push(format!("  {:<9} {}", action.as_str(), path));
        }
    }
    lines
}

pub fn format_rollback_lines(outcome: &RollbackOutcome) -> Vec<String> {
    let mut lines = vec![format!(
        "restored backup {} (template version {})",
        outcome.backup, outcome.reverted_to
    )];
    for path in &outcome.restored {
        lines.push(format!("  restored: {path}"));
    }
    lines
}

pub fn format_history_lines(view: &HistoryView) -> Vec<String> {
    let mut lines = Vec::new();
    if view.entries.is_empty() {
        lines.push("no upgrade history".to_string());
    } else {
        for entry in &view.entries {
            lines.push(format!(
                "{} {} at {}",
                entry.kind.as_str(),
                entry.version,
                entry.timestamp_unix
            ));
        }
    }
    if !view.backups.is_empty() {
        lines.push(format!("backups: {}", view.backups.len()));
        for set in &view.backups {
            lines.push(format!("  {} ({})", set.name, set.tool_version));
        }
    }
    lines
}

pub fn format_status_lines(report: &StatusReport, verbose: bool) -> Vec<String> {
    let mut lines = vec![format!(
        "template version {} (tool {})",
        report.record.template_version, report.record.tool_version
    )];
    for (component, version) in &report.record.components {
        lines.push(format!("  {component}: {version}"));
    }

    let customizations = &report.customizations;
    lines.push(format!(
        "customizations: {} modified, {} user-created, {} preserved, {} untracked",
        customizations.modified.len(),
        customizations.user_created.len(),
        customizations.preserved.len(),
        customizations.untracked.len()
    ));
    if verbose {
        for path in &customizations.modified {
            lines.push(format!("  modified: {path}"));
        }
        for path in &customizations.user_created {
            lines.push(format!("  user-created: {path}"));
        }
        for path in &customizations.preserved {
            lines.push(format!("  preserved: {path}"));
        }
        for path in &customizations.untracked {
            lines.push(format!("  untracked: {path}"));
        }
    }
    lines
}

pub fn format_backup_create_lines(outcome: &BackupOutcome) -> Vec<String> {
    let mut lines = vec![format!(
        "created backup {} covering {} path(s)",
        outcome.set.name,
        outcome.set.paths.len()
    )];
    for path in &outcome.skipped {
        lines.push(format!("  skipped missing path: {path}"));
    }
    lines
}

pub fn format_backup_list_lines(sets: &[BackupSet]) -> Vec<String> {
    if sets.is_empty() {
        return vec!["no backups".to_string()];
    }
    sets.iter()
        .map(|set| {
            format!(
                "{} created {} ({} path(s), template version {})",
                set.name,
                set.created_at_unix,
                set.paths.len(),
                set.tool_version
            )
        })
        .collect()
}

pub fn format_backup_verify_lines(name: &str, checks: &BackupChecks) -> Vec<String> {
    vec![
        format!("backup {}: {}", name, if checks.ok() { "ok" } else { "broken" }),
        format!("  archive present: {}", checks.archive_exists),
        format!("  archive non-empty: {}", checks.archive_non_empty),
        format!("  metadata present: {}", checks.metadata_exists),
        format!("  metadata parses: {}", checks.metadata_parses),
    ]
}

pub fn format_cache_info_lines(info: &CacheInfo) -> Vec<String> {
    let mut lines = vec![format!(
        "cache: {} entries, {} bytes",
        info.entries.len(),
        info.total_bytes
    )];
    for entry in &info.entries {
        lines.push(format!(
            "  {}/{}: {} bytes, {}s old",
            entry.origin_kind, entry.version, entry.bytes, entry.age_secs
        ));
    }
    lines
}

fn count_action(report: &PreviewReport, wanted: &str) -> usize {
    report
        .actions
        .iter()
        .filter(|(_, action)| action.as_str() == wanted)
        .count()
}
