use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use stencil_core::{Component, ProjectLayout};

use crate::flows::{self, ApplyOptions, ApplyStatus, Orchestrator, PlannedAction, UpgradeStage};
use stencil_fetch::TemplateOrigin;
use stencil_state::HistoryEntryKind;

#[test]
fn init_installs_components_and_tracks_files() {
    let (root, layout, origin) = test_project("init");
    write_upstream(&root, "1.0.0");

    let report = flows::init(&layout, &origin, "latest").expect("must init");
    assert_eq!(report.version, "1.0.0");
    assert!(report.installed.contains(&Component::Rules));
    assert!(report.installed.contains(&Component::Templates));
    assert!(report.missing.contains(&Component::Workflows));
    assert_eq!(report.tracked, 2);
    assert!(layout.config_file().is_file());
    assert_eq!(
        read_project(&layout, "rules/guide.md"),
        "alpha\nbeta\ngamma\n"
    );

    let err = flows::init(&layout, &origin, "latest").expect_err("must refuse re-init");
    assert!(err.to_string().contains("already-initialized"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn apply_without_customizations_commits() {
    let (root, layout, origin) = test_project("apply-clean");
    write_upstream(&root, "1.0.0");
    flows::init(&layout, &origin, "latest").expect("must init");
    write_upstream_file(&root, "rules/guide.md", "alpha\nbeta two\ngamma\n");
    bump_upstream(&root, "1.1.0");

    let orchestrator = Orchestrator::open(layout.clone()).expect("must open");
    let report = orchestrator
        .apply(&ApplyOptions::default())
        .expect("must apply");
    assert_eq!(report.status, ApplyStatus::Committed);
    assert_eq!(report.stage, UpgradeStage::Committed);
    assert_eq!(report.from_version, "1.0.0");
    assert_eq!(report.to_version, "1.1.0");
    assert!(report.backup.is_some());
    assert_eq!(
        read_project(&layout, "rules/guide.md"),
        "alpha\nbeta two\ngamma\n"
    );

    let status = orchestrator.status().expect("must read status");
    assert_eq!(status.record.template_version, "1.1.0");
    assert!(status.customizations.modified.is_empty());

    let check = orchestrator.check().expect("must check");
    assert!(!check.available);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn apply_merges_around_a_local_addition() {
    let (root, layout, origin) = test_project("apply-merge");
    write_upstream(&root, "1.0.0");
    flows::init(&layout, &origin, "latest").expect("must init");

    write_project_file(&layout, "rules/guide.md", "alpha\nbeta\ngamma\ndelta-local\n");
    write_upstream_file(&root, "rules/guide.md", "alpha\nbeta two\ngamma\n");
    bump_upstream(&root, "1.1.0");

    let orchestrator = Orchestrator::open(layout.clone()).expect("must open");
    let report = orchestrator
        .apply(&ApplyOptions::default())
        .expect("must apply");
    assert_eq!(report.status, ApplyStatus::Committed);
    assert_eq!(
        read_project(&layout, "rules/guide.md"),
        "alpha\nbeta two\ngamma\ndelta-local\n"
    );
    assert!(report
        .actions
        .contains(&("rules/guide.md".to_string(), PlannedAction::Merge)));

    // The local addition stays visible as a customization after commit.
    let status = orchestrator.status().expect("must read status");
    assert_eq!(status.customizations.modified, vec!["rules/guide.md"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn conflicting_edits_stop_before_commit_and_resolve_unblocks() {
    let (root, layout, origin) = test_project("apply-conflict");
    write_upstream(&root, "1.0.0");
    flows::init(&layout, &origin, "latest").expect("must init");

    write_project_file(&layout, "rules/guide.md", "alpha\nbeta local\ngamma\n");
    write_upstream_file(&root, "rules/guide.md", "alpha\nbeta two\ngamma\n");
    bump_upstream(&root, "1.1.0");

    let orchestrator = Orchestrator::open(layout.clone()).expect("must open");
    let report = orchestrator
        .apply(&ApplyOptions::default())
        .expect("apply must run");
    assert_eq!(report.status, ApplyStatus::ConflictsPending);
    assert_eq!(report.stage, UpgradeStage::Merging);
    assert_eq!(report.conflicts, vec!["rules/guide.md"]);
    assert!(read_project(&layout, "rules/guide.md").contains("<<<<<<< ours"));

    // Registry untouched while conflicts are pending.
    let status = orchestrator.status().expect("must read status");
    assert_eq!(status.record.template_version, "1.0.0");

    // Operator resolves, then re-runs apply to commit.
    write_project_file(&layout, "rules/guide.md", "alpha\nbeta two\ngamma\n");
    orchestrator
        .resolve("rules/guide.md")
        .expect("must resolve");
    let report = orchestrator
        .apply(&ApplyOptions::default())
        .expect("must apply");
    assert_eq!(report.status, ApplyStatus::Committed);
    let status = orchestrator.status().expect("must read status");
    assert_eq!(status.record.template_version, "1.1.0");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn resolution_mixing_both_sides_survives_the_committing_reapply() {
    let (root, layout, origin) = test_project("apply-resolution");
    write_upstream(&root, "1.0.0");
    flows::init(&layout, &origin, "latest").expect("must init");

    write_project_file(&layout, "rules/guide.md", "alpha\nbeta local\ngamma\n");
    write_upstream_file(&root, "rules/guide.md", "alpha\nbeta two\ngamma\n");
    bump_upstream(&root, "1.1.0");

    let orchestrator = Orchestrator::open(layout.clone()).expect("must open");
    let report = orchestrator
        .apply(&ApplyOptions::default())
        .expect("apply must run");
    assert_eq!(report.status, ApplyStatus::ConflictsPending);

    // The resolution keeps parts of both sides; the commit must not replace
    // it with raw upstream content.
    write_project_file(&layout, "rules/guide.md", "alpha\nbeta local and two\ngamma\n");
    orchestrator
        .resolve("rules/guide.md")
        .expect("must resolve");

    let report = orchestrator
        .apply(&ApplyOptions::default())
        .expect("must apply");
    assert_eq!(report.status, ApplyStatus::Committed);
    assert_eq!(
        read_project(&layout, "rules/guide.md"),
        "alpha\nbeta local and two\ngamma\n"
    );

    // Baseline moved to upstream, so the divergence stays visible.
    let status = orchestrator.status().expect("must read status");
    assert_eq!(status.record.template_version, "1.1.0");
    assert_eq!(status.customizations.modified, vec!["rules/guide.md"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn component_filter_leaves_other_components_recorded_as_installed() {
    let (root, layout, origin) = test_project("apply-component");
    write_upstream(&root, "1.0.0");
    flows::init(&layout, &origin, "latest").expect("must init");

    write_upstream_file(&root, "rules/guide.md", "alpha\nbeta two\ngamma\n");
    write_upstream_file(&root, "templates/doc.md", "doc body v2\n");
    bump_upstream(&root, "1.1.0");

    let orchestrator = Orchestrator::open(layout.clone()).expect("must open");
    let options = ApplyOptions {
        component: Some(Component::Rules),
        ..ApplyOptions::default()
    };
    let report = orchestrator.apply(&options).expect("must apply");
    assert_eq!(report.status, ApplyStatus::Committed);

    assert_eq!(
        read_project(&layout, "rules/guide.md"),
        "alpha\nbeta two\ngamma\n"
    );
    // Templates were excluded: untouched on disk, still recorded at 1.0.0.
    assert_eq!(read_project(&layout, "templates/doc.md"), "doc body\n");
    let status = orchestrator.status().expect("must read status");
    assert_eq!(status.record.template_version, "1.1.0");
    assert_eq!(
        status.record.components.get("rules").map(String::as_str),
        Some("1.1.0")
    );
    assert_eq!(
        status.record.components.get("templates").map(String::as_str),
        Some("1.0.0")
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn failed_validation_rolls_the_tree_back() {
    let (root, layout, origin) = test_project("apply-validation");
    write_upstream(&root, "1.0.0");
    flows::init(&layout, &origin, "latest").expect("must init");

    // Upstream now delivers a component whose only file is preserve-matched
    // and which has no local directory, so nothing materializes it.
    stencil_state::CustomizationTracker::new(layout.clone())
        .add_preserve_pattern("workflows/*")
        .expect("must add pattern");
    write_upstream_file(&root, "workflows/ci.yml", "steps: []\n");
    write_upstream_file(&root, "rules/guide.md", "alpha\nbeta two\ngamma\n");
    bump_upstream(&root, "1.1.0");

    let orchestrator = Orchestrator::open(layout.clone()).expect("must open");
    let report = orchestrator
        .apply(&ApplyOptions::default())
        .expect("apply must run");
    assert_eq!(report.status, ApplyStatus::RolledBack);
    assert_eq!(report.stage, UpgradeStage::Validating);
    assert!(report
        .detail
        .as_deref()
        .expect("detail present")
        .contains("validation-failed"));

    // The restore put the pre-apply tree back byte for byte.
    assert_eq!(
        read_project(&layout, "rules/guide.md"),
        "alpha\nbeta\ngamma\n"
    );
    assert_eq!(read_project(&layout, "templates/doc.md"), "doc body\n");

    // Registry untouched.
    let status = orchestrator.status().expect("must read status");
    assert_eq!(status.record.template_version, "1.0.0");
    assert!(status.customizations.modified.is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn deleted_managed_file_conflicts_with_upstream_edit() {
    let (root, layout, origin) = test_project("apply-deleted");
    write_upstream(&root, "1.0.0");
    flows::init(&layout, &origin, "latest").expect("must init");

    fs::remove_file(layout.root().join("rules/guide.md")).expect("must delete");
    write_upstream_file(&root, "rules/guide.md", "alpha\nbeta two\ngamma\n");
    bump_upstream(&root, "1.1.0");

    let orchestrator = Orchestrator::open(layout.clone()).expect("must open");
    let report = orchestrator
        .apply(&ApplyOptions::default())
        .expect("apply must run");
    assert_eq!(report.status, ApplyStatus::ConflictsPending);
    assert_eq!(report.conflicts, vec!["rules/guide.md"]);
    assert!(read_project(&layout, "rules/guide.md").contains("<<<<<<< ours"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn preserve_patterns_shield_files_from_upstream() {
    let (root, layout, origin) = test_project("apply-preserve");
    write_upstream(&root, "1.0.0");
    flows::init(&layout, &origin, "latest").expect("must init");

    stencil_state::CustomizationTracker::new(layout.clone())
        .add_preserve_pattern("rules/custom-*")
        .expect("must add pattern");
    write_project_file(&layout, "rules/custom-note.md", "mine\n");
    write_upstream_file(&root, "rules/custom-note.md", "upstream\n");
    bump_upstream(&root, "1.1.0");

    let orchestrator = Orchestrator::open(layout.clone()).expect("must open");
    let report = orchestrator
        .apply(&ApplyOptions::default())
        .expect("must apply");
    assert_eq!(report.status, ApplyStatus::Committed);
    assert!(report
        .actions
        .contains(&("rules/custom-note.md".to_string(), PlannedAction::Preserve)));
    assert_eq!(read_project(&layout, "rules/custom-note.md"), "mine\n");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn rollback_restores_the_pre_upgrade_tree() {
    let (root, layout, origin) = test_project("rollback");
    write_upstream(&root, "1.0.0");
    flows::init(&layout, &origin, "latest").expect("must init");
    write_upstream_file(&root, "rules/guide.md", "alpha\nbeta two\ngamma\n");
    bump_upstream(&root, "1.1.0");

    let orchestrator = Orchestrator::open(layout.clone()).expect("must open");
    let report = orchestrator
        .apply(&ApplyOptions::default())
        .expect("must apply");
    assert_eq!(report.status, ApplyStatus::Committed);

    let outcome = orchestrator.rollback(None).expect("must roll back");
    assert_eq!(outcome.reverted_to, "1.0.0");
    assert_eq!(
        read_project(&layout, "rules/guide.md"),
        "alpha\nbeta\ngamma\n"
    );

    let status = orchestrator.status().expect("must read status");
    assert_eq!(status.record.template_version, "1.0.0");
    // Baselines follow the restored tree; nothing reads as modified.
    assert!(status.customizations.modified.is_empty());

    let view = orchestrator.history().expect("must read history");
    assert_eq!(view.entries.len(), 2);
    assert_eq!(view.entries[0].kind, HistoryEntryKind::Rollback);
    assert_eq!(view.entries[1].kind, HistoryEntryKind::Upgrade);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn preview_plans_without_touching_the_project() {
    let (root, layout, origin) = test_project("preview");
    write_upstream(&root, "1.0.0");
    flows::init(&layout, &origin, "latest").expect("must init");

    write_project_file(&layout, "rules/guide.md", "alpha\nbeta local\ngamma\n");
    write_upstream_file(&root, "rules/guide.md", "alpha\nbeta two\ngamma\n");
    write_upstream_file(&root, "rules/fresh.md", "new upstream file\n");
    bump_upstream(&root, "1.1.0");

    let orchestrator = Orchestrator::open(layout.clone()).expect("must open");
    let report = orchestrator.preview().expect("must preview");
    assert!(report.check.available);
    assert!(report
        .actions
        .contains(&("rules/guide.md".to_string(), PlannedAction::Merge)));
    assert!(report
        .actions
        .contains(&("rules/fresh.md".to_string(), PlannedAction::Add)));
    assert!(report
        .actions
        .contains(&("templates/doc.md".to_string(), PlannedAction::Overwrite)));

    assert_eq!(
        read_project(&layout, "rules/guide.md"),
        "alpha\nbeta local\ngamma\n"
    );
    assert!(!layout.root().join("rules/fresh.md").exists());
    let status = orchestrator.status().expect("must read status");
    assert_eq!(status.record.template_version, "1.0.0");
    assert!(orchestrator.list_backups().expect("must list").is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn apply_reports_no_upgrade_when_current() {
    let (root, layout, origin) = test_project("no-upgrade");
    write_upstream(&root, "1.0.0");
    flows::init(&layout, &origin, "latest").expect("must init");

    let orchestrator = Orchestrator::open(layout.clone()).expect("must open");
    let report = orchestrator
        .apply(&ApplyOptions::default())
        .expect("must apply");
    assert_eq!(report.status, ApplyStatus::NoUpgrade);
    assert!(orchestrator.list_backups().expect("must list").is_empty());

    let _ = fs::remove_dir_all(&root);
}

fn write_upstream(root: &PathBuf, version: &str) {
    write_upstream_file(root, "rules/guide.md", "alpha\nbeta\ngamma\n");
    write_upstream_file(root, "templates/doc.md", "doc body\n");
    bump_upstream(root, version);
}

fn bump_upstream(root: &PathBuf, version: &str) {
    write_upstream_file(
        root,
        "template.json",
        &format!(r#"{{"name":"starter","version":"{version}"}}"#),
    );
}

fn write_upstream_file(root: &PathBuf, relative: &str, content: &str) {
    let full = root.join("upstream").join(relative);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).expect("must create dirs");
    }
    fs::write(full, content).expect("must write upstream file");
}

fn write_project_file(layout: &ProjectLayout, relative: &str, content: &str) {
    let full = layout.root().join(relative);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).expect("must create dirs");
    }
    fs::write(full, content).expect("must write project file");
}

fn read_project(layout: &ProjectLayout, relative: &str) -> String {
    fs::read_to_string(layout.root().join(relative)).expect("must read project file")
}

fn test_project(label: &str) -> (PathBuf, ProjectLayout, TemplateOrigin) {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    path.push(format!(
        "stencil-{}-tests-{}-{}",
        label,
        std::process::id(),
        nanos
    ));
    let project = path.join("project");
    fs::create_dir_all(&project).expect("must create test root");
    let layout = ProjectLayout::new(project);
    let origin = TemplateOrigin::Local {
        path: path.join("upstream"),
    };
    (path, layout, origin)
}
