use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use stencil_core::ProjectLayout;

use crate::BackupStore;

const TOOL_VERSION: &str = "0.3.0";

#[test]
fn backup_round_trip_restores_byte_identical_content() {
    let (root, layout) = test_layout("backup-roundtrip");
    write_file(&root, "rules/a.md", "alpha content\n");
    write_file(&root, "rules/nested/deep.md", "deep content\n");
    write_file(&root, "templates/t.md", "template body\n");
    let store = BackupStore::new(layout);

    let outcome = store
        .create("pre-upgrade", &[], TOOL_VERSION)
        .expect("must create backup");
    assert!(outcome.skipped.is_empty());
    assert_eq!(outcome.set.tool_version, TOOL_VERSION);

    // Mutate and delete, then restore.
    write_file(&root, "rules/a.md", "clobbered\n");
    fs::remove_file(root.join("templates/t.md")).expect("must delete");
    write_file(&root, "rules/extra.md", "post-backup noise\n");

    let report = store.restore(&outcome.set.name).expect("must restore");
    assert!(report.ok());
    assert_eq!(report.restored.len(), outcome.set.paths.len());

    assert_eq!(read_file(&root, "rules/a.md"), "alpha content\n");
    assert_eq!(read_file(&root, "rules/nested/deep.md"), "deep content\n");
    assert_eq!(read_file(&root, "templates/t.md"), "template body\n");
    // Restore replaces the whole recorded path, so post-backup noise is gone.
    assert!(!root.join("rules/extra.md").exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn create_skips_missing_paths_without_failing() {
    let (root, layout) = test_layout("backup-skip");
    write_file(&root, "rules/a.md", "alpha\n");
    let store = BackupStore::new(layout);

    let outcome = store
        .create(
            "partial",
            &["rules".to_string(), "no-such-dir".to_string()],
            TOOL_VERSION,
        )
        .expect("must create backup");
    assert_eq!(outcome.set.paths, vec!["rules"]);
    assert_eq!(outcome.skipped, vec!["no-such-dir"]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn create_fails_when_nothing_exists_to_back_up() {
    let (root, layout) = test_layout("backup-empty");
    let store = BackupStore::new(layout);

    let err = store
        .create("empty", &[], TOOL_VERSION)
        .expect_err("must refuse empty backup");
    assert!(err.to_string().contains("backup-failed"));
    assert!(store.list().expect("must list").is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn list_is_newest_first_and_latest_matches_head() {
    let (root, layout) = test_layout("backup-list");
    write_file(&root, "rules/a.md", "alpha\n");
    let store = BackupStore::new(layout);

    let first = store
        .create("first", &[], TOOL_VERSION)
        .expect("must create backup");
    let second = store
        .create("second", &[], TOOL_VERSION)
        .expect("must create backup");

    let listed = store.list().expect("must list");
    assert_eq!(listed.len(), 2);
    let names: Vec<&str> = listed.iter().map(|set| set.name.as_str()).collect();
    assert!(names.contains(&first.set.name.as_str()));
    assert!(names.contains(&second.set.name.as_str()));

    let latest = store.latest().expect("must read latest").expect("non-empty");
    assert_eq!(latest.name, listed[0].name);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn prune_keeps_requested_count() {
    let (root, layout) = test_layout("backup-prune");
    write_file(&root, "rules/a.md", "alpha\n");
    let store = BackupStore::new(layout);

    for label in ["one", "two", "three"] {
        store
            .create(label, &[], TOOL_VERSION)
            .expect("must create backup");
    }

    let removed = store.prune(1).expect("must prune");
    assert_eq!(removed, 2);
    let remaining = store.list().expect("must list");
    assert_eq!(remaining.len(), 1);
    assert!(store.verify(&remaining[0].name).ok());

    assert_eq!(store.prune(5).expect("must prune"), 0);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn verify_reports_missing_and_corrupt_pieces() {
    let (root, layout) = test_layout("backup-verify");
    write_file(&root, "rules/a.md", "alpha\n");
    let store = BackupStore::new(layout.clone());

    let checks = store.verify("no-such-backup");
    assert!(!checks.ok());
    assert!(!checks.archive_exists);
    assert!(!checks.metadata_exists);

    let outcome = store
        .create("verified", &[], TOOL_VERSION)
        .expect("must create backup");
    assert!(store.verify(&outcome.set.name).ok());

    let metadata = layout
        .backups_dir()
        .join(format!("{}.json", outcome.set.name));
    fs::write(&metadata, "not json").expect("must corrupt metadata");
    let checks = store.verify(&outcome.set.name);
    assert!(checks.metadata_exists);
    assert!(!checks.metadata_parses);
    assert!(!checks.ok());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn restore_reports_paths_missing_from_archive() {
    let (root, layout) = test_layout("backup-partial-restore");
    write_file(&root, "rules/a.md", "alpha\n");
    let store = BackupStore::new(layout.clone());

    let outcome = store
        .create("pre", &[], TOOL_VERSION)
        .expect("must create backup");

    // Doctor the metadata so it claims a path the archive never carried.
    let mut set = store
        .read_metadata(&outcome.set.name)
        .expect("must read metadata");
    set.paths.push("templates".to_string());
    let metadata = layout
        .backups_dir()
        .join(format!("{}.json", set.name));
    fs::write(
        &metadata,
        serde_json::to_string_pretty(&set).expect("must serialize"),
    )
    .expect("must rewrite metadata");

    let report = store.restore(&set.name).expect("restore must run");
    assert!(!report.ok());
    assert_eq!(report.restored, vec!["rules"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "templates");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn restore_cleans_up_temp_extraction_area() {
    let (root, layout) = test_layout("backup-tmp");
    write_file(&root, "rules/a.md", "alpha\n");
    let store = BackupStore::new(layout.clone());

    let outcome = store
        .create("tmp-check", &[], TOOL_VERSION)
        .expect("must create backup");
    store.restore(&outcome.set.name).expect("must restore");

    let leftovers: Vec<_> = fs::read_dir(layout.tmp_dir())
        .expect("must read tmp dir")
        .collect();
    assert!(leftovers.is_empty());

    let _ = fs::remove_dir_all(&root);
}

fn write_file(root: &PathBuf, relative: &str, content: &str) {
    let full = root.join(relative);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).expect("must create dirs");
    }
    fs::write(full, content).expect("must write file");
}

fn read_file(root: &PathBuf, relative: &str) -> String {
    fs::read_to_string(root.join(relative)).expect("must read file")
}

fn test_layout(label: &str) -> (PathBuf, ProjectLayout) {
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
    fs::create_dir_all(&path).expect("must create test root");
    let layout = ProjectLayout::new(&path);
    (path, layout)
}
