use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{
    collect_relative_file_paths, copy_dir_recursive, fingerprint_bytes, fingerprint_str,
    is_probably_text, normalize_line_endings, normalize_relative_path, Component, ProjectLayout,
};

#[test]
fn fingerprint_is_stable_across_line_ending_conversion() {
    let unix = "first line\nsecond line\n";
    let windows = "first line\r\nsecond line\r\n";
    let classic_mac = "first line\rsecond line\r";

    assert_eq!(fingerprint_str(unix), fingerprint_str(windows));
    assert_eq!(fingerprint_str(unix), fingerprint_str(classic_mac));
}

#[test]
fn fingerprint_changes_on_content_edit() {
    assert_ne!(
        fingerprint_str("first line\n"),
        fingerprint_str("first line!\n")
    );
}

#[test]
fn fingerprint_bytes_normalizes_text_but_not_binary() {
    assert_eq!(
        fingerprint_bytes(b"a\r\nb\n"),
        fingerprint_bytes(b"a\nb\n"),
    );

    let binary_a = [0u8, 159, 146, 150, 13, 10];
    let binary_b = [0u8, 159, 146, 150, 10];
    assert_ne!(fingerprint_bytes(&binary_a), fingerprint_bytes(&binary_b));
}

#[test]
fn normalize_line_endings_handles_mixed_input() {
    assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\nb\nc\n");
}

#[test]
fn text_heuristic_accepts_plain_and_utf8_text() {
    assert!(is_probably_text(b""));
    assert!(is_probably_text(b"plain ascii with\nnewlines\tand tabs"));
    assert!(is_probably_text("unicode: caf\u{e9} \u{2713}".as_bytes()));
}

#[test]
fn text_heuristic_rejects_binary_content() {
    assert!(!is_probably_text(&[0u8, 1, 2, 3, 4, 5, 6, 7]));

    let mut mostly_control = vec![b'a'; 10];
    mostly_control.extend(std::iter::repeat(1u8).take(90));
    assert!(!is_probably_text(&mostly_control));
}

#[test]
fn component_round_trips_through_parse() {
    for component in Component::ALL {
        let parsed = Component::parse(component.as_str()).expect("must parse component");
        assert_eq!(parsed, component);
    }
    assert_eq!(
        Component::parse("hooks").expect("must accept alias"),
        Component::GitHooks
    );
    assert!(Component::parse("widgets").is_err());
}

#[test]
fn layout_paths_live_under_state_dir() {
    let layout = ProjectLayout::new("/some/project");
    assert_eq!(
        layout.version_file(),
        PathBuf::from("/some/project/.stencil/version.json")
    );
    assert_eq!(
        layout.component_dir(Component::GitHooks),
        PathBuf::from("/some/project/git-hooks")
    );
    assert_eq!(layout.managed_dirs().len(), Component::ALL.len());
}

#[test]
fn copy_dir_recursive_reproduces_tree() {
    let root = test_root("core-copy");
    let source = root.join("source");
    fs::create_dir_all(source.join("nested")).expect("must create source tree");
    fs::write(source.join("top.txt"), "top").expect("must write file");
    fs::write(source.join("nested/inner.txt"), "inner").expect("must write file");

    let destination = root.join("destination");
    copy_dir_recursive(&source, &destination).expect("must copy tree");

    assert_eq!(
        fs::read_to_string(destination.join("top.txt")).expect("must read copy"),
        "top"
    );
    assert_eq!(
        fs::read_to_string(destination.join("nested/inner.txt")).expect("must read copy"),
        "inner"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn collect_relative_file_paths_is_sorted_and_relative() {
    let root = test_root("core-collect");
    fs::create_dir_all(root.join("b")).expect("must create tree");
    fs::write(root.join("b/two.txt"), "2").expect("must write file");
    fs::write(root.join("one.txt"), "1").expect("must write file");

    let paths = collect_relative_file_paths(&root).expect("must collect paths");
    let rendered: Vec<String> = paths.iter().map(|p| normalize_relative_path(p)).collect();
    assert_eq!(rendered, vec!["b/two.txt", "one.txt"]);

    let _ = fs::remove_dir_all(&root);
}

fn test_root(label: &str) -> PathBuf {
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
    path
}
