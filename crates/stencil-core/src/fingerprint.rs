use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

const TEXT_SAMPLE_LIMIT: usize = 8192;
const TEXT_PRINTABLE_RATIO: f64 = 0.80;

/// Collapse CRLF and lone CR to LF so fingerprints survive platform churn.
pub fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn fingerprint_str(content: &str) -> String {
    let normalized = normalize_line_endings(content);
    sha256_hex(normalized.as_bytes())
}

pub fn fingerprint_bytes(content: &[u8]) -> String {
    if is_probably_text(content) {
        match std::str::from_utf8(content) {
            Ok(text) => return fingerprint_str(text),
            Err(_) => {}
        }
    }
    sha256_hex(content)
}

pub fn fingerprint_file(path: &Path) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("failed reading file: {}", path.display()))?;
    Ok(fingerprint_bytes(&bytes))
}

/// Printable-ratio heuristic over a bounded sample. Empty content counts as text.
pub fn is_probably_text(content: &[u8]) -> bool {
    if content.is_empty() {
        return true;
    }

    let sample = &content[..content.len().min(TEXT_SAMPLE_LIMIT)];
    if sample.contains(&0) {
        return false;
    }

    let printable = sample
        .iter()
        .filter(|&&byte| {
            byte.is_ascii_graphic() || matches!(byte, b' ' | b'\n' | b'\r' | b'\t') || byte >= 0x80
        })
        .count();
    printable as f64 / sample.len() as f64 >= TEXT_PRINTABLE_RATIO
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
