use std::collections::HashMap;

use anyhow::{anyhow, Result};
use stencil_core::is_probably_text;

use crate::diff::lcs_pairs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Ours,
    Theirs,
    Merge,
    Manual,
    Auto,
}

impl MergeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ours => "ours",
            Self::Theirs => "theirs",
            Self::Merge => "merge",
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "ours" => Ok(Self::Ours),
            "theirs" => Ok(Self::Theirs),
            "merge" => Ok(Self::Merge),
            "manual" => Ok(Self::Manual),
            "auto" => Ok(Self::Auto),
            other => Err(anyhow!("unknown merge strategy: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    /// Base line index where the conflicting region starts.
    pub line: usize,
    pub ours_text: String,
    pub theirs_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    NoChange {
        merged: String,
    },
    FastForward {
        merged: String,
    },
    KeepOurs {
        merged: String,
    },
    Clean {
        merged: String,
    },
    Conflicted {
        merged: Option<String>,
        conflicts: Vec<MergeConflict>,
        binary: bool,
    },
}

impl MergeOutcome {
    pub fn merged_text(&self) -> Option<&str> {
        match self {
            Self::NoChange { merged }
            | Self::FastForward { merged }
            | Self::KeepOurs { merged }
            | Self::Clean { merged } => Some(merged),
            Self::Conflicted { merged, .. } => merged.as_deref(),
        }
    }

    pub fn is_conflicted(&self) -> bool {
        matches!(self, Self::Conflicted { .. })
    }
}

/// Three-way merge of `base` (common ancestor), `ours` (local), and
/// `theirs` (upstream). Pure; never fails on well-formed text.
pub fn merge(base: &[u8], ours: &[u8], theirs: &[u8], strategy: MergeStrategy) -> MergeOutcome {
    if base == ours && base == theirs {
        return MergeOutcome::NoChange {
            merged: lossy(ours),
        };
    }
    if ours == theirs {
        // Both sides converged on the same content independently.
        return MergeOutcome::Clean {
            merged: lossy(ours),
        };
    }
    if base == ours {
        return MergeOutcome::FastForward {
            merged: lossy(theirs),
        };
    }
    if base == theirs {
        return MergeOutcome::KeepOurs {
            merged: lossy(ours),
        };
    }

    if !is_probably_text(base) || !is_probably_text(ours) || !is_probably_text(theirs) {
        return MergeOutcome::Conflicted {
            merged: None,
            conflicts: Vec::new(),
            binary: true,
        };
    }

    merge_text(&lossy(base), &lossy(ours), &lossy(theirs), strategy)
}

fn merge_text(base: &str, ours: &str, theirs: &str, strategy: MergeStrategy) -> MergeOutcome {
    let (base_lines, _) = split_lines(base);
    let (ours_lines, ours_newline) = split_lines(ours);
    let (theirs_lines, theirs_newline) = split_lines(theirs);
    let trailing_newline = ours_newline || theirs_newline;

    let ours_match = match_map(&base_lines, &ours_lines);
    let theirs_match = match_map(&base_lines, &theirs_lines);

    let mut output: Vec<String> = Vec::new();
    let mut conflicts: Vec<MergeConflict> = Vec::new();

    let mut base_pos = 0_usize;
    let mut ours_pos = 0_usize;
    let mut theirs_pos = 0_usize;

    while base_pos < base_lines.len()
        || ours_pos < ours_lines.len()
        || theirs_pos < theirs_lines.len()
    {
        if is_stable(
            base_pos, ours_pos, theirs_pos, &ours_match, &theirs_match,
        ) {
            output.push(base_lines[base_pos].to_string());
            base_pos += 1;
            ours_pos += 1;
            theirs_pos += 1;
            continue;
        }

        // Advance to the next base line matched by both sides; everything in
        // between is one unstable region.
        let mut next = base_pos;
        let (next_base, next_ours, next_theirs) = loop {
            if next >= base_lines.len() {
                break (base_lines.len(), ours_lines.len(), theirs_lines.len());
            }
            match (ours_match.get(&next), theirs_match.get(&next)) {
                (Some(&in_ours), Some(&in_theirs))
                    if in_ours >= ours_pos && in_theirs >= theirs_pos =>
                {
                    break (next, in_ours, in_theirs);
                }
                _ => next += 1,
            }
        };

        let base_chunk = &base_lines[base_pos..next_base];
        let ours_chunk = &ours_lines[ours_pos..next_ours];
        let theirs_chunk = &theirs_lines[theirs_pos..next_theirs];

        if ours_chunk == base_chunk {
            output.extend(theirs_chunk.iter().map(|line| line.to_string()));
        } else if theirs_chunk == base_chunk || ours_chunk == theirs_chunk {
            output.extend(ours_chunk.iter().map(|line| line.to_string()));
        } else {
            let conflict = MergeConflict {
                line: base_pos,
                ours_text: ours_chunk.join("\n"),
                theirs_text: theirs_chunk.join("\n"),
            };
            match strategy {
                MergeStrategy::Ours => {
                    output.extend(ours_chunk.iter().map(|line| line.to_string()));
                }
                MergeStrategy::Theirs => {
                    output.extend(theirs_chunk.iter().map(|line| line.to_string()));
                }
                MergeStrategy::Merge | MergeStrategy::Manual | MergeStrategy::Auto => {
                    output.push("<<<<<<< ours".to_string());
                    output.extend(ours_chunk.iter().map(|line| line.to_string()));
                    output.push("=======".to_string());
                    output.extend(theirs_chunk.iter().map(|line| line.to_string()));
                    output.push(">>>>>>> theirs".to_string());
                }
            }
            conflicts.push(conflict);
        }

        base_pos = next_base;
        ours_pos = next_ours;
        theirs_pos = next_theirs;
    }

    let mut merged = output.join("\n");
    if trailing_newline && !merged.is_empty() {
        merged.push('\n');
    }

    if conflicts.is_empty() {
        return MergeOutcome::Clean { merged };
    }

    match strategy {
        // Side-selection strategies resolve every conflict by policy.
        MergeStrategy::Ours | MergeStrategy::Theirs => MergeOutcome::Clean { merged },
        MergeStrategy::Manual => MergeOutcome::Conflicted {
            merged: None,
            conflicts,
            binary: false,
        },
        MergeStrategy::Merge | MergeStrategy::Auto => MergeOutcome::Conflicted {
            merged: Some(merged),
            conflicts,
            binary: false,
        },
    }
}

fn is_stable(
    base_pos: usize,
    ours_pos: usize,
    theirs_pos: usize,
    ours_match: &HashMap<usize, usize>,
    theirs_match: &HashMap<usize, usize>,
) -> bool {
    ours_match.get(&base_pos) == Some(&ours_pos)
        && theirs_match.get(&base_pos) == Some(&theirs_pos)
}

fn match_map(base: &[&str], side: &[&str]) -> HashMap<usize, usize> {
    lcs_pairs(base, side).into_iter().collect()
}

fn split_lines(text: &str) -> (Vec<&str>, bool) {
    if text.is_empty() {
        return (Vec::new(), false);
    }
    let trailing_newline = text.ends_with('\n');
    let body = if trailing_newline {
        &text[..text.len() - 1]
    } else {
        text
    };
    (body.split('\n').collect(), trailing_newline)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
