//! Line-level diff built on a longest-common-subsequence alignment.
//!
//! Deltas are expressed as tagged runs over line ranges rather than
//! single-line indices, so insertions and deletions never shift later
//! positions into spurious collisions.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffRun {
    Equal {
        old_start: usize,
        new_start: usize,
        len: usize,
    },
    Insert {
        old_pos: usize,
        new_start: usize,
        len: usize,
    },
    Delete {
        old_start: usize,
        len: usize,
    },
    Replace {
        old_start: usize,
        old_len: usize,
        new_start: usize,
        new_len: usize,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub inserted: usize,
    pub deleted: usize,
    pub replaced: usize,
}

pub fn diff_lines(old: &[&str], new: &[&str]) -> Vec<DiffRun> {
    let pairs = lcs_pairs(old, new);
    let mut runs = Vec::new();
    let mut old_pos = 0_usize;
    let mut new_pos = 0_usize;
    let mut pair_index = 0_usize;

    while pair_index < pairs.len() {
        let (old_match, new_match) = pairs[pair_index];
        push_gap(&mut runs, old_pos, old_match, new_pos, new_match);

        // Collapse the contiguous matched stretch into one Equal run.
        let equal_start = pair_index;
        while pair_index + 1 < pairs.len() {
            let (next_old, next_new) = pairs[pair_index + 1];
            let (cur_old, cur_new) = pairs[pair_index];
            if next_old == cur_old + 1 && next_new == cur_new + 1 {
                pair_index += 1;
            } else {
                break;
            }
        }
        let len = pair_index - equal_start + 1;
        runs.push(DiffRun::Equal {
            old_start: old_match,
            new_start: new_match,
            len,
        });
        old_pos = old_match + len;
        new_pos = new_match + len;
        pair_index += 1;
    }

    push_gap(&mut runs, old_pos, old.len(), new_pos, new.len());
    runs
}

pub fn summarize(runs: &[DiffRun]) -> DiffStats {
    let mut stats = DiffStats::default();
    for run in runs {
        match run {
            DiffRun::Equal { .. } => {}
            DiffRun::Insert { len, .. } => stats.inserted += len,
            DiffRun::Delete { len, .. } => stats.deleted += len,
            DiffRun::Replace {
                old_len, new_len, ..
            } => stats.replaced += old_len.max(new_len),
        }
    }
    stats
}

fn push_gap(
    runs: &mut Vec<DiffRun>,
    old_start: usize,
    old_end: usize,
    new_start: usize,
    new_end: usize,
) {
    let old_len = old_end - old_start;
    let new_len = new_end - new_start;
    if old_len == 0 && new_len == 0 {
        return;
    }
    if old_len == 0 {
        runs.push(DiffRun::Insert {
            old_pos: old_start,
            new_start,
            len: new_len,
        });
    } else if new_len == 0 {
        runs.push(DiffRun::Delete {
            old_start,
            len: old_len,
        });
    } else {
        runs.push(DiffRun::Replace {
            old_start,
            old_len,
            new_start,
            new_len,
        });
    }
}

/// Monotone matched line pairs between `a` and `b`, longest subsequence.
/// Common prefix and suffix are peeled off before the quadratic fill.
pub(crate) fn lcs_pairs(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let mut prefix = 0_usize;
    while prefix < a.len() && prefix < b.len() && a[prefix] == b[prefix] {
        prefix += 1;
    }

    let mut suffix = 0_usize;
    while suffix < a.len() - prefix
        && suffix < b.len() - prefix
        && a[a.len() - 1 - suffix] == b[b.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let mid_a = &a[prefix..a.len() - suffix];
    let mid_b = &b[prefix..b.len() - suffix];

    let mut pairs: Vec<(usize, usize)> = (0..prefix).map(|i| (i, i)).collect();

    if !mid_a.is_empty() && !mid_b.is_empty() {
        let rows = mid_a.len() + 1;
        let cols = mid_b.len() + 1;
        let mut table = vec![0_u32; rows * cols];
        for i in (0..mid_a.len()).rev() {
            for j in (0..mid_b.len()).rev() {
                table[i * cols + j] = if mid_a[i] == mid_b[j] {
                    table[(i + 1) * cols + j + 1] + 1
                } else {
                    table[(i + 1) * cols + j].max(table[i * cols + j + 1])
                };
            }
        }

        let (mut i, mut j) = (0_usize, 0_usize);
        while i < mid_a.len() && j < mid_b.len() {
            if mid_a[i] == mid_b[j] {
                pairs.push((prefix + i, prefix + j));
                i += 1;
                j += 1;
            } else if table[(i + 1) * cols + j] >= table[i * cols + j + 1] {
                i += 1;
            } else {
                j += 1;
            }
        }
    }

    for k in 0..suffix {
        pairs.push((a.len() - suffix + k, b.len() - suffix + k));
    }
    pairs
}
