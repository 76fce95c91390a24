mod diff;
mod three_way;

pub use diff::{diff_lines, summarize, DiffRun, DiffStats};
pub use three_way::{merge, MergeConflict, MergeOutcome, MergeStrategy};
