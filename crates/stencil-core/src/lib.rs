mod component;
mod fingerprint;
mod fsutil;
mod layout;

pub use component::Component;
pub use fingerprint::{
    fingerprint_bytes, fingerprint_file, fingerprint_str, is_probably_text,
    normalize_line_endings,
};
pub use fsutil::{
    collect_relative_file_paths, copy_dir_recursive, current_unix_timestamp,
    normalize_relative_path, unique_suffix,
};
pub use layout::ProjectLayout;

#[cfg(test)]
mod tests;
