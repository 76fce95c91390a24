mod registry;
mod tracker;

pub use registry::{
    ChangeKind, HistoryEntry, HistoryEntryKind, UpgradeCheck, VersionRecord, VersionRegistry,
    HISTORY_LIMIT,
};
pub use tracker::{CustomizationReport, CustomizationTracker, TrackingEntry};
