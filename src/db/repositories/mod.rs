mod error_events;
mod snapshots;

pub use snapshots::StoredSnapshot;
