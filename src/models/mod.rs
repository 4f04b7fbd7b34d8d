pub mod event;
pub mod stores;

pub use event::ErrorEvent;
pub use stores::{
    ActionLog, ActionLogEntry, CanvasItem, CanvasState, EditorSettings, FileNode, FileTree,
    HostState, ProjectSummary, ProjectsState, StoreSnapshot, UsageCounters, UserState,
};
