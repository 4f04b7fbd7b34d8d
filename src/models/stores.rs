//! Read-only views of the host app's state containers.
//!
//! The web UI owns these containers; it serializes their current state and
//! hands it over for a gather cycle. Nothing in this crate writes them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FOLDER_NODE_TYPE: &str = "folder";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageCounters {
    pub generations: u64,
    pub imports: u64,
    pub exports: u64,
    pub projects_opened: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub session_id: String,
    pub session_started_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub usage: UsageCounters,
}

impl Default for UserState {
    fn default() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            session_started_at: Utc::now(),
            user_id: None,
            usage: UsageCounters::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLogEntry {
    pub id: String,
    pub action_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionLog {
    pub entries: Vec<ActionLogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub id: String,
    pub name: String,
    /// `"folder"` for directories; anything else is an asset.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub children: Vec<FileNode>,
}

impl FileNode {
    pub fn is_folder(&self) -> bool {
        self.node_type == FOLDER_NODE_TYPE
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileTree {
    pub roots: Vec<FileNode>,
    pub current_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditorSettings {
    pub provider: String,
    pub font_size: u32,
    pub compact_mode: bool,
    pub show_grid: bool,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            provider: "default".into(),
            font_size: 14,
            compact_mode: false,
            show_grid: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectsState {
    pub projects: Vec<ProjectSummary>,
    pub recent_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasItem {
    pub id: String,
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CanvasState {
    pub items: Vec<CanvasItem>,
}

/// Borrowed view over the six containers for one gather cycle.
#[derive(Debug, Clone, Copy)]
pub struct StoreSnapshot<'a> {
    pub user: &'a UserState,
    pub action_log: &'a ActionLog,
    pub files: &'a FileTree,
    pub settings: &'a EditorSettings,
    pub projects: &'a ProjectsState,
    pub canvas: &'a CanvasState,
}

/// Owned copy of every container, as the host serializes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostState {
    pub user: UserState,
    pub action_log: ActionLog,
    pub files: FileTree,
    pub settings: EditorSettings,
    pub projects: ProjectsState,
    pub canvas: CanvasState,
}

impl HostState {
    pub fn snapshot(&self) -> StoreSnapshot<'_> {
        StoreSnapshot {
            user: &self.user,
            action_log: &self.action_log,
            files: &self.files,
            settings: &self.settings,
            projects: &self.projects,
            canvas: &self.canvas,
        }
    }
}
