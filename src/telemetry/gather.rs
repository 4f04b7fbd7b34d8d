use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::{collections::BTreeMap, path::PathBuf, time::Duration};
use sysinfo::Disks;

use crate::device::{probe_device, probe_features, HostCapabilities, RuntimeEnvironment};
use crate::models::{FileNode, StoreSnapshot};

use super::health::{check_health, ServiceTarget};
use super::transport::HttpTransport;
use super::types::{
    GatheredData, HealthResult, PathInfo, ProjectCounts, SettingsDigest, StorageEstimate,
    StoreDigest, UsageDigest,
};

/// Raw quota/usage pair, before the percentage is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStorage {
    pub quota: u64,
    pub usage: u64,
}

#[async_trait]
pub trait StorageEstimator: Send + Sync {
    async fn estimate(&self) -> Result<RawStorage>;
}

/// Measures the filesystem that holds `path`.
pub struct DiskStorageEstimator {
    path: PathBuf,
}

impl DiskStorageEstimator {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl StorageEstimator for DiskStorageEstimator {
    async fn estimate(&self) -> Result<RawStorage> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let path = path
                .canonicalize()
                .with_context(|| format!("failed to resolve {}", path.display()))?;
            let disks = Disks::new_with_refreshed_list();

            // Longest mount point that prefixes the path is the owning filesystem.
            let disk = disks
                .list()
                .iter()
                .filter(|disk| path.starts_with(disk.mount_point()))
                .max_by_key(|disk| disk.mount_point().as_os_str().len())
                .ok_or_else(|| anyhow!("no disk found for {}", path.display()))?;

            let quota = disk.total_space();
            Ok(RawStorage {
                quota,
                usage: quota.saturating_sub(disk.available_space()),
            })
        })
        .await
        .context("storage estimate worker join failed")?
    }
}

/// Best effort: any estimator failure resolves to `None`.
pub async fn gather_storage_estimate(estimator: &dyn StorageEstimator) -> Option<StorageEstimate> {
    match estimator.estimate().await {
        Ok(raw) => Some(StorageEstimate::new(raw.quota, raw.usage)),
        Err(err) => {
            log::debug!("storage estimate unavailable: {err:#}");
            None
        }
    }
}

/// Reduce the host containers to their digest. Reads only.
pub fn gather_from_stores(stores: &StoreSnapshot<'_>) -> StoreDigest {
    let mut log_entries_by_type: BTreeMap<String, u64> = BTreeMap::new();
    for entry in &stores.action_log.entries {
        *log_entries_by_type.entry(entry.action_type.clone()).or_default() += 1;
    }

    let (folder_count, asset_count) = count_file_nodes(&stores.files.roots);

    StoreDigest {
        session_id: stores.user.session_id.clone(),
        session_started_at: stores.user.session_started_at,
        usage: UsageDigest {
            counters: stores.user.usage.clone(),
            canvas_item_count: stores.canvas.items.len() as u64,
            log_entries_by_type,
        },
        paths: PathInfo {
            current_project_path: stores.files.current_path.clone(),
            folder_count,
            asset_count,
        },
        settings_digest: SettingsDigest {
            provider: stores.settings.provider.clone(),
            font_size: stores.settings.font_size,
            compact_mode: stores.settings.compact_mode,
            show_grid: stores.settings.show_grid,
        },
        projects: ProjectCounts {
            total: stores.projects.projects.len() as u64,
            recent: stores.projects.recent_ids.len() as u64,
        },
    }
}

/// (folders, assets) over the whole tree, at any depth.
fn count_file_nodes(roots: &[FileNode]) -> (u64, u64) {
    let mut folders = 0;
    let mut assets = 0;
    let mut pending: Vec<&FileNode> = roots.iter().collect();

    while let Some(node) = pending.pop() {
        if node.is_folder() {
            folders += 1;
        } else {
            assets += 1;
        }
        pending.extend(node.children.iter());
    }

    (folders, assets)
}

pub struct GatherSources<'a> {
    pub stores: StoreSnapshot<'a>,
    pub host: &'a HostCapabilities,
    pub runtime: &'a RuntimeEnvironment,
    pub storage: &'a dyn StorageEstimator,
    pub transport: &'a dyn HttpTransport,
    pub health_targets: &'a [ServiceTarget],
    pub health_timeout: Duration,
}

/// Snapshot the stores, then run the storage and health probes side by side.
/// Health is `None` when no services are configured.
pub async fn gather(sources: GatherSources<'_>) -> (GatheredData, Option<HealthResult>) {
    let stores = gather_from_stores(&sources.stores);
    let device = probe_device(sources.host);
    let features = probe_features(sources.host, sources.runtime);

    let health_probe = async {
        if sources.health_targets.is_empty() {
            None
        } else {
            Some(
                check_health(
                    sources.transport,
                    sources.health_targets,
                    sources.health_timeout,
                )
                .await,
            )
        }
    };

    let (storage, health) = tokio::join!(gather_storage_estimate(sources.storage), health_probe);

    let gathered = GatheredData {
        device: Some(device),
        storage,
        features,
        stores,
    };

    (gathered, health)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ActionLogEntry, CanvasItem, FileTree, HostState, ProjectSummary, UsageCounters,
    };
    use chrono::Utc;

    struct FailingEstimator;

    #[async_trait]
    impl StorageEstimator for FailingEstimator {
        async fn estimate(&self) -> Result<RawStorage> {
            Err(anyhow!("StorageManager unavailable"))
        }
    }

    struct FixedEstimator(RawStorage);

    #[async_trait]
    impl StorageEstimator for FixedEstimator {
        async fn estimate(&self) -> Result<RawStorage> {
            Ok(self.0)
        }
    }

    fn node(name: &str, node_type: &str, children: Vec<FileNode>) -> FileNode {
        FileNode {
            id: name.into(),
            name: name.into(),
            node_type: node_type.into(),
            children,
        }
    }

    fn sample_state() -> HostState {
        let mut state = HostState::default();
        state.user.session_id = "sess-1".into();
        state.user.usage = UsageCounters {
            generations: 4,
            imports: 2,
            exports: 1,
            projects_opened: 3,
        };
        for (i, action) in ["generate", "import", "generate", "export", "generate"]
            .iter()
            .enumerate()
        {
            state.action_log.entries.push(ActionLogEntry {
                id: i.to_string(),
                action_type: action.to_string(),
                timestamp: Utc::now(),
                detail: None,
            });
        }
        state.files = FileTree {
            roots: vec![
                node(
                    "assets",
                    "folder",
                    vec![
                        node("hero.png", "image", vec![]),
                        node("refs", "folder", vec![node("deep", "folder", vec![node("a.mp4", "video", vec![])])]),
                    ],
                ),
                node("notes.md", "file", vec![]),
            ],
            current_path: Some("/projects/poster".into()),
        };
        state.projects.projects = (0..5)
            .map(|i| ProjectSummary {
                id: format!("p{i}"),
                name: format!("Project {i}"),
                updated_at: None,
            })
            .collect();
        state.projects.recent_ids = vec!["p1".into(), "p3".into()];
        state.canvas.items = vec![
            CanvasItem { id: "c1".into(), kind: "image".into() },
            CanvasItem { id: "c2".into(), kind: "text".into() },
        ];
        state.settings.compact_mode = true;
        state
    }

    #[test]
    fn digest_counts_everything() {
        let state = sample_state();
        let digest = gather_from_stores(&state.snapshot());

        assert_eq!(digest.session_id, "sess-1");
        assert_eq!(digest.usage.counters.generations, 4);
        assert_eq!(digest.usage.canvas_item_count, 2);
        assert_eq!(digest.usage.log_entries_by_type["generate"], 3);
        assert_eq!(digest.usage.log_entries_by_type["import"], 1);
        assert_eq!(digest.usage.log_entries_by_type["export"], 1);
        assert_eq!(digest.paths.folder_count, 3);
        assert_eq!(digest.paths.asset_count, 3);
        assert_eq!(digest.paths.current_project_path.as_deref(), Some("/projects/poster"));
        assert_eq!(digest.projects, ProjectCounts { total: 5, recent: 2 });
        assert!(digest.settings_digest.compact_mode);
    }

    #[test]
    fn deep_trees_do_not_recurse() {
        let mut current = node("leaf", "image", vec![]);
        for depth in 0..50_000 {
            current = node(&format!("d{depth}"), "folder", vec![current]);
        }
        let (folders, assets) = count_file_nodes(std::slice::from_ref(&current));
        assert_eq!(folders, 50_000);
        assert_eq!(assets, 1);

        // Dropping a 50k-deep tree recurses too; leak it instead of overflowing.
        std::mem::forget(current);
    }

    #[test]
    fn gather_leaves_sources_untouched() {
        let state = sample_state();
        let before = serde_json::to_value(&state).unwrap();
        let _ = gather_from_stores(&state.snapshot());
        assert_eq!(serde_json::to_value(&state).unwrap(), before);
    }

    #[tokio::test]
    async fn storage_failure_is_none() {
        assert_eq!(gather_storage_estimate(&FailingEstimator).await, None);
    }

    #[tokio::test]
    async fn storage_success_derives_percent() {
        let estimator = FixedEstimator(RawStorage { quota: 200, usage: 50 });
        let estimate = gather_storage_estimate(&estimator).await.unwrap();
        assert_eq!(estimate.usage_percent, 25);
    }
}
