use std::{
    path::Path,
    sync::{Arc, RwLock},
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::config::TelemetryConfig;
use crate::db::{Database, StoredSnapshot};
use crate::device::{
    derive_connectivity_tier, derive_device_tier, probe_device, probe_features, HostCapabilities,
    RuntimeEnvironment,
};
use crate::generation::GenerationError;
use crate::models::{ErrorEvent, HostState};
use crate::settings::SettingsStore;
use crate::signature::{compute_client_signature, SignatureInputs};
use crate::telemetry::{
    digest_gathered_data, gather, DiskStorageEstimator, GatherSources, HealthStatus,
    HttpTransport, NetworkStatus, ReqwestTransport, RetryPolicy, StorageEstimator, SyncEndpoints,
    SyncOutcome, TelemetrySync,
};

use super::state::{PipelineStatus, StartupLatch};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const DATABASE_FILE: &str = "telemetry.db";
const SETTINGS_FILE: &str = "settings.json";

/// What one gather -> digest -> persist -> sync pass produced.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub snapshot_id: String,
    pub client_signature: String,
    pub health: Option<HealthStatus>,
    pub sync: SyncOutcome,
}

/// Collaborators the pipeline is assembled from. `TelemetryPipeline::open`
/// builds the production set; tests swap in their own transport and storage.
pub struct PipelineParts {
    pub db: Database,
    pub settings: Arc<SettingsStore>,
    pub config: TelemetryConfig,
    pub transport: Arc<dyn HttpTransport>,
    pub storage: Arc<dyn StorageEstimator>,
    pub runtime: RuntimeEnvironment,
    pub network: NetworkStatus,
}

pub struct TelemetryPipeline {
    db: Database,
    settings: Arc<SettingsStore>,
    config: TelemetryConfig,
    transport: Arc<dyn HttpTransport>,
    storage: Arc<dyn StorageEstimator>,
    runtime: RuntimeEnvironment,
    host: RwLock<HostCapabilities>,
    sync: TelemetrySync,
    startup: StartupLatch,
}

impl TelemetryPipeline {
    pub fn new(parts: PipelineParts) -> Self {
        let sync = TelemetrySync::new(
            parts.db.clone(),
            parts.transport.clone(),
            SyncEndpoints::from_config(&parts.config),
            RetryPolicy {
                max_retries: parts.config.max_retries,
                delay: parts.config.retry_delay,
            },
            parts.network,
            parts.settings.clone(),
            parts.config.telemetry_enabled,
        );

        Self {
            db: parts.db,
            settings: parts.settings,
            config: parts.config,
            transport: parts.transport,
            storage: parts.storage,
            runtime: parts.runtime,
            host: RwLock::new(HostCapabilities::default()),
            sync,
            startup: StartupLatch::new(),
        }
    }

    /// Production wiring rooted at `data_dir`.
    pub fn open(data_dir: &Path, config: TelemetryConfig) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let db = Database::new(data_dir.join(DATABASE_FILE))?;
        let settings = Arc::new(SettingsStore::new(data_dir.join(SETTINGS_FILE))?);
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout)?);

        Ok(Self::new(PipelineParts {
            db,
            settings,
            transport,
            storage: Arc::new(DiskStorageEstimator::new(data_dir.to_path_buf())),
            runtime: RuntimeEnvironment::detect(data_dir),
            network: NetworkStatus::default(),
            config,
        }))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn network(&self) -> &NetworkStatus {
        self.sync.network()
    }

    pub fn status(&self) -> PipelineStatus {
        self.startup.status()
    }

    pub fn set_host_capabilities(&self, host: HostCapabilities) {
        *self.host.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = host;
    }

    fn host_capabilities(&self) -> HostCapabilities {
        self.host
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn signature_inputs(&self, host: &HostCapabilities) -> SignatureInputs {
        SignatureInputs::new(
            self.config.app_version.clone(),
            self.config.build_id.clone(),
            probe_features(host, &self.runtime),
        )
    }

    /// Signature for the environment as it is right now. Recomputed on every
    /// call.
    pub fn client_signature(&self) -> String {
        let host = self.host_capabilities();
        let device = probe_device(&host);
        compute_client_signature(
            &self.signature_inputs(&host),
            derive_device_tier(device.cores, device.memory_gib),
            derive_connectivity_tier(device.effective_type.as_deref()),
        )
    }

    /// The startup pass. Runs at most once per pipeline; later calls and
    /// failures both come back as `None`.
    pub async fn run_startup_cycle(&self, stores: &HostState) -> Option<CycleReport> {
        let Some(_run) = self.startup.begin() else {
            log_info!("startup telemetry cycle already claimed; skipping");
            return None;
        };

        let result = self.run_cycle(stores).await;

        match result {
            Ok(report) => Some(report),
            Err(err) => {
                log_error!("startup telemetry cycle failed: {err:#}");
                None
            }
        }
    }

    /// One full pass, usable for manual re-triggers. Only the local steps can
    /// fail; delivery problems are folded into `SyncOutcome`.
    pub async fn run_cycle(&self, stores: &HostState) -> Result<CycleReport> {
        let host = self.host_capabilities();

        let (gathered, health) = gather(GatherSources {
            stores: stores.snapshot(),
            host: &host,
            runtime: &self.runtime,
            storage: self.storage.as_ref(),
            transport: self.transport.as_ref(),
            health_targets: &self.config.health_services,
            health_timeout: self.config.health_timeout,
        })
        .await;

        let snapshot = digest_gathered_data(&gathered, health.as_ref(), &self.signature_inputs(&host))
            .context("failed to digest gathered telemetry")?;

        self.db
            .insert_snapshot(&snapshot)
            .await
            .context("failed to persist telemetry snapshot")?;
        log_info!(
            "persisted snapshot {} for session {} ({})",
            snapshot.id,
            snapshot.session_id,
            snapshot.client_signature
        );

        let outcome = self.sync.sync_telemetry().await;

        Ok(CycleReport {
            snapshot_id: snapshot.id,
            client_signature: snapshot.client_signature,
            health: health.map(|result| result.status),
            sync: outcome,
        })
    }

    /// Delivery only, no new snapshot.
    pub async fn sync(&self) -> SyncOutcome {
        self.sync.sync_telemetry().await
    }

    pub async fn record_error(
        &self,
        code: &str,
        message: &str,
        context: Option<serde_json::Value>,
    ) -> Result<ErrorEvent> {
        let event = ErrorEvent::new(code, message, context, self.client_signature());
        self.db
            .insert_error_event(&event)
            .await
            .with_context(|| format!("failed to record error event {code}"))?;

        log_warn!("recorded error {code}: {message}");
        Ok(event)
    }

    pub async fn record_generation_error(&self, err: &GenerationError) -> Result<ErrorEvent> {
        self.record_error(err.code(), &err.to_string(), Some(err.to_event_context()))
            .await
    }

    /// Drop delivered events older than `retention`. Pending events are kept
    /// no matter their age.
    pub async fn prune_synced_events(&self, retention: chrono::Duration) -> Result<usize> {
        if retention < chrono::Duration::zero() {
            bail!("retention window must not be negative");
        }
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .ok_or_else(|| anyhow!("retention window is out of range"))?;

        let removed = self.db.prune_synced_events(cutoff).await?;
        if removed > 0 {
            log_info!("pruned {removed} synced error events");
        }
        Ok(removed)
    }

    pub async fn recent_snapshots(&self, limit: usize) -> Result<Vec<StoredSnapshot>> {
        self.db.list_snapshots(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{RawStorage, ServiceTarget};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingTransport {
        status: u16,
        stall_gets: bool,
        posts: Mutex<Vec<String>>,
        gets: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpTransport for CountingTransport {
        async fn get(&self, url: &str, _timeout: Duration) -> Result<u16> {
            self.gets.lock().unwrap().push(url.to_string());
            if self.stall_gets {
                std::future::pending::<()>().await;
            }
            Ok(self.status)
        }

        async fn post_json(&self, url: &str, _body: &serde_json::Value) -> Result<u16> {
            self.posts.lock().unwrap().push(url.to_string());
            if self.status == 0 {
                return Err(anyhow!("refused"));
            }
            Ok(self.status)
        }
    }

    struct FixedStorage;

    #[async_trait]
    impl StorageEstimator for FixedStorage {
        async fn estimate(&self) -> Result<RawStorage> {
            Ok(RawStorage {
                quota: 1_000,
                usage: 250,
            })
        }
    }

    fn pipeline(status: u16) -> (TempDir, Arc<CountingTransport>, TelemetryPipeline) {
        pipeline_with(CountingTransport {
            status,
            ..Default::default()
        })
    }

    fn pipeline_with(
        transport: CountingTransport,
    ) -> (TempDir, Arc<CountingTransport>, TelemetryPipeline) {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(transport);
        let config = TelemetryConfig {
            app_version: "2.0.0".into(),
            build_id: "b42".into(),
            collector_url: Some("http://collector.local".into()),
            health_services: vec![ServiceTarget::new("collector", "http://collector.local")],
            max_retries: 1,
            retry_delay: Duration::from_millis(10),
            ..TelemetryConfig::default()
        };

        let pipeline = TelemetryPipeline::new(PipelineParts {
            db: Database::new(dir.path().join(DATABASE_FILE)).unwrap(),
            settings: Arc::new(SettingsStore::new(dir.path().join(SETTINGS_FILE)).unwrap()),
            config,
            transport: transport.clone(),
            storage: Arc::new(FixedStorage),
            runtime: RuntimeEnvironment {
                worker_threads: 4,
                storage_writable: true,
            },
            network: NetworkStatus::new(true),
        });

        (dir, transport, pipeline)
    }

    #[tokio::test]
    async fn startup_cycle_runs_once() {
        let (_dir, transport, pipeline) = pipeline(200);
        let stores = HostState::default();

        let report = pipeline.run_startup_cycle(&stores).await.unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Done);
        assert!(report.sync.snapshot_ok);
        assert_eq!(report.health, Some(HealthStatus::Ok));
        assert!(report.client_signature.starts_with("v2.0.0-"));

        assert!(pipeline.run_startup_cycle(&stores).await.is_none());
        assert_eq!(pipeline.db().snapshot_count().await.unwrap(), 1);
        assert_eq!(transport.posts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_startup_cycle_still_settles() {
        let (_dir, transport, pipeline) = pipeline_with(CountingTransport {
            status: 200,
            stall_gets: true,
            ..Default::default()
        });
        let stores = HostState::default();

        let cycle = pipeline.run_startup_cycle(&stores);
        assert!(tokio::time::timeout(Duration::from_millis(50), cycle)
            .await
            .is_err());

        assert!(!transport.gets.lock().unwrap().is_empty());
        assert_eq!(pipeline.status(), PipelineStatus::Done);
        assert!(pipeline.run_startup_cycle(&stores).await.is_none());
    }

    #[tokio::test]
    async fn manual_cycles_are_not_latched() {
        let (_dir, _transport, pipeline) = pipeline(200);
        let stores = HostState::default();

        pipeline.run_cycle(&stores).await.unwrap();
        pipeline.run_cycle(&stores).await.unwrap();

        assert_eq!(pipeline.db().snapshot_count().await.unwrap(), 2);
        assert_eq!(pipeline.status(), PipelineStatus::NotStarted);
        assert_eq!(pipeline.recent_snapshots(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn snapshot_signature_matches_on_demand_signature() {
        let (_dir, _transport, pipeline) = pipeline(200);
        pipeline.set_host_capabilities(HostCapabilities {
            webgl: Some(true),
            effective_type: Some("4g".into()),
            ..Default::default()
        });

        let report = pipeline.run_cycle(&HostState::default()).await.unwrap();
        assert_eq!(report.client_signature, pipeline.client_signature());
    }

    #[tokio::test]
    async fn signature_follows_capability_changes() {
        let (_dir, _transport, pipeline) = pipeline(200);
        let before = pipeline.client_signature();

        pipeline.set_host_capabilities(HostCapabilities {
            webgl: Some(true),
            ..Default::default()
        });
        assert_ne!(pipeline.client_signature(), before);
    }

    #[tokio::test]
    async fn failed_delivery_still_persists_snapshot() {
        let (_dir, transport, pipeline) = pipeline(0);

        let report = pipeline.run_startup_cycle(&HostState::default()).await.unwrap();
        assert!(!report.sync.snapshot_ok);
        assert_eq!(transport.posts.lock().unwrap().len(), 2);

        let stored = pipeline.db().latest_snapshot().await.unwrap().unwrap();
        assert_eq!(stored.snapshot.id, report.snapshot_id);
        assert!(stored.last_synced_at.is_none());
    }

    #[tokio::test]
    async fn future_session_start_fails_the_cycle() {
        let (_dir, _transport, pipeline) = pipeline(200);
        let mut stores = HostState::default();
        stores.user.session_started_at = Utc::now() + chrono::Duration::hours(1);

        assert!(pipeline.run_cycle(&stores).await.is_err());
        assert!(pipeline.run_startup_cycle(&stores).await.is_none());
        assert_eq!(pipeline.status(), PipelineStatus::Done);
        assert_eq!(pipeline.db().snapshot_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn record_error_stamps_current_signature() {
        let (_dir, _transport, pipeline) = pipeline(200);

        let event = pipeline
            .record_error(
                "GEN_TIMEOUT",
                "provider timed out",
                Some(serde_json::json!({ "provider": "flux" })),
            )
            .await
            .unwrap();

        assert_eq!(event.client_signature, pipeline.client_signature());
        let pending = pipeline.db().unsynced_error_events().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].context, event.context);
    }

    #[tokio::test]
    async fn generation_errors_become_events() {
        let (_dir, _transport, pipeline) = pipeline(200);
        let err = GenerationError::InvalidDimensions {
            width: 10,
            height: 10,
        };

        let event = pipeline.record_generation_error(&err).await.unwrap();
        assert_eq!(event.code, "GEN_INVALID_DIMENSIONS");
        assert_eq!(event.message, "invalid dimensions 10x10");
        assert_eq!(event.context.unwrap()["width"], 10);
    }

    #[tokio::test]
    async fn prune_keeps_pending_events() {
        let (_dir, _transport, pipeline) = pipeline(200);
        pipeline.record_error("GEN_UNKNOWN", "x", None).await.unwrap();

        let removed = pipeline
            .prune_synced_events(chrono::Duration::zero())
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(pipeline.db().unsynced_error_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn prune_rejects_unusable_windows() {
        let (_dir, _transport, pipeline) = pipeline(200);
        pipeline.record_error("GEN_UNKNOWN", "x", None).await.unwrap();

        assert!(pipeline
            .prune_synced_events(chrono::Duration::days(-1))
            .await
            .is_err());
        assert!(pipeline
            .prune_synced_events(chrono::Duration::days(100_000_000_000))
            .await
            .is_err());
        assert_eq!(pipeline.db().list_error_events(10).await.unwrap().len(), 1);
    }
}
