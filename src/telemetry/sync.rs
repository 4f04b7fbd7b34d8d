use chrono::Utc;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;

use crate::config::TelemetryConfig;
use crate::db::Database;
use crate::device::FeatureFlags;
use crate::models::ErrorEvent;
use crate::settings::SettingsStore;

use super::transport::{is_success, HttpTransport};
use super::types::{
    HealthResult, PathInfo, ProjectCounts, SanitizedDevice, SessionTiming, SettingsDigest,
    StorageEstimate, TelemetrySnapshot, UsageDigest,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub snapshot_ok: bool,
    pub events_ok: bool,
}

/// Host-reported reachability, the native stand-in for `navigator.onLine`.
#[derive(Debug, Clone)]
pub struct NetworkStatus(Arc<AtomicBool>);

impl NetworkStatus {
    pub fn new(online: bool) -> Self {
        Self(Arc::new(AtomicBool::new(online)))
    }

    pub fn is_online(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::Release);
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncEndpoints {
    pub snapshot_url: Option<String>,
    pub events_url: Option<String>,
}

impl SyncEndpoints {
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self {
            snapshot_url: config.snapshot_url(),
            events_url: config.events_url(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload<'a> {
    pub session_id: &'a str,
    pub client_signature: &'a str,
    pub device: &'a SanitizedDevice,
    pub session: &'a SessionTiming,
    pub usage: &'a UsageDigest,
    pub paths: &'a PathInfo,
    pub settings_digest: &'a SettingsDigest,
    pub projects: &'a ProjectCounts,
    pub health: Option<&'a HealthResult>,
    pub storage: Option<&'a StorageEstimate>,
    pub features: &'a FeatureFlags,
    pub app_version: &'a str,
}

impl<'a> From<&'a TelemetrySnapshot> for SnapshotPayload<'a> {
    fn from(snapshot: &'a TelemetrySnapshot) -> Self {
        Self {
            session_id: &snapshot.session_id,
            client_signature: &snapshot.client_signature,
            device: &snapshot.device,
            session: &snapshot.session,
            usage: &snapshot.usage,
            paths: &snapshot.paths,
            settings_digest: &snapshot.settings_digest,
            projects: &snapshot.projects,
            health: snapshot.health.as_ref(),
            storage: snapshot.storage.as_ref(),
            features: &snapshot.features,
            // Carried on the snapshot; never re-parsed out of the signature.
            app_version: &snapshot.app_version,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload<'a> {
    pub code: &'a str,
    pub message: &'a str,
    pub client_signature: &'a str,
    pub context: Option<&'a serde_json::Value>,
    pub timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsPayload<'a> {
    pub session_id: Option<&'a str>,
    pub client_signature: &'a str,
    pub events: Vec<EventPayload<'a>>,
}

impl<'a> EventsPayload<'a> {
    pub fn new(session_id: Option<&'a str>, client_signature: &'a str, events: &'a [ErrorEvent]) -> Self {
        Self {
            session_id,
            client_signature,
            events: events
                .iter()
                .map(|event| EventPayload {
                    code: &event.code,
                    message: &event.message,
                    client_signature: &event.client_signature,
                    context: event.context.as_ref(),
                    timestamp: event.timestamp,
                })
                .collect(),
        }
    }
}

/// Best-effort delivery of the latest snapshot and pending error events.
pub struct TelemetrySync {
    db: Database,
    transport: Arc<dyn HttpTransport>,
    endpoints: SyncEndpoints,
    policy: RetryPolicy,
    network: NetworkStatus,
    consent: Arc<SettingsStore>,
    deployment_enabled: bool,
    // Serializes invocations so re-triggers never interleave their bookkeeping.
    sync_lock: Mutex<()>,
}

impl TelemetrySync {
    pub fn new(
        db: Database,
        transport: Arc<dyn HttpTransport>,
        endpoints: SyncEndpoints,
        policy: RetryPolicy,
        network: NetworkStatus,
        consent: Arc<SettingsStore>,
        deployment_enabled: bool,
    ) -> Self {
        Self {
            db,
            transport,
            endpoints,
            policy,
            network,
            consent,
            deployment_enabled,
            sync_lock: Mutex::new(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.deployment_enabled && self.consent.telemetry_enabled()
    }

    pub fn network(&self) -> &NetworkStatus {
        &self.network
    }

    /// Never fails: every problem folds into a `false` for its branch.
    pub async fn sync_telemetry(&self) -> SyncOutcome {
        if !self.is_enabled() {
            log_info!("telemetry disabled; skipping sync");
            return SyncOutcome::default();
        }

        if !self.network.is_online() {
            log_info!("offline; skipping sync");
            return SyncOutcome::default();
        }

        let _guard = self.sync_lock.lock().await;

        let latest = match self.db.latest_snapshot().await {
            Ok(latest) => latest.map(|stored| stored.snapshot),
            Err(err) => {
                log_error!("failed to load latest snapshot: {err:#}");
                None
            }
        };

        let snapshot_ok = match &latest {
            Some(snapshot) => self.sync_snapshot(snapshot).await,
            None => false,
        };
        let events_ok = self.sync_events(latest.as_ref()).await;

        log_info!("telemetry sync finished: snapshot_ok={snapshot_ok} events_ok={events_ok}");
        SyncOutcome {
            snapshot_ok,
            events_ok,
        }
    }

    async fn sync_snapshot(&self, snapshot: &TelemetrySnapshot) -> bool {
        let Some(url) = self.endpoints.snapshot_url.as_deref() else {
            log_warn!("no snapshot endpoint configured");
            return false;
        };

        let body = match serde_json::to_value(SnapshotPayload::from(snapshot)) {
            Ok(body) => body,
            Err(err) => {
                log_error!("failed to encode snapshot {}: {err}", snapshot.id);
                return false;
            }
        };

        if !self.deliver(url, &body).await {
            return false;
        }

        match self.db.mark_snapshot_synced(&snapshot.id, Utc::now()).await {
            Ok(()) => true,
            Err(err) => {
                log_error!("snapshot {} delivered but not recorded: {err:#}", snapshot.id);
                false
            }
        }
    }

    async fn sync_events(&self, latest: Option<&TelemetrySnapshot>) -> bool {
        let events = match self.db.unsynced_error_events().await {
            Ok(events) => events,
            Err(err) => {
                log_error!("failed to load unsynced events: {err:#}");
                return false;
            }
        };

        if events.is_empty() {
            return false;
        }

        let Some(url) = self.endpoints.events_url.as_deref() else {
            log_warn!("no events endpoint configured");
            return false;
        };

        let client_signature = latest
            .map(|snapshot| snapshot.client_signature.as_str())
            .or_else(|| events.last().map(|event| event.client_signature.as_str()))
            .unwrap_or_default();
        let payload = EventsPayload::new(
            latest.map(|snapshot| snapshot.session_id.as_str()),
            client_signature,
            &events,
        );

        let body = match serde_json::to_value(&payload) {
            Ok(body) => body,
            Err(err) => {
                log_error!("failed to encode {} events: {err}", events.len());
                return false;
            }
        };

        if !self.deliver(url, &body).await {
            return false;
        }

        // Only after a confirmed 2xx.
        let ids: Vec<String> = events.iter().map(|event| event.id.clone()).collect();
        match self.db.mark_events_synced(&ids, Utc::now()).await {
            Ok(changed) => {
                log_info!("delivered {} events ({changed} newly marked)", ids.len());
                true
            }
            Err(err) => {
                log_error!("events delivered but not marked synced: {err:#}");
                false
            }
        }
    }

    /// Up to `max_retries + 1` POSTs with a fixed pause between attempts.
    async fn deliver(&self, url: &str, body: &serde_json::Value) -> bool {
        let attempts = self.policy.attempts();

        for attempt in 1..=attempts {
            match self.transport.post_json(url, body).await {
                Ok(status) if is_success(status) => {
                    log_debug!("POST {url} accepted with {status} on attempt {attempt}");
                    return true;
                }
                Ok(status) => {
                    log_warn!("POST {url} attempt {attempt}/{attempts} answered {status}");
                }
                Err(err) => {
                    log_warn!("POST {url} attempt {attempt}/{attempts} failed: {err:#}");
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        log_error!("giving up on {url} after {attempts} attempts");
        false
    }
}

/// Event histogram keyed by code, for diagnostics views.
pub fn events_by_code(events: &[ErrorEvent]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for event in events {
        *counts.entry(event.code.as_str()).or_default() += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ConnectivityTier, DeviceTier};
    use crate::telemetry::types::{PathInfo, ProjectCounts, UsageDigest};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;
    use tokio::time::Instant;

    const SNAPSHOT_URL: &str = "http://collector.local/api/telemetry/snapshot";
    const EVENTS_URL: &str = "http://collector.local/api/telemetry/events";

    /// Replies from a per-url queue, then from `fallback` (`None` = refused).
    #[derive(Default)]
    struct QueueTransport {
        replies: StdMutex<HashMap<String, VecDeque<u16>>>,
        fallback: Option<u16>,
        posts: StdMutex<Vec<(String, serde_json::Value)>>,
    }

    impl QueueTransport {
        fn answering(fallback: Option<u16>) -> Self {
            Self {
                fallback,
                ..Default::default()
            }
        }

        fn script(self, url: &str, statuses: &[u16]) -> Self {
            self.replies
                .lock()
                .unwrap()
                .insert(url.to_string(), statuses.iter().copied().collect());
            self
        }

        fn posts_to(&self, url: &str) -> Vec<serde_json::Value> {
            self.posts
                .lock()
                .unwrap()
                .iter()
                .filter(|(target, _)| target == url)
                .map(|(_, body)| body.clone())
                .collect()
        }

        fn post_count(&self) -> usize {
            self.posts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for QueueTransport {
        async fn get(&self, _url: &str, _timeout: Duration) -> Result<u16> {
            Err(anyhow!("not used"))
        }

        async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<u16> {
            self.posts
                .lock()
                .unwrap()
                .push((url.to_string(), body.clone()));
            let scripted = self
                .replies
                .lock()
                .unwrap()
                .get_mut(url)
                .and_then(VecDeque::pop_front);
            scripted
                .or(self.fallback)
                .ok_or_else(|| anyhow!("connection refused"))
        }
    }

    struct Fixture {
        _dir: TempDir,
        db: Database,
        settings: Arc<SettingsStore>,
        network: NetworkStatus,
        transport: Arc<QueueTransport>,
    }

    impl Fixture {
        fn new(transport: QueueTransport) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Database::new(dir.path().join("telemetry.db")).unwrap();
            let settings = Arc::new(SettingsStore::new(dir.path().join("settings.json")).unwrap());
            Self {
                _dir: dir,
                db,
                settings,
                network: NetworkStatus::new(true),
                transport: Arc::new(transport),
            }
        }

        fn sync(&self, deployment_enabled: bool) -> TelemetrySync {
            TelemetrySync::new(
                self.db.clone(),
                self.transport.clone(),
                SyncEndpoints {
                    snapshot_url: Some(SNAPSHOT_URL.into()),
                    events_url: Some(EVENTS_URL.into()),
                },
                RetryPolicy {
                    max_retries: 3,
                    delay: Duration::from_secs(2),
                },
                self.network.clone(),
                self.settings.clone(),
                deployment_enabled,
            )
        }
    }

    fn snapshot(id: &str) -> TelemetrySnapshot {
        let now = Utc::now();
        TelemetrySnapshot {
            id: id.into(),
            timestamp: now,
            session_id: "sess-1".into(),
            client_signature: "v3.4.0-abc123".into(),
            app_version: "3.4.0".into(),
            device: SanitizedDevice {
                device_tier: DeviceTier::High,
                connectivity_tier: ConnectivityTier::FourG,
                ..SanitizedDevice::unknown()
            },
            session: SessionTiming {
                started_at: now,
                duration_ms: 0,
            },
            usage: UsageDigest::default(),
            paths: PathInfo::default(),
            settings_digest: SettingsDigest {
                provider: "flux".into(),
                font_size: 14,
                compact_mode: false,
                show_grid: true,
            },
            projects: ProjectCounts::default(),
            health: None,
            storage: None,
            features: FeatureFlags::new(),
        }
    }

    #[tokio::test]
    async fn disabled_makes_no_calls() {
        let fixture = Fixture::new(QueueTransport::answering(Some(200)));
        fixture.db.insert_snapshot(&snapshot("s1")).await.unwrap();

        let outcome = fixture.sync(false).sync_telemetry().await;
        assert_eq!(outcome, SyncOutcome::default());

        fixture.settings.set_telemetry_enabled(false).unwrap();
        let outcome = fixture.sync(true).sync_telemetry().await;
        assert_eq!(outcome, SyncOutcome::default());
        assert_eq!(fixture.transport.post_count(), 0);
    }

    #[tokio::test]
    async fn offline_makes_no_calls() {
        let fixture = Fixture::new(QueueTransport::answering(Some(200)));
        fixture.db.insert_snapshot(&snapshot("s1")).await.unwrap();
        fixture.network.set_online(false);

        let outcome = fixture.sync(true).sync_telemetry().await;
        assert_eq!(outcome, SyncOutcome::default());
        assert_eq!(fixture.transport.post_count(), 0);
    }

    #[tokio::test]
    async fn nothing_to_send_is_all_false() {
        let fixture = Fixture::new(QueueTransport::answering(Some(200)));

        let outcome = fixture.sync(true).sync_telemetry().await;
        assert_eq!(outcome, SyncOutcome::default());
        assert_eq!(fixture.transport.post_count(), 0);
    }

    #[tokio::test]
    async fn delivers_snapshot_and_marks_it() {
        let fixture = Fixture::new(QueueTransport::answering(Some(200)));
        fixture.db.insert_snapshot(&snapshot("s1")).await.unwrap();

        let outcome = fixture.sync(true).sync_telemetry().await;
        assert!(outcome.snapshot_ok);
        assert!(!outcome.events_ok);

        let posted = fixture.transport.posts_to(SNAPSHOT_URL);
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0]["appVersion"], "3.4.0");
        assert_eq!(posted[0]["sessionId"], "sess-1");
        assert_eq!(posted[0]["device"]["deviceTier"], "high");
        assert!(posted[0]["device"].get("memoryGib").is_none());

        let stored = fixture.db.latest_snapshot().await.unwrap().unwrap();
        assert!(stored.last_synced_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_snapshot_retries_then_gives_up() {
        let fixture = Fixture::new(QueueTransport::answering(Some(500)));
        fixture.db.insert_snapshot(&snapshot("s1")).await.unwrap();

        let started = Instant::now();
        let outcome = fixture.sync(true).sync_telemetry().await;

        assert!(!outcome.snapshot_ok);
        assert_eq!(fixture.transport.posts_to(SNAPSHOT_URL).len(), 4);
        assert!(started.elapsed() >= Duration::from_secs(6));

        let stored = fixture.db.latest_snapshot().await.unwrap().unwrap();
        assert!(stored.last_synced_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_a_later_attempt() {
        let transport = QueueTransport::answering(Some(200)).script(SNAPSHOT_URL, &[503, 502]);
        let fixture = Fixture::new(transport);
        fixture.db.insert_snapshot(&snapshot("s1")).await.unwrap();

        let outcome = fixture.sync(true).sync_telemetry().await;
        assert!(outcome.snapshot_ok);
        assert_eq!(fixture.transport.posts_to(SNAPSHOT_URL).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn branches_are_independent() {
        let transport = QueueTransport::answering(Some(200)).script(SNAPSHOT_URL, &[500, 500, 500, 500]);
        let fixture = Fixture::new(transport);
        fixture.db.insert_snapshot(&snapshot("s1")).await.unwrap();
        let event = ErrorEvent::new("GEN_TIMEOUT", "took too long", None, "v3.4.0-abc123");
        fixture.db.insert_error_event(&event).await.unwrap();

        let outcome = fixture.sync(true).sync_telemetry().await;
        assert_eq!(
            outcome,
            SyncOutcome {
                snapshot_ok: false,
                events_ok: true
            }
        );
        assert!(fixture.db.unsynced_error_events().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn undelivered_events_stay_unsynced() {
        let fixture = Fixture::new(QueueTransport::answering(None));
        let event = ErrorEvent::new("GEN_PROVIDER", "boom", None, "v3.4.0-abc123");
        fixture.db.insert_error_event(&event).await.unwrap();

        let outcome = fixture.sync(true).sync_telemetry().await;
        assert!(!outcome.events_ok);
        assert_eq!(fixture.transport.posts_to(EVENTS_URL).len(), 4);

        let pending = fixture.db.unsynced_error_events().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, event.id);
    }

    #[tokio::test]
    async fn events_ship_as_one_batch_once() {
        let fixture = Fixture::new(QueueTransport::answering(Some(202)));
        fixture.db.insert_snapshot(&snapshot("s1")).await.unwrap();
        for code in ["GEN_TIMEOUT", "GEN_RATE_LIMIT", "GEN_TIMEOUT"] {
            let event = ErrorEvent::new(code, "failed", None, "v3.4.0-abc123");
            fixture.db.insert_error_event(&event).await.unwrap();
        }

        let sync = fixture.sync(true);
        let first = sync.sync_telemetry().await;
        assert!(first.events_ok);

        let batches = fixture.transport.posts_to(EVENTS_URL);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0]["sessionId"], "sess-1");
        assert_eq!(batches[0]["events"].as_array().unwrap().len(), 3);

        let second = sync.sync_telemetry().await;
        assert!(!second.events_ok);
        assert_eq!(fixture.transport.posts_to(EVENTS_URL).len(), 1);
    }

    #[test]
    fn counts_events_by_code() {
        let events = vec![
            ErrorEvent::new("A", "x", None, "sig"),
            ErrorEvent::new("B", "x", None, "sig"),
            ErrorEvent::new("A", "x", None, "sig"),
        ];
        let counts = events_by_code(&events);
        assert_eq!(counts.get("A"), Some(&2));
        assert_eq!(counts.get("B"), Some(&1));
    }

    #[test]
    fn attempt_count_saturates() {
        let policy = RetryPolicy {
            max_retries: u32::MAX,
            delay: Duration::ZERO,
        };
        assert_eq!(policy.attempts(), u32::MAX);

        let policy = RetryPolicy {
            max_retries: 0,
            delay: Duration::ZERO,
        };
        assert_eq!(policy.attempts(), 1);
    }
}
