use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::device::{ConnectivityTier, DeviceSignals, DeviceTier, FeatureFlags, Orientation};
use crate::models::UsageCounters;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageEstimate {
    pub quota: u64,
    pub usage: u64,
    pub usage_percent: u32,
}

impl StorageEstimate {
    pub fn new(quota: u64, usage: u64) -> Self {
        let usage_percent = if quota == 0 {
            0
        } else {
            (usage as f64 / quota as f64 * 100.0).round() as u32
        };
        Self {
            quota,
            usage,
            usage_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub name: String,
    pub status: HealthStatus,
    /// Endpoint that produced the status, if any answered.
    pub url: Option<String>,
    pub http_status: Option<u16>,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResult {
    pub status: HealthStatus,
    pub services: Vec<ServiceHealth>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDigest {
    pub provider: String,
    pub font_size: u32,
    pub compact_mode: bool,
    pub show_grid: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCounts {
    pub total: u64,
    pub recent: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathInfo {
    pub current_project_path: Option<String>,
    pub folder_count: u64,
    pub asset_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageDigest {
    #[serde(flatten)]
    pub counters: UsageCounters,
    pub canvas_item_count: u64,
    pub log_entries_by_type: BTreeMap<String, u64>,
}

/// Everything read from the host containers in one cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreDigest {
    pub session_id: String,
    pub session_started_at: DateTime<Utc>,
    pub usage: UsageDigest,
    pub paths: PathInfo,
    pub settings_digest: SettingsDigest,
    pub projects: ProjectCounts,
}

/// One gather cycle's output. Built once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatheredData {
    pub device: Option<DeviceSignals>,
    pub storage: Option<StorageEstimate>,
    pub features: FeatureFlags,
    #[serde(flatten)]
    pub stores: StoreDigest,
}

/// Device record as persisted and shipped: no memory estimate, no raw
/// network type. Those only feed the tiers and the signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedDevice {
    pub platform: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub pixel_ratio: f64,
    pub orientation: Option<Orientation>,
    pub cores: u32,
    pub language: String,
    pub timezone: String,
    pub device_tier: DeviceTier,
    pub connectivity_tier: ConnectivityTier,
}

impl SanitizedDevice {
    pub fn unknown() -> Self {
        Self {
            platform: "unknown".into(),
            screen_width: 0,
            screen_height: 0,
            pixel_ratio: 0.0,
            orientation: None,
            cores: 0,
            language: "und".into(),
            timezone: "unknown".into(),
            device_tier: DeviceTier::Unknown,
            connectivity_tier: ConnectivityTier::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionTiming {
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// The persisted, digest-stamped telemetry record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub client_signature: String,
    pub app_version: String,
    pub device: SanitizedDevice,
    pub session: SessionTiming,
    pub usage: UsageDigest,
    pub paths: PathInfo,
    pub settings_digest: SettingsDigest,
    pub projects: ProjectCounts,
    pub health: Option<HealthResult>,
    pub storage: Option<StorageEstimate>,
    pub features: FeatureFlags,
}
