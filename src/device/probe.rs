use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};
use sysinfo::System;

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Canonically ordered capability map. `BTreeMap` keeps keys sorted, so the
/// same capability set always iterates (and hashes) the same way.
pub type FeatureFlags = BTreeMap<String, bool>;

pub const FEATURE_WEBGL: &str = "webgl";
pub const FEATURE_WORKERS: &str = "workers";
pub const FEATURE_INDEXED_DB: &str = "indexedDB";
pub const FEATURE_SERVICE_WORKER: &str = "serviceWorker";
pub const FEATURE_BACKGROUND_SYNC: &str = "backgroundSync";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    Landscape,
    Portrait,
}

/// What the hosting webview reports about itself. Every field is optional;
/// restricted environments simply leave them out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostCapabilities {
    pub webgl: Option<bool>,
    pub service_worker: Option<bool>,
    pub background_sync: Option<bool>,
    pub screen_width: Option<u32>,
    pub screen_height: Option<u32>,
    pub pixel_ratio: Option<f64>,
    pub orientation: Option<Orientation>,
    pub effective_type: Option<String>,
    /// Anything else the host wants folded into the feature fingerprint.
    pub extra: BTreeMap<String, bool>,
}

/// Raw device signals read at gather time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSignals {
    pub platform: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub pixel_ratio: f64,
    pub orientation: Orientation,
    pub cores: u32,
    pub memory_gib: Option<f64>,
    pub language: String,
    pub timezone: String,
    pub effective_type: Option<String>,
}

/// Process-side facts the feature probe needs.
#[derive(Debug, Clone)]
pub struct RuntimeEnvironment {
    pub worker_threads: usize,
    pub storage_writable: bool,
}

impl RuntimeEnvironment {
    pub fn detect(data_dir: &Path) -> Self {
        Self {
            worker_threads: logical_cores() as usize,
            storage_writable: is_writable_dir(data_dir),
        }
    }
}

pub fn probe_features(host: &HostCapabilities, runtime: &RuntimeEnvironment) -> FeatureFlags {
    let mut flags = FeatureFlags::new();

    for (name, available) in &host.extra {
        flags.insert(name.clone(), *available);
    }

    flags.insert(FEATURE_WEBGL.into(), host.webgl.unwrap_or(false));
    flags.insert(FEATURE_WORKERS.into(), runtime.worker_threads > 1);
    flags.insert(FEATURE_INDEXED_DB.into(), runtime.storage_writable);
    flags.insert(FEATURE_SERVICE_WORKER.into(), host.service_worker.unwrap_or(false));
    flags.insert(
        FEATURE_BACKGROUND_SYNC.into(),
        host.background_sync.unwrap_or(false),
    );

    flags
}

pub fn probe_device(host: &HostCapabilities) -> DeviceSignals {
    let screen_width = host.screen_width.unwrap_or(0);
    let screen_height = host.screen_height.unwrap_or(0);
    let orientation = host.orientation.unwrap_or(if screen_height > screen_width {
        Orientation::Portrait
    } else {
        Orientation::Landscape
    });

    DeviceSignals {
        platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        screen_width,
        screen_height,
        pixel_ratio: host.pixel_ratio.unwrap_or(1.0),
        orientation,
        cores: logical_cores(),
        memory_gib: memory_gib(),
        language: language_tag(),
        timezone: chrono::Local::now().offset().to_string(),
        effective_type: host
            .effective_type
            .clone()
            .filter(|value| !value.trim().is_empty()),
    }
}

fn logical_cores() -> u32 {
    std::thread::available_parallelism()
        .map(|count| count.get() as u32)
        .unwrap_or(0)
}

fn memory_gib() -> Option<f64> {
    let mut system = System::new();
    system.refresh_memory();

    let total = system.total_memory();
    if total == 0 {
        return None;
    }

    // Round to one decimal like a browser's coarse deviceMemory hint.
    Some((total as f64 / BYTES_PER_GIB * 10.0).round() / 10.0)
}

fn language_tag() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.is_empty())
        .map(|raw| normalize_locale(&raw))
        .unwrap_or_else(|| "und".to_string())
}

/// `en_US.UTF-8` -> `en-US`; `C`/`POSIX` carry no language.
pub(crate) fn normalize_locale(raw: &str) -> String {
    let base = raw.split(['.', '@']).next().unwrap_or_default();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return "und".to_string();
    }
    base.replace('_', "-")
}

fn is_writable_dir(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(".write-probe");
    let writable = fs::write(&probe, b"").is_ok();
    let _ = fs::remove_file(&probe);
    writable
}
