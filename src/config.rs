use std::time::Duration;

use crate::signature::{DEFAULT_APP_VERSION, DEFAULT_BUILD_ID};
use crate::telemetry::{ServiceTarget, HEALTH_TIMEOUT};

pub const MAX_RETRIES: u32 = 3;
/// Upper bound for `STUDIO_TELEMETRY_MAX_RETRIES`; larger values are clamped.
pub const MAX_RETRIES_CEILING: u32 = 10;
pub const RETRY_DELAY: Duration = Duration::from_secs(2);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const SNAPSHOT_PATH: &str = "/api/telemetry/snapshot";
const EVENTS_PATH: &str = "/api/telemetry/events";

/// Build identifier baked in by `build.rs`.
pub const EMBEDDED_BUILD_ID: &str = env!("STUDIO_EMBEDDED_BUILD_ID");

/// Deployment-level telemetry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    pub app_version: String,
    pub build_id: String,
    pub collector_url: Option<String>,
    pub telemetry_enabled: bool,
    pub health_services: Vec<ServiceTarget>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub health_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            app_version: DEFAULT_APP_VERSION.to_string(),
            build_id: DEFAULT_BUILD_ID.to_string(),
            collector_url: None,
            telemetry_enabled: true,
            health_services: Vec::new(),
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
            health_timeout: HEALTH_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

impl TelemetryConfig {
    /// Read `STUDIO_*` variables. Every setting has a fallback, so this never fails.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let collector_url = get("STUDIO_TELEMETRY_URL").map(|url| url.trim_end_matches('/').to_string());

        let health_services = match get("STUDIO_HEALTH_URLS") {
            Some(raw) => parse_service_targets(&raw),
            None => collector_url
                .iter()
                .map(|url| ServiceTarget::new("collector", url.clone()))
                .collect(),
        };

        Self {
            app_version: get("STUDIO_APP_VERSION")
                .map(|version| version.trim_start_matches('v').to_string())
                .unwrap_or(defaults.app_version),
            build_id: get("STUDIO_BUILD_ID").unwrap_or_else(|| EMBEDDED_BUILD_ID.to_string()),
            collector_url,
            telemetry_enabled: get("STUDIO_TELEMETRY_ENABLED")
                .map(|value| parse_flag(&value))
                .unwrap_or(defaults.telemetry_enabled),
            health_services,
            max_retries: get("STUDIO_TELEMETRY_MAX_RETRIES")
                .and_then(|value| value.parse::<u32>().ok())
                .map(|retries| retries.min(MAX_RETRIES_CEILING))
                .unwrap_or(defaults.max_retries),
            retry_delay: get("STUDIO_TELEMETRY_RETRY_DELAY_MS")
                .and_then(|value| value.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            health_timeout: defaults.health_timeout,
            request_timeout: defaults.request_timeout,
        }
    }

    pub fn snapshot_url(&self) -> Option<String> {
        self.collector_url
            .as_ref()
            .map(|base| format!("{base}{SNAPSHOT_PATH}"))
    }

    pub fn events_url(&self) -> Option<String> {
        self.collector_url
            .as_ref()
            .map(|base| format!("{base}{EVENTS_PATH}"))
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// `name=url,name2=url2`; a bare url is named after its position.
fn parse_service_targets(raw: &str) -> Vec<ServiceTarget> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(index, entry)| match entry.split_once('=') {
            Some((name, url)) => ServiceTarget::new(name.trim(), url.trim()),
            None => ServiceTarget::new(format!("service-{}", index + 1), entry),
        })
        .collect()
}
