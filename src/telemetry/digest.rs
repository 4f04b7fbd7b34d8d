use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::device::{derive_connectivity_tier, derive_device_tier, ConnectivityTier, DeviceTier};
use crate::signature::{compute_client_signature, SignatureInputs};

use super::types::{GatheredData, HealthResult, SanitizedDevice, SessionTiming, TelemetrySnapshot};

/// Turn one gather cycle into a signed snapshot stamped with the current time.
pub fn digest_gathered_data(
    gathered: &GatheredData,
    health: Option<&HealthResult>,
    signature: &SignatureInputs,
) -> Result<TelemetrySnapshot> {
    digest_at(gathered, health, signature, Utc::now())
}

pub(crate) fn digest_at(
    gathered: &GatheredData,
    health: Option<&HealthResult>,
    signature: &SignatureInputs,
    now: DateTime<Utc>,
) -> Result<TelemetrySnapshot> {
    let (device_tier, connectivity_tier) = tiers_for(gathered);

    let device = match &gathered.device {
        Some(signals) => SanitizedDevice {
            platform: signals.platform.clone(),
            screen_width: signals.screen_width,
            screen_height: signals.screen_height,
            pixel_ratio: signals.pixel_ratio,
            orientation: Some(signals.orientation),
            cores: signals.cores,
            language: signals.language.clone(),
            timezone: signals.timezone.clone(),
            device_tier,
            connectivity_tier,
        },
        None => SanitizedDevice::unknown(),
    };

    let started_at = gathered.stores.session_started_at;
    let duration_ms = (now - started_at).num_milliseconds();
    if duration_ms < 0 {
        bail!(
            "session {} starts at {started_at}, after digest time {now}",
            gathered.stores.session_id
        );
    }

    Ok(TelemetrySnapshot {
        id: Uuid::new_v4().to_string(),
        timestamp: now,
        session_id: gathered.stores.session_id.clone(),
        client_signature: compute_client_signature(signature, device_tier, connectivity_tier),
        app_version: signature.app_version().to_string(),
        device,
        session: SessionTiming {
            started_at,
            duration_ms,
        },
        usage: gathered.stores.usage.clone(),
        paths: gathered.stores.paths.clone(),
        settings_digest: gathered.stores.settings_digest.clone(),
        projects: gathered.stores.projects,
        health: health.cloned(),
        storage: gathered.storage,
        features: gathered.features.clone(),
    })
}

/// Tiers for the gathered device, `Unknown` for both when no device was read.
pub fn tiers_for(gathered: &GatheredData) -> (DeviceTier, ConnectivityTier) {
    match &gathered.device {
        Some(signals) => (
            derive_device_tier(signals.cores, signals.memory_gib),
            derive_connectivity_tier(signals.effective_type.as_deref()),
        ),
        None => (DeviceTier::Unknown, ConnectivityTier::Unknown),
    }
}
