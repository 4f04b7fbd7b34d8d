mod probe;
mod tiers;

pub use probe::{
    probe_device, probe_features, DeviceSignals, FeatureFlags, HostCapabilities, Orientation,
    RuntimeEnvironment, FEATURE_BACKGROUND_SYNC, FEATURE_INDEXED_DB, FEATURE_SERVICE_WORKER,
    FEATURE_WEBGL, FEATURE_WORKERS,
};
pub use tiers::{derive_connectivity_tier, derive_device_tier, ConnectivityTier, DeviceTier};
