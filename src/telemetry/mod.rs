mod digest;
mod gather;
mod health;
mod sync;
mod transport;
mod types;

pub use digest::{digest_gathered_data, tiers_for};
pub use gather::{
    gather, gather_from_stores, gather_storage_estimate, DiskStorageEstimator, GatherSources,
    RawStorage, StorageEstimator,
};
pub use health::{aggregate_status, check_health, check_service, ServiceTarget, HEALTH_PATHS, HEALTH_TIMEOUT};
pub use sync::{
    events_by_code, EventPayload, EventsPayload, NetworkStatus, RetryPolicy, SnapshotPayload,
    SyncEndpoints, SyncOutcome, TelemetrySync,
};
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::{
    GatheredData, HealthResult, HealthStatus, PathInfo, ProjectCounts, SanitizedDevice,
    ServiceHealth, SessionTiming, SettingsDigest, StorageEstimate, StoreDigest, TelemetrySnapshot,
    UsageDigest,
};
