//! Offline client fingerprinting.
//!
//! A client signature looks like `v1.4.2-k3x9qa` and correlates bug reports
//! with a coarse build/device/network/feature profile. It is a diagnostic
//! aid, not a security boundary: the 6-character code accepts collisions.

use serde::{Deserialize, Serialize};

use crate::device::{ConnectivityTier, DeviceTier, FeatureFlags};

pub const DEFAULT_APP_VERSION: &str = "0.1.0";
pub const DEFAULT_BUILD_ID: &str = "local";

const DJB2_SEED: u32 = 5381;
const SHORT_CODE_LEN: usize = 6;
const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// djb2 (xor variant) over UTF-16 code units with wrapping 32-bit arithmetic,
/// so the result matches what the web client computes for the same string.
pub fn hash_string(input: &str) -> u32 {
    input
        .encode_utf16()
        .fold(DJB2_SEED, |hash, unit| hash.wrapping_mul(33) ^ u32::from(unit))
}

/// Base-36 rendering of `value`, zero-padded on the left to six characters
/// and cut to the first six when longer.
pub fn to_short_code(value: u32) -> String {
    let mut digits = Vec::with_capacity(7);
    let mut remaining = value;
    loop {
        digits.push(BASE36_DIGITS[(remaining % 36) as usize]);
        remaining /= 36;
        if remaining == 0 {
            break;
        }
    }
    digits.reverse();

    let mut code = String::with_capacity(SHORT_CODE_LEN);
    for _ in digits.len()..SHORT_CODE_LEN {
        code.push('0');
    }
    code.extend(digits.iter().map(|&digit| digit as char));
    code.truncate(SHORT_CODE_LEN);
    code
}

pub fn feature_hash(flags: &FeatureFlags) -> String {
    // BTreeMap iteration is already lexicographic by key.
    let canonical = flags
        .iter()
        .map(|(name, available)| format!("{name}:{available}"))
        .collect::<Vec<_>>()
        .join(",");
    to_short_code(hash_string(&canonical))
}

/// Everything besides the tiers that feeds the signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInputs {
    pub app_version: String,
    pub build_id: String,
    pub features: FeatureFlags,
}

impl SignatureInputs {
    pub fn new(app_version: impl Into<String>, build_id: impl Into<String>, features: FeatureFlags) -> Self {
        Self {
            app_version: app_version.into(),
            build_id: build_id.into(),
            features,
        }
    }

    pub fn app_version(&self) -> &str {
        non_empty_or(&self.app_version, DEFAULT_APP_VERSION)
    }

    pub fn build_id(&self) -> &str {
        non_empty_or(&self.build_id, DEFAULT_BUILD_ID)
    }
}

pub fn compute_client_signature(
    inputs: &SignatureInputs,
    device_tier: DeviceTier,
    connectivity_tier: ConnectivityTier,
) -> String {
    let app_version = inputs.app_version();
    let material = format!(
        "{app_version}-{}-{device_tier}-{connectivity_tier}-{}",
        inputs.build_id(),
        feature_hash(&inputs.features),
    );
    format!("v{app_version}-{}", to_short_code(hash_string(&material)))
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed
    }
}
