use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse compute class of the client. Ordered `Low < Medium < High`;
/// `Unknown` sorts first and only appears when no device signals were collected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceTier {
    Unknown,
    Low,
    Medium,
    High,
}

impl DeviceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceTier::Unknown => "unknown",
            DeviceTier::Low => "low",
            DeviceTier::Medium => "medium",
            DeviceTier::High => "high",
        }
    }
}

impl Default for DeviceTier {
    fn default() -> Self {
        DeviceTier::Unknown
    }
}

impl fmt::Display for DeviceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConnectivityTier {
    #[serde(rename = "slow")]
    Slow,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[serde(rename = "unknown")]
    Unknown,
}

impl ConnectivityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityTier::Slow => "slow",
            ConnectivityTier::ThreeG => "3g",
            ConnectivityTier::FourG => "4g",
            ConnectivityTier::Unknown => "unknown",
        }
    }
}

impl Default for ConnectivityTier {
    fn default() -> Self {
        ConnectivityTier::Unknown
    }
}

impl fmt::Display for ConnectivityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a device from its logical core count and memory estimate (GiB).
///
/// A zero core count is read as a single core and missing memory as zero.
/// The first matching row wins; a 4 GiB single-core device lands in `High`.
pub fn derive_device_tier(cores: u32, memory_gib: Option<f64>) -> DeviceTier {
    let cores = if cores == 0 { 1 } else { cores };
    let memory = memory_gib.unwrap_or(0.0);

    if memory >= 8.0 && cores >= 4 {
        DeviceTier::High
    } else if memory >= 4.0 || cores >= 4 {
        DeviceTier::High
    } else if memory >= 2.0 || cores >= 2 {
        DeviceTier::Medium
    } else {
        DeviceTier::Low
    }
}

/// Classify a network effective-type hint such as `"4g"` or `"slow-2g"`.
pub fn derive_connectivity_tier(effective_type: Option<&str>) -> ConnectivityTier {
    let Some(raw) = effective_type.map(str::trim).filter(|value| !value.is_empty()) else {
        return ConnectivityTier::Unknown;
    };

    match raw.to_ascii_lowercase().as_str() {
        "4g" | "5g" => ConnectivityTier::FourG,
        "3g" => ConnectivityTier::ThreeG,
        "2g" | "slow-2g" => ConnectivityTier::Slow,
        _ => ConnectivityTier::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_tier_scenarios() {
        assert_eq!(derive_device_tier(8, Some(16.0)), DeviceTier::High);
        assert_eq!(derive_device_tier(2, Some(1.0)), DeviceTier::Medium);
        assert_eq!(derive_device_tier(1, Some(0.0)), DeviceTier::Low);
        assert_eq!(derive_device_tier(0, None), DeviceTier::Low);
    }

    #[test]
    fn memory_alone_at_four_gib_is_high() {
        assert_eq!(derive_device_tier(1, Some(4.0)), DeviceTier::High);
        assert_eq!(derive_device_tier(1, Some(3.9)), DeviceTier::Medium);
    }

    #[test]
    fn device_tier_is_monotonic() {
        let memories = [None, Some(0.5), Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(8.0), Some(32.0)];
        for memory in memories {
            let mut previous = DeviceTier::Low;
            for cores in 0..=16 {
                let tier = derive_device_tier(cores, memory);
                assert!(tier >= previous, "tier dropped at cores={cores} memory={memory:?}");
                previous = tier;
            }
        }

        for cores in 0..=16 {
            let mut previous = DeviceTier::Low;
            for memory in memories {
                let tier = derive_device_tier(cores, memory);
                assert!(tier >= previous, "tier dropped at cores={cores} memory={memory:?}");
                previous = tier;
            }
        }
    }

    #[test]
    fn connectivity_scenarios() {
        assert_eq!(derive_connectivity_tier(Some("4G")), ConnectivityTier::FourG);
        assert_eq!(derive_connectivity_tier(Some("5g")), ConnectivityTier::FourG);
        assert_eq!(derive_connectivity_tier(Some("3g")), ConnectivityTier::ThreeG);
        assert_eq!(derive_connectivity_tier(Some("slow-2g")), ConnectivityTier::Slow);
        assert_eq!(derive_connectivity_tier(Some("2g")), ConnectivityTier::Slow);
        assert_eq!(derive_connectivity_tier(Some("")), ConnectivityTier::Unknown);
        assert_eq!(derive_connectivity_tier(Some("wifi")), ConnectivityTier::Unknown);
        assert_eq!(derive_connectivity_tier(None), ConnectivityTier::Unknown);
    }

    #[test]
    fn tiers_serialize_to_wire_names() {
        assert_eq!(serde_json::to_string(&DeviceTier::Medium).unwrap(), "\"medium\"");
        assert_eq!(serde_json::to_string(&ConnectivityTier::ThreeG).unwrap(), "\"3g\"");
    }
}
