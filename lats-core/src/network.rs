//! Connectivity and link-quality types.

use serde::{Deserialize, Serialize};

/// Effective connection type as reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    Cellular2g,
    #[serde(rename = "3g")]
    Cellular3g,
    #[serde(rename = "4g")]
    Cellular4g,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl EffectiveType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => EffectiveType::Slow2g,
            "2g" => EffectiveType::Cellular2g,
            "3g" => EffectiveType::Cellular3g,
            "4g" => EffectiveType::Cellular4g,
            _ => EffectiveType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EffectiveType::Slow2g => "slow-2g",
            EffectiveType::Cellular2g => "2g",
            EffectiveType::Cellular3g => "3g",
            EffectiveType::Cellular4g => "4g",
            EffectiveType::Unknown => "unknown",
        }
    }
}

/// One reading of the connectivity signal.
///
/// `Default` is the best-effort reading used when the platform exposes no
/// link metadata: online, unknown type, zero downlink and rtt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub online: bool,
    pub effective_type: EffectiveType,
    /// Estimated downlink in Mbit/s.
    pub downlink: f64,
    /// Estimated round-trip time in milliseconds.
    pub rtt: u32,
    pub save_data: bool,
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self {
            online: true,
            effective_type: EffectiveType::Unknown,
            downlink: 0.0,
            rtt: 0,
            save_data: false,
        }
    }
}

impl NetworkStatus {
    pub fn offline() -> Self {
        Self {
            online: false,
            ..Self::default()
        }
    }
}

/// Coarse quality bucket for advisory messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Offline,
    Poor,
    Fair,
    Good,
    Unknown,
}

impl ConnectionQuality {
    pub fn classify(status: &NetworkStatus) -> Self {
        if !status.online {
            return ConnectionQuality::Offline;
        }
        match status.effective_type {
            EffectiveType::Slow2g | EffectiveType::Cellular2g => ConnectionQuality::Poor,
            EffectiveType::Cellular3g => ConnectionQuality::Fair,
            EffectiveType::Cellular4g => ConnectionQuality::Good,
            EffectiveType::Unknown => ConnectionQuality::Unknown,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ConnectionQuality::Offline => "No internet connection",
            ConnectionQuality::Poor => "Slow connection detected",
            ConnectionQuality::Fair => "Moderate connection speed",
            ConnectionQuality::Good => "Good connection speed",
            ConnectionQuality::Unknown => "Connection quality unknown",
        }
    }
}
