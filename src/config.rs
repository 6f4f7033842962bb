//! Facade configuration.

use serde::{Deserialize, Serialize};

use crate::sdk_version::codes;

/// Whether a known layout table entry may stand in for calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutPolicy {
    /// Use the table when the runtime version has an entry, calibrate otherwise.
    #[default]
    PreferTable,
    /// Always measure the layout from the fixtures.
    AlwaysCalibrate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectConfig {
    /// First version served by the handle-retargeting strategy.
    pub modern_sdk: u32,
    /// First version where `privateLookupIn` replaces the hand-built lookup.
    pub private_lookup_sdk: u32,
    pub layout_policy: LayoutPolicy,
}

impl Default for ReflectConfig {
    fn default() -> Self {
        ReflectConfig {
            modern_sdk: codes::OREO,
            private_lookup_sdk: codes::TIRAMISU,
            layout_policy: LayoutPolicy::PreferTable,
        }
    }
}

impl ReflectConfig {
    /// Load from JSON; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_modern_sdk(mut self, sdk: u32) -> Self {
        self.modern_sdk = sdk;
        self
    }

    pub fn with_private_lookup_sdk(mut self, sdk: u32) -> Self {
        self.private_lookup_sdk = sdk;
        self
    }

    pub fn with_layout_policy(mut self, policy: LayoutPolicy) -> Self {
        self.layout_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReflectConfig::default();
        assert_eq!(config.modern_sdk, 26);
        assert_eq!(config.private_lookup_sdk, 33);
        assert_eq!(config.layout_policy, LayoutPolicy::PreferTable);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ReflectConfig::from_json(r#"{ "layout_policy": "always_calibrate" }"#)
            .expect("valid config");
        assert_eq!(config.layout_policy, LayoutPolicy::AlwaysCalibrate);
        assert_eq!(config.modern_sdk, 26);
    }

    #[test]
    fn test_bad_json() {
        assert!(ReflectConfig::from_json(r#"{ "modern_sdk": "soon" }"#).is_err());
    }

    #[test]
    fn test_builder() {
        let config = ReflectConfig::default()
            .with_modern_sdk(28)
            .with_private_lookup_sdk(99);
        assert_eq!(config.modern_sdk, 28);
        assert_eq!(config.private_lookup_sdk, 99);
        let json = serde_json::to_string(&config).expect("serializes");
        assert_eq!(ReflectConfig::from_json(&json).expect("round trip"), config);
    }
}
