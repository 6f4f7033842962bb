//! Strategy detection by runtime version

use crate::config::ReflectConfig;

/// Which reflection strategy serves a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Official reflection with `setAccessible`.
    Legacy,
    /// Handle retargeting over calibrated metadata offsets.
    Modern,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Legacy => write!(f, "Legacy"),
            StrategyKind::Modern => write!(f, "Modern"),
        }
    }
}

/// Pick the strategy for a runtime version.
pub fn detect_strategy(sdk: u32, config: &ReflectConfig) -> StrategyKind {
    if sdk >= config.modern_sdk {
        StrategyKind::Modern
    } else {
        StrategyKind::Legacy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold() {
        let config = ReflectConfig::default();
        assert_eq!(detect_strategy(21, &config), StrategyKind::Legacy);
        assert_eq!(detect_strategy(25, &config), StrategyKind::Legacy);
        assert_eq!(detect_strategy(26, &config), StrategyKind::Modern);
        assert_eq!(detect_strategy(34, &config), StrategyKind::Modern);
    }

    #[test]
    fn test_configured_threshold() {
        let config = ReflectConfig::default().with_modern_sdk(30);
        assert_eq!(detect_strategy(28, &config), StrategyKind::Legacy);
        assert_eq!(detect_strategy(30, &config), StrategyKind::Modern);
    }
}
