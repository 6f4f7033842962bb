use std::fmt;

/// Well-known API levels.
pub mod codes {
    pub const LOLLIPOP: u32 = 21;
    pub const NOUGAT: u32 = 24;
    pub const NOUGAT_MR1: u32 = 25;
    /// First release with `java.lang.invoke` method handles.
    pub const OREO: u32 = 26;
    /// First release enforcing hidden-API restrictions.
    pub const PIE: u32 = 28;
    pub const RED_VELVET_CAKE: u32 = 30;
    /// `ArtMethod` loses its trailing hotness/entry-point word.
    pub const SNOW_CONE: u32 = 31;
    /// First release with `MethodHandles.privateLookupIn`.
    pub const TIRAMISU: u32 = 33;
    pub const UPSIDE_DOWN_CAKE: u32 = 34;
    pub const VANILLA_ICE_CREAM: u32 = 35;
}

/// Release names and the API level each introduced.
const RELEASES: &[(&str, u32)] = &[
    ("5.0", 21),
    ("5.1", 22),
    ("6.0", 23),
    ("7.0", 24),
    ("7.1", 25),
    ("8.0", 26),
    ("8.1", 27),
    ("9", 28),
    ("10", 29),
    ("11", 30),
    ("12", 31),
    ("12L", 32),
    ("13", 33),
    ("14", 34),
    ("15", 35),
];

/// Groups of releases sharing one runtime-metadata layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutFamily {
    /// Before method handles; only the official reflection path applies.
    PreOreo,
    /// O through R: 32-byte `ArtMethod`.
    OreoToR,
    /// S through U: 24-byte `ArtMethod`.
    SnowConeToU,
    /// Newer than any known layout; calibrate.
    Unknown,
}

/// A runtime version (the platform's `SDK_INT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SdkVersion {
    pub api_level: u32,
}

impl SdkVersion {
    pub fn new(api_level: u32) -> Self {
        SdkVersion { api_level }
    }

    /// Parse either an API level ("26") or a release name ("Android 8.0", "8.0.0", "12L").
    pub fn parse(version_str: &str) -> Option<Self> {
        let trimmed = version_str.trim();
        if let Some(release) = trimmed.strip_prefix("Android ") {
            return Self::from_release(release.trim());
        }
        if let Ok(api_level) = trimmed.parse::<u32>() {
            return Some(SdkVersion::new(api_level));
        }
        Self::from_release(trimmed)
    }

    fn from_release(release: &str) -> Option<Self> {
        // "8.0.0" -> "8.0", "9.0" -> "9"
        let parts: Vec<&str> = release.split('.').collect();
        let candidates = [
            parts.iter().take(2).cloned().collect::<Vec<_>>().join("."),
            parts[0].to_string(),
        ];
        for candidate in candidates.iter() {
            if let Some((_, level)) = RELEASES.iter().find(|(name, _)| name == candidate) {
                return Some(SdkVersion::new(*level));
            }
        }
        None
    }

    /// Release name for this level, if known.
    pub fn release_name(&self) -> Option<&'static str> {
        RELEASES
            .iter()
            .find(|(_, level)| *level == self.api_level)
            .map(|(name, _)| *name)
    }

    pub fn family(&self) -> LayoutFamily {
        match self.api_level {
            level if level < codes::OREO => LayoutFamily::PreOreo,
            level if level < codes::SNOW_CONE => LayoutFamily::OreoToR,
            level if level <= codes::UPSIDE_DOWN_CAKE => LayoutFamily::SnowConeToU,
            _ => LayoutFamily::Unknown,
        }
    }

    pub fn has_method_handles(&self) -> bool {
        self.api_level >= codes::OREO
    }

    pub fn enforces_hidden_api(&self) -> bool {
        self.api_level >= codes::PIE
    }

    pub fn has_private_lookup_in(&self) -> bool {
        self.api_level >= codes::TIRAMISU
    }
}

impl fmt::Display for SdkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.release_name() {
            Some(name) => write!(f, "API {} (Android {})", self.api_level, name),
            None => write!(f, "API {}", self.api_level),
        }
    }
}
