//! Runtime metadata offsets
//!
//! Byte offsets into ART's reflection objects and the geometry of the
//! length-prefixed `ArtField` / `ArtMethod` arrays hanging off a class
//! mirror. They vary between releases, so they are either measured at run
//! time (see `calibration`) or taken from the table below.

use serde::{Deserialize, Serialize};

use crate::sdk_version::{LayoutFamily, SdkVersion};

/// Pointer size of the runtime's metadata.
pub const SIZE_OF_PTR: usize = 8;

/// Size of the length word (plus padding) in front of a metadata array.
pub const ARRAY_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtOffsets {
    pub version_name: String,
    /// `MethodHandle.artFieldOrMethod`
    pub handle_art_field_or_method: usize,
    /// `MethodHandleImpl.info`
    pub handle_info: usize,
    /// `HandleInfo.member`
    pub info_member: usize,
    /// `Lookup.lookupClass`
    pub lookup_class: usize,
    /// `Lookup.allowedModes`
    pub lookup_allowed_modes: usize,
    /// `Executable.artMethod`
    pub executable_art_method: usize,
    /// `Class.iFields`
    pub class_ifields: usize,
    /// `Class.sFields`
    pub class_sfields: usize,
    /// `Class.methods`
    pub class_methods: usize,
    /// Stride between consecutive `ArtField` records
    pub art_field_size: usize,
    /// Stride between consecutive `ArtMethod` records
    pub art_method_size: usize,
    /// Array base to first `ArtField`
    pub art_field_bias: usize,
    /// Array base to first `ArtMethod`
    pub art_method_bias: usize,
}

impl ArtOffsets {
    /// Layout for Android 8.0 through 11.
    pub fn oreo_to_r() -> Self {
        ArtOffsets {
            version_name: "O-R".to_string(),
            handle_art_field_or_method: 0x28,
            handle_info: 0x38,
            info_member: 0x18,
            lookup_class: 0x10,
            lookup_allowed_modes: 0x18,
            executable_art_method: 0x30,
            class_ifields: 0x50,
            class_methods: 0x58,
            class_sfields: 0x60,
            art_field_size: 0x18,
            art_method_size: 0x20,
            art_field_bias: ARRAY_HEADER_SIZE,
            art_method_bias: ARRAY_HEADER_SIZE,
        }
    }

    /// Layout for Android 12 through 14: `ArtMethod` drops its trailing word.
    pub fn snow_cone_to_u() -> Self {
        ArtOffsets {
            version_name: "S-U".to_string(),
            art_method_size: 0x18,
            ..Self::oreo_to_r()
        }
    }

    /// Known layout for a runtime version, if any.
    pub fn for_sdk(sdk: u32) -> Option<Self> {
        match SdkVersion::new(sdk).family() {
            LayoutFamily::OreoToR => Some(Self::oreo_to_r()),
            LayoutFamily::SnowConeToU => Some(Self::snow_cone_to_u()),
            LayoutFamily::PreOreo | LayoutFamily::Unknown => None,
        }
    }

    /// Builder-style override of one named offset.
    pub fn with_offset(mut self, name: &str, value: usize) -> Self {
        match name {
            "handle_art_field_or_method" => self.handle_art_field_or_method = value,
            "handle_info" => self.handle_info = value,
            "info_member" => self.info_member = value,
            "lookup_class" => self.lookup_class = value,
            "lookup_allowed_modes" => self.lookup_allowed_modes = value,
            "executable_art_method" => self.executable_art_method = value,
            "class_ifields" => self.class_ifields = value,
            "class_sfields" => self.class_sfields = value,
            "class_methods" => self.class_methods = value,
            "art_field_size" => self.art_field_size = value,
            "art_method_size" => self.art_method_size = value,
            "art_field_bias" => self.art_field_bias = value,
            "art_method_bias" => self.art_method_bias = value,
            _ => {}
        }
        self
    }

    /// All offsets by name, in declaration order.
    pub fn entries(&self) -> [(&'static str, usize); 13] {
        [
            ("handle_art_field_or_method", self.handle_art_field_or_method),
            ("handle_info", self.handle_info),
            ("info_member", self.info_member),
            ("lookup_class", self.lookup_class),
            ("lookup_allowed_modes", self.lookup_allowed_modes),
            ("executable_art_method", self.executable_art_method),
            ("class_ifields", self.class_ifields),
            ("class_sfields", self.class_sfields),
            ("class_methods", self.class_methods),
            ("art_field_size", self.art_field_size),
            ("art_method_size", self.art_method_size),
            ("art_field_bias", self.art_field_bias),
            ("art_method_bias", self.art_method_bias),
        ]
    }

    /// Check the geometry is plausible before any raw write depends on it.
    pub fn validate(&self) -> Result<(), String> {
        for (name, stride) in [("art_field_size", self.art_field_size), ("art_method_size", self.art_method_size)] {
            if stride == 0 || stride % 4 != 0 {
                return Err(format!("{} = {} is not a positive multiple of 4", name, stride));
            }
        }
        if self.art_field_bias >= self.art_field_size {
            return Err(format!(
                "art_field_bias = {} is not smaller than the stride {}",
                self.art_field_bias, self.art_field_size
            ));
        }
        if self.art_method_bias >= self.art_method_size {
            return Err(format!(
                "art_method_bias = {} is not smaller than the stride {}",
                self.art_method_bias, self.art_method_size
            ));
        }
        for (name, offset) in self.entries().iter().take(9) {
            if *offset == 0 || offset % 4 != 0 {
                return Err(format!("{} = {:#x} is not a plausible field offset", name, offset));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookup() {
        assert!(ArtOffsets::for_sdk(25).is_none());
        assert_eq!(ArtOffsets::for_sdk(26).map(|o| o.art_method_size), Some(32));
        assert_eq!(ArtOffsets::for_sdk(30).map(|o| o.art_method_size), Some(32));
        assert_eq!(ArtOffsets::for_sdk(31).map(|o| o.art_method_size), Some(24));
        assert_eq!(ArtOffsets::for_sdk(34).map(|o| o.art_method_size), Some(24));
        assert!(ArtOffsets::for_sdk(35).is_none());
    }

    #[test]
    fn test_table_entries_validate() {
        assert_eq!(ArtOffsets::oreo_to_r().validate(), Ok(()));
        assert_eq!(ArtOffsets::snow_cone_to_u().validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        let offsets = ArtOffsets::oreo_to_r().with_offset("art_field_size", 0);
        assert!(offsets.validate().is_err());

        let offsets = ArtOffsets::oreo_to_r().with_offset("art_method_bias", 0x40);
        assert!(offsets.validate().is_err());

        let offsets = ArtOffsets::oreo_to_r().with_offset("handle_info", 0x3);
        assert!(offsets.validate().is_err());
    }

    #[test]
    fn test_entries_cover_every_offset() {
        let offsets = ArtOffsets::snow_cone_to_u();
        let names: Vec<&str> = offsets.entries().iter().map(|(name, _)| *name).collect();
        for name in names {
            let changed = offsets.clone().with_offset(name, 0x1234);
            assert_ne!(changed, offsets, "{} is not settable", name);
        }
    }
}
