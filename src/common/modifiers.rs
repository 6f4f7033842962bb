//! Access flags shared by fields, methods and classes, plus the lookup modes
//! understood by `MethodHandles.Lookup`.

use bitflags::bitflags;

bitflags! {
    /// Access flags as stored in `ArtField` / `ArtMethod` records.
    ///
    /// The low 16 bits are the flags the platform reports through
    /// `Member.getModifiers()`; the high bits are runtime-internal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        /// Set on `<init>` and `<clinit>` methods.
        const CONSTRUCTOR = 0x0001_0000;
        /// Member is on the hidden-API deny list.
        const HIDDEN = 0x1000_0000;
    }
}

impl Modifiers {
    /// Flags visible through the reflection API.
    pub const JAVA_MASK: u32 = 0xffff;

    pub fn is_static(self) -> bool {
        self.contains(Modifiers::STATIC)
    }

    pub fn is_public(self) -> bool {
        self.contains(Modifiers::PUBLIC)
    }

    pub fn is_private(self) -> bool {
        self.contains(Modifiers::PRIVATE)
    }

    pub fn is_hidden(self) -> bool {
        self.contains(Modifiers::HIDDEN)
    }

    /// Package-private: neither public, protected nor private.
    pub fn is_package_private(self) -> bool {
        !self.intersects(Modifiers::PUBLIC | Modifiers::PROTECTED | Modifiers::PRIVATE)
    }

    /// Strip runtime-internal bits.
    pub fn java_visible(self) -> Modifiers {
        Modifiers::from_bits_truncate(self.bits() & Self::JAVA_MASK)
    }

    pub fn visibility_name(self) -> &'static str {
        if self.is_public() {
            "public"
        } else if self.contains(Modifiers::PROTECTED) {
            "protected"
        } else if self.is_private() {
            "private"
        } else {
            "package"
        }
    }
}

bitflags! {
    /// Access modes of a `MethodHandles.Lookup`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LookupModes: u32 {
        const PUBLIC = 0x01;
        const PRIVATE = 0x02;
        const PROTECTED = 0x04;
        /// Shares its bit with `Modifier.STATIC`.
        const PACKAGE = 0x08;
    }
}

impl LookupModes {
    /// Full-power lookup, equivalent to a lookup created inside the class itself.
    pub const UNRESTRICTED: LookupModes = LookupModes::all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_java_visible_strips_internal_bits() {
        let flags = Modifiers::PRIVATE | Modifiers::STATIC | Modifiers::HIDDEN | Modifiers::CONSTRUCTOR;
        assert_eq!(flags.java_visible(), Modifiers::PRIVATE | Modifiers::STATIC);
    }

    #[test]
    fn test_visibility() {
        assert_eq!(Modifiers::PUBLIC.visibility_name(), "public");
        assert_eq!((Modifiers::PROTECTED | Modifiers::FINAL).visibility_name(), "protected");
        assert_eq!(Modifiers::STATIC.visibility_name(), "package");
        assert!(Modifiers::STATIC.is_package_private());
        assert!(!Modifiers::PRIVATE.is_package_private());
    }

    #[test]
    fn test_unrestricted_lookup_modes() {
        assert_eq!(LookupModes::UNRESTRICTED.bits(), 0x0f);
        let java = Modifiers::PUBLIC | Modifiers::PRIVATE | Modifiers::PROTECTED | Modifiers::STATIC;
        assert_eq!(LookupModes::UNRESTRICTED.bits(), java.bits());
    }
}
