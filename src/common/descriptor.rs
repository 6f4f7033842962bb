//! Type descriptors (`I`, `J`, `Ljava/lang/String;`, ...) and the storage
//! kinds they map to.

use std::fmt::{self, Display, Formatter};

/// Storage kind of a field, parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Reference,
    Void,
}

impl TypeKind {
    /// Kind of a descriptor; `None` for malformed input.
    pub fn from_descriptor(descriptor: &str) -> Option<TypeKind> {
        let kind = match descriptor {
            "Z" => TypeKind::Boolean,
            "B" => TypeKind::Byte,
            "C" => TypeKind::Char,
            "S" => TypeKind::Short,
            "I" => TypeKind::Int,
            "J" => TypeKind::Long,
            "F" => TypeKind::Float,
            "D" => TypeKind::Double,
            "V" => TypeKind::Void,
            d if d.starts_with('L') && d.ends_with(';') && d.len() > 2 => TypeKind::Reference,
            d if d.starts_with('[') && d.len() > 1 => {
                TypeKind::from_descriptor(&d[1..])?;
                TypeKind::Reference
            }
            _ => return None,
        };
        Some(kind)
    }

    /// Size in bytes of a slot holding this kind (references are 64-bit).
    pub fn size(self) -> usize {
        match self {
            TypeKind::Boolean | TypeKind::Byte => 1,
            TypeKind::Char | TypeKind::Short => 2,
            TypeKind::Int | TypeKind::Float => 4,
            TypeKind::Long | TypeKind::Double | TypeKind::Reference => 8,
            TypeKind::Void => 0,
        }
    }

    pub fn is_primitive(self) -> bool {
        !matches!(self, TypeKind::Reference | TypeKind::Void)
    }

    /// Name of the primitive class (`int.class.getName()`).
    pub fn primitive_name(self) -> Option<&'static str> {
        let name = match self {
            TypeKind::Boolean => "boolean",
            TypeKind::Byte => "byte",
            TypeKind::Char => "char",
            TypeKind::Short => "short",
            TypeKind::Int => "int",
            TypeKind::Long => "long",
            TypeKind::Float => "float",
            TypeKind::Double => "double",
            TypeKind::Void => "void",
            TypeKind::Reference => return None,
        };
        Some(name)
    }

    pub const PRIMITIVES: [TypeKind; 9] = [
        TypeKind::Boolean,
        TypeKind::Byte,
        TypeKind::Char,
        TypeKind::Short,
        TypeKind::Int,
        TypeKind::Long,
        TypeKind::Float,
        TypeKind::Double,
        TypeKind::Void,
    ];
}

impl Display for TypeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.primitive_name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "reference"),
        }
    }
}

/// Binary class name for a descriptor, the form `Class.getName()` returns.
///
/// `Ljava/lang/String;` becomes `java.lang.String`, `I` becomes `int` and
/// arrays keep their descriptor with dots (`[Ljava.lang.Object;`).
pub fn class_name_for(descriptor: &str) -> Option<String> {
    match TypeKind::from_descriptor(descriptor)? {
        TypeKind::Reference if descriptor.starts_with('[') => Some(descriptor.replace('/', ".")),
        TypeKind::Reference => Some(descriptor[1..descriptor.len() - 1].replace('/', ".")),
        primitive => primitive.primitive_name().map(str::to_string),
    }
}

/// Package part of a binary class name (`""` for the default package).
pub fn package_of(class_name: &str) -> &str {
    match class_name.rfind('.') {
        Some(idx) => &class_name[..idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_kinds() {
        assert_eq!(TypeKind::from_descriptor("I"), Some(TypeKind::Int));
        assert_eq!(TypeKind::from_descriptor("J"), Some(TypeKind::Long));
        assert_eq!(TypeKind::from_descriptor("Ljava/lang/Class;"), Some(TypeKind::Reference));
        assert_eq!(TypeKind::from_descriptor("[[I"), Some(TypeKind::Reference));
        assert_eq!(TypeKind::from_descriptor("L;"), None);
        assert_eq!(TypeKind::from_descriptor("["), None);
        assert_eq!(TypeKind::from_descriptor("Q"), None);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(TypeKind::Boolean.size(), 1);
        assert_eq!(TypeKind::Char.size(), 2);
        assert_eq!(TypeKind::Float.size(), 4);
        assert_eq!(TypeKind::Reference.size(), 8);
        assert!(!TypeKind::Reference.is_primitive());
        assert!(TypeKind::Double.is_primitive());
    }

    #[test]
    fn test_class_names() {
        assert_eq!(class_name_for("Ljava/lang/String;").as_deref(), Some("java.lang.String"));
        assert_eq!(class_name_for("J").as_deref(), Some("long"));
        assert_eq!(class_name_for("[Ljava/lang/Object;").as_deref(), Some("[Ljava.lang.Object;"));
        assert_eq!(package_of("android.graphics.Point"), "android.graphics");
        assert_eq!(package_of("Toplevel"), "");
    }
}
