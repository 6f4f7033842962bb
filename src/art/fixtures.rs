//! Fixture classes loaded into the runtime for layout calibration.
//!
//! The shadow classes declare exactly the instance fields of the platform
//! class they mirror, in the same order and with the same types, so the
//! runtime's field layout gives them identical offsets. `NeverCall` is a
//! member-ordering fixture: the stride and bias measurements assume `a` and
//! `b` are adjacent static fields, `s` and `t` adjacent methods, and the
//! constructor the first entry of the method array.

use crate::common::Modifiers;

#[derive(Debug, Clone, Copy)]
pub struct FixtureField {
    pub name: &'static str,
    pub descriptor: &'static str,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Copy)]
pub struct FixtureMethod {
    pub name: &'static str,
    pub params: &'static [&'static str],
    pub returns: &'static str,
    pub modifiers: Modifiers,
}

/// A class declaration with empty method bodies.
#[derive(Debug, Clone, Copy)]
pub struct FixtureClass {
    pub name: &'static str,
    pub superclass: &'static str,
    pub fields: &'static [FixtureField],
    pub methods: &'static [FixtureMethod],
}

const PRIVATE: Modifiers = Modifiers::PRIVATE;
const PRIVATE_TRANSIENT: Modifiers = Modifiers::PRIVATE.union(Modifiers::TRANSIENT);
const PRIVATE_STATIC: Modifiers = Modifiers::PRIVATE.union(Modifiers::STATIC);
const PUBLIC_STATIC: Modifiers = Modifiers::PUBLIC.union(Modifiers::STATIC);

const fn field(name: &'static str, descriptor: &'static str, modifiers: Modifiers) -> FixtureField {
    FixtureField { name, descriptor, modifiers }
}

const fn method(name: &'static str, returns: &'static str, modifiers: Modifiers) -> FixtureMethod {
    FixtureMethod { name, params: &[], returns, modifiers }
}

/// Shadow of `java.lang.Class`.
pub const CLASS_MIRROR: FixtureClass = FixtureClass {
    name: "art_reflect.Shadows$ClassMirror",
    superclass: "java.lang.Object",
    fields: &[
        field("classLoader", "Ljava/lang/ClassLoader;", PRIVATE_TRANSIENT),
        field("componentType", "Ljava/lang/Class;", PRIVATE_TRANSIENT),
        field("dexCache", "Ljava/lang/Object;", PRIVATE_TRANSIENT),
        field("extData", "Ldalvik/system/ClassExt;", PRIVATE_TRANSIENT),
        field("ifTable", "[Ljava/lang/Object;", PRIVATE_TRANSIENT),
        field("name", "Ljava/lang/String;", PRIVATE_TRANSIENT),
        field("superClass", "Ljava/lang/Class;", PRIVATE_TRANSIENT),
        field("vtable", "Ljava/lang/Object;", PRIVATE_TRANSIENT),
        field("iFields", "J", PRIVATE_TRANSIENT),
        field("methods", "J", PRIVATE_TRANSIENT),
        field("sFields", "J", PRIVATE_TRANSIENT),
        field("accessFlags", "I", PRIVATE_TRANSIENT),
        field("classFlags", "I", PRIVATE_TRANSIENT),
        field("classSize", "I", PRIVATE_TRANSIENT),
        field("clinitThreadId", "I", PRIVATE_TRANSIENT),
        field("dexClassDefIndex", "I", PRIVATE_TRANSIENT),
        field("dexTypeIndex", "I", PRIVATE_TRANSIENT),
        field("numReferenceInstanceFields", "I", PRIVATE_TRANSIENT),
        field("numReferenceStaticFields", "I", PRIVATE_TRANSIENT),
        field("objectSize", "I", PRIVATE_TRANSIENT),
        field("objectSizeAllocFastPath", "I", PRIVATE_TRANSIENT),
        field("primitiveType", "I", PRIVATE_TRANSIENT),
        field("referenceInstanceOffsets", "I", PRIVATE_TRANSIENT),
        field("status", "I", PRIVATE_TRANSIENT),
        field("copiedMethodsOffset", "S", PRIVATE_TRANSIENT),
        field("virtualMethodsOffset", "S", PRIVATE_TRANSIENT),
    ],
    methods: &[],
};

/// Shadow of `java.lang.reflect.AccessibleObject`.
pub const ACCESSIBLE_OBJECT: FixtureClass = FixtureClass {
    name: "art_reflect.Shadows$AccessibleObject",
    superclass: "java.lang.Object",
    fields: &[field("override", "Z", PRIVATE)],
    methods: &[],
};

/// Shadow of `java.lang.reflect.Executable`.
pub const EXECUTABLE: FixtureClass = FixtureClass {
    name: "art_reflect.Shadows$Executable",
    superclass: ACCESSIBLE_OBJECT.name,
    fields: &[
        field("declaringClass", "Ljava/lang/Class;", PRIVATE),
        field("declaringClassOfOverriddenMethod", "Ljava/lang/Class;", PRIVATE),
        field("parameters", "[Ljava/lang/Object;", PRIVATE),
        field("artMethod", "J", PRIVATE),
        field("accessFlags", "I", PRIVATE),
    ],
    methods: &[],
};

/// Shadow of `java.lang.invoke.MethodHandle`.
pub const METHOD_HANDLE: FixtureClass = FixtureClass {
    name: "art_reflect.Shadows$MethodHandle",
    superclass: "java.lang.Object",
    fields: &[
        field("type", "Ljava/lang/invoke/MethodType;", PRIVATE),
        field("nominalType", "Ljava/lang/invoke/MethodType;", PRIVATE),
        field("cachedSpreadInvoker", "Ljava/lang/invoke/MethodHandle;", PRIVATE),
        field("handleKind", "I", PRIVATE),
        field("artFieldOrMethod", "J", PRIVATE),
    ],
    methods: &[],
};

/// Shadow of `java.lang.invoke.MethodHandleImpl`.
pub const METHOD_HANDLE_IMPL: FixtureClass = FixtureClass {
    name: "art_reflect.Shadows$MethodHandleImpl",
    superclass: METHOD_HANDLE.name,
    fields: &[field("info", "Ljava/lang/invoke/MethodHandleInfo;", PRIVATE)],
    methods: &[],
};

/// Shadow of `java.lang.invoke.MethodHandleImpl$HandleInfo`.
pub const HANDLE_INFO: FixtureClass = FixtureClass {
    name: "art_reflect.Shadows$HandleInfo",
    superclass: "java.lang.Object",
    fields: &[
        field("member", "Ljava/lang/reflect/Member;", PRIVATE),
        field("handle", "Ljava/lang/invoke/MethodHandle;", PRIVATE),
    ],
    methods: &[],
};

/// Shadow of `java.lang.invoke.MethodHandles$Lookup`.
pub const LOOKUP: FixtureClass = FixtureClass {
    name: "art_reflect.Shadows$Lookup",
    superclass: "java.lang.Object",
    fields: &[
        field("lookupClass", "Ljava/lang/Class;", PRIVATE),
        field("allowedModes", "I", PRIVATE),
    ],
    methods: &[],
};

pub const NEVER_CALL: FixtureClass = FixtureClass {
    name: "art_reflect.NeverCall",
    superclass: "java.lang.Object",
    fields: &[
        field("a", "I", PRIVATE_STATIC),
        field("b", "I", PRIVATE_STATIC),
        field("i", "I", PRIVATE),
    ],
    methods: &[
        FixtureMethod { name: "<init>", params: &[], returns: "V", modifiers: Modifiers::PUBLIC.union(Modifiers::CONSTRUCTOR) },
        method("s", "V", PUBLIC_STATIC),
        method("t", "V", PUBLIC_STATIC),
    ],
};

/// Every shadow, superclasses before subclasses.
pub const SHADOWS: [&FixtureClass; 7] = [
    &CLASS_MIRROR,
    &ACCESSIBLE_OBJECT,
    &EXECUTABLE,
    &METHOD_HANDLE,
    &METHOD_HANDLE_IMPL,
    &HANDLE_INFO,
    &LOOKUP,
];

/// Platform class whose instances the retargeter builds by hand below the
/// private-lookup version.
pub const LOOKUP_CLASS: &str = "java.lang.invoke.MethodHandles$Lookup";
