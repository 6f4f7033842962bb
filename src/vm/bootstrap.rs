//! Core classes of the runtime.

use log::debug;

use crate::backend::{RuntimeError, Value};
use crate::common::{Modifiers, TypeKind};

use super::class_linker::ClassBuilder;
use super::{Vm, WellKnown};

const PRIVATE: Modifiers = Modifiers::PRIVATE;
const PRIVATE_TRANSIENT: Modifiers = Modifiers::PRIVATE.union(Modifiers::TRANSIENT);
const PUBLIC_FINAL: Modifiers = Modifiers::PUBLIC.union(Modifiers::FINAL);
const PUBLIC_ABSTRACT: Modifiers = Modifiers::PUBLIC.union(Modifiers::ABSTRACT);

fn object() -> ClassBuilder {
    ClassBuilder::root("java.lang.Object")
        .field("shadow$_klass_", "Ljava/lang/Class;", PRIVATE_TRANSIENT)
        .field("shadow$_monitor_", "I", PRIVATE_TRANSIENT)
        .constructor(&[], Modifiers::PUBLIC, |_, _, _| Ok(Value::Void))
}

fn class() -> ClassBuilder {
    ClassBuilder::new("java.lang.Class")
        .modifiers(PUBLIC_FINAL)
        .field("classLoader", "Ljava/lang/ClassLoader;", PRIVATE_TRANSIENT)
        .field("componentType", "Ljava/lang/Class;", PRIVATE_TRANSIENT)
        .field("dexCache", "Ljava/lang/DexCache;", PRIVATE_TRANSIENT)
        .field("extData", "Ldalvik/system/ClassExt;", PRIVATE_TRANSIENT)
        .field("ifTable", "[Ljava/lang/Object;", PRIVATE_TRANSIENT)
        .field("name", "Ljava/lang/String;", PRIVATE_TRANSIENT)
        .field("superClass", "Ljava/lang/Class;", PRIVATE_TRANSIENT)
        .field("vtable", "Ljava/lang/Object;", PRIVATE_TRANSIENT)
        .field("iFields", "J", PRIVATE)
        .field("methods", "J", PRIVATE)
        .field("sFields", "J", PRIVATE)
        .field("accessFlags", "I", PRIVATE_TRANSIENT)
        .field("classFlags", "I", PRIVATE_TRANSIENT)
        .field("classSize", "I", PRIVATE_TRANSIENT)
        .field("clinitThreadId", "I", PRIVATE_TRANSIENT)
        .field("dexClassDefIndex", "I", PRIVATE_TRANSIENT)
        .field("dexTypeIndex", "I", PRIVATE_TRANSIENT)
        .field("numReferenceInstanceFields", "I", PRIVATE_TRANSIENT)
        .field("numReferenceStaticFields", "I", PRIVATE_TRANSIENT)
        .field("objectSize", "I", PRIVATE_TRANSIENT)
        .field("objectSizeAllocFastPath", "I", PRIVATE_TRANSIENT)
        .field("primitiveType", "I", PRIVATE_TRANSIENT)
        .field("referenceInstanceOffsets", "I", PRIVATE_TRANSIENT)
        .field("status", "I", PRIVATE_TRANSIENT)
        .field("copiedMethodsOffset", "S", PRIVATE_TRANSIENT)
        .field("virtualMethodsOffset", "S", PRIVATE_TRANSIENT)
}

/// Declarations of the core classes, superclasses first.
///
/// `Object` and `Class` must stay the first two entries: the mirror layout is
/// computed from them before anything is allocated.
pub(crate) fn core_classes() -> Vec<ClassBuilder> {
    let mut classes = vec![
        object(),
        class(),
        ClassBuilder::new("java.lang.String")
            .modifiers(PUBLIC_FINAL)
            .field("count", "I", PRIVATE | Modifiers::FINAL)
            .field("hash", "I", PRIVATE),
    ];
    for kind in TypeKind::PRIMITIVES {
        if let Some(name) = kind.primitive_name() {
            classes.push(ClassBuilder::primitive(kind, name));
        }
    }
    classes.extend([
        ClassBuilder::new("java.lang.reflect.AccessibleObject").field("override", "Z", PRIVATE),
        ClassBuilder::new("java.lang.reflect.Field")
            .extends("java.lang.reflect.AccessibleObject")
            .modifiers(PUBLIC_FINAL)
            .field("accessFlags", "I", PRIVATE)
            .field("artField", "J", PRIVATE)
            .field("declaringClass", "Ljava/lang/Class;", PRIVATE)
            .field("type", "Ljava/lang/Class;", PRIVATE),
        ClassBuilder::new("java.lang.reflect.Executable")
            .extends("java.lang.reflect.AccessibleObject")
            .modifiers(PUBLIC_ABSTRACT)
            .field("accessFlags", "I", PRIVATE)
            .field("artMethod", "J", PRIVATE)
            .field("declaringClass", "Ljava/lang/Class;", PRIVATE)
            .field("declaringClassOfOverriddenMethod", "Ljava/lang/Class;", PRIVATE)
            .field("parameters", "[Ljava/lang/reflect/Parameter;", PRIVATE),
        ClassBuilder::new("java.lang.reflect.Method")
            .extends("java.lang.reflect.Executable")
            .modifiers(PUBLIC_FINAL),
        ClassBuilder::new("java.lang.reflect.Constructor")
            .extends("java.lang.reflect.Executable")
            .modifiers(PUBLIC_FINAL),
        ClassBuilder::new("java.lang.invoke.MethodHandle")
            .modifiers(PUBLIC_ABSTRACT)
            .field("artFieldOrMethod", "J", Modifiers::PROTECTED | Modifiers::FINAL)
            .field("cachedSpreadInvoker", "Ljava/lang/invoke/MethodHandle;", PRIVATE)
            .field("handleKind", "I", Modifiers::PROTECTED | Modifiers::FINAL)
            .field("nominalType", "Ljava/lang/invoke/MethodType;", PRIVATE)
            .field("type", "Ljava/lang/invoke/MethodType;", PRIVATE | Modifiers::FINAL),
        ClassBuilder::new("java.lang.invoke.MethodHandleImpl")
            .extends("java.lang.invoke.MethodHandle")
            .modifiers(Modifiers::empty())
            .field("info", "Ljava/lang/invoke/MethodHandleImpl$HandleInfo;", PRIVATE),
        ClassBuilder::new("java.lang.invoke.MethodHandleImpl$HandleInfo")
            .modifiers(Modifiers::STATIC | Modifiers::FINAL)
            .field("handle", "Ljava/lang/invoke/MethodHandle;", PRIVATE | Modifiers::FINAL)
            .field("member", "Ljava/lang/reflect/Member;", PRIVATE | Modifiers::FINAL),
        ClassBuilder::new("java.lang.invoke.MethodHandles$Lookup")
            .modifiers(PUBLIC_FINAL | Modifiers::STATIC)
            .field("allowedModes", "I", PRIVATE | Modifiers::FINAL)
            .field("lookupClass", "Ljava/lang/Class;", PRIVATE | Modifiers::FINAL),
    ]);
    classes
}

/// Declare and link the core classes, then record the well-known offsets.
pub(crate) fn boot(vm: &Vm, core: &[ClassBuilder]) -> Result<(), RuntimeError> {
    let mut st = vm.inner.state.lock();
    let mut declared = Vec::with_capacity(core.len());
    for decl in core {
        let class = vm.declare(&mut st, decl)?;
        if decl.name == "java.lang.Class" {
            st.class_class = Some(class);
        }
        declared.push(class);
    }
    let class_class = st
        .class_class
        .ok_or_else(|| RuntimeError::ClassNotFound("java.lang.Class".to_string()))?;
    // Mirrors declared before java.lang.Class have no klass yet.
    for class in &declared {
        if vm.inner.heap.read::<u64>(class.addr()) == 0 {
            vm.inner.heap.write::<u64>(class.addr(), class_class.addr() as u64);
        }
    }
    for (class, decl) in declared.iter().zip(core) {
        vm.link(&mut st, *class, decl)?;
    }

    let find = |name: &str| {
        st.classes
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::ClassNotFound(name.to_string()))
    };
    let slot = |class_name: &str, field: &str| -> Result<usize, RuntimeError> {
        let mut current = st.classes.get(class_name).copied();
        while let Some(c) = current {
            let info = st
                .infos
                .get(&c)
                .ok_or_else(|| RuntimeError::ClassNotFound(class_name.to_string()))?;
            if let Some(slot) = info.instance_slots.iter().find(|s| s.name == field) {
                return Ok(slot.offset);
            }
            current = info.superclass;
        }
        Err(RuntimeError::NoSuchField(format!("{}.{}", class_name, field)))
    };

    let well_known = WellKnown {
        class: class_class,
        string: find("java.lang.String")?,
        accessible_object: find("java.lang.reflect.AccessibleObject")?,
        field: find("java.lang.reflect.Field")?,
        method: find("java.lang.reflect.Method")?,
        constructor: find("java.lang.reflect.Constructor")?,
        method_handle_impl: find("java.lang.invoke.MethodHandleImpl")?,
        handle_info: find("java.lang.invoke.MethodHandleImpl$HandleInfo")?,
        lookup: find("java.lang.invoke.MethodHandles$Lookup")?,
        override_flag: slot("java.lang.reflect.AccessibleObject", "override")?,
        field_declaring_class: slot("java.lang.reflect.Field", "declaringClass")?,
        field_type: slot("java.lang.reflect.Field", "type")?,
        field_art_field: slot("java.lang.reflect.Field", "artField")?,
        field_access_flags: slot("java.lang.reflect.Field", "accessFlags")?,
        executable_declaring_class: slot("java.lang.reflect.Executable", "declaringClass")?,
        executable_art_method: slot("java.lang.reflect.Executable", "artMethod")?,
        executable_access_flags: slot("java.lang.reflect.Executable", "accessFlags")?,
        handle_kind: slot("java.lang.invoke.MethodHandle", "handleKind")?,
        handle_art_field_or_method: slot("java.lang.invoke.MethodHandle", "artFieldOrMethod")?,
        handle_info_ref: slot("java.lang.invoke.MethodHandleImpl", "info")?,
        info_member: slot("java.lang.invoke.MethodHandleImpl$HandleInfo", "member")?,
        info_handle: slot("java.lang.invoke.MethodHandleImpl$HandleInfo", "handle")?,
        lookup_class: slot("java.lang.invoke.MethodHandles$Lookup", "lookupClass")?,
        lookup_allowed_modes: slot("java.lang.invoke.MethodHandles$Lookup", "allowedModes")?,
        string_count: slot("java.lang.String", "count")?,
    };
    debug!("bootstrapped {} core classes", declared.len());
    drop(st);
    let _ = vm.inner.well_known.set(well_known);
    Ok(())
}
