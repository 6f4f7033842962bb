//! Handle retargeting
//!
//! A direct method handle keeps a raw pointer to the `ArtField` or
//! `ArtMethod` it was unreflected from and lazily caches a `HandleInfo`
//! describing it. Overwriting the pointer and clearing the cache makes the
//! next `revealDirect` rebuild the info, and with it a reflective member, for
//! whatever record the pointer now names. No access check runs against that
//! record beyond the lookup's own modes, which we control.

use log::trace;

use crate::backend::{ManagedRuntime, ObjRef, RawMemory};
use crate::common::LookupModes;
use crate::reflect::ReflectError;

use super::fixtures::LOOKUP_CLASS;
use super::offsets::ArtOffsets;

pub struct Retargeter<'a, R: ManagedRuntime> {
    runtime: &'a R,
    memory: &'a R::Memory,
    offsets: &'a ArtOffsets,
    private_lookup_sdk: u32,
}

impl<'a, R: ManagedRuntime> Retargeter<'a, R> {
    pub fn new(runtime: &'a R, memory: &'a R::Memory, offsets: &'a ArtOffsets, private_lookup_sdk: u32) -> Self {
        Retargeter {
            runtime,
            memory,
            offsets,
            private_lookup_sdk,
        }
    }

    /// A lookup on `class` with every access mode.
    pub fn unrestricted_lookup(&self, class: ObjRef) -> Result<ObjRef, ReflectError> {
        let denied = |source| ReflectError::RetargetDenied {
            descriptor: class.addr(),
            source,
        };
        if self.runtime.sdk_int() >= self.private_lookup_sdk {
            return self.runtime.private_lookup_in(class).map_err(denied);
        }
        let lookup_class = self.runtime.find_class(LOOKUP_CLASS).map_err(denied)?;
        let lookup = self.memory.allocate_instance(lookup_class).map_err(denied)?;
        self.memory.put_object(lookup, self.offsets.lookup_class, Some(class));
        self.memory.put_int(
            lookup,
            self.offsets.lookup_allowed_modes,
            LookupModes::UNRESTRICTED.bits() as i32,
        );
        Ok(lookup)
    }

    /// Point `handle` at the record at `descriptor` and have the runtime
    /// describe it; returns the rebuilt `HandleInfo`.
    pub fn retarget(&self, handle: ObjRef, descriptor: usize, lookup: ObjRef) -> Result<ObjRef, ReflectError> {
        trace!("retarget {:?} -> {:#x}", handle, descriptor);
        self.memory
            .put_long(handle, self.offsets.handle_art_field_or_method, descriptor as i64);
        self.memory.put_object(handle, self.offsets.handle_info, None);
        self.runtime
            .reveal_direct(lookup, handle)
            .map_err(|source| ReflectError::RetargetDenied { descriptor, source })
    }

    /// The reflective member a `HandleInfo` describes.
    pub fn member(&self, info: ObjRef) -> Option<ObjRef> {
        self.memory.get_object(info, self.offsets.info_member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RuntimeError;
    use crate::common::Modifiers;
    use crate::vm::{ClassBuilder, Vm};

    fn setup(sdk: u32) -> (Vm, ObjRef, ArtOffsets) {
        let vm = Vm::new(sdk).expect("vm");
        let class = vm
            .define_class(
                ClassBuilder::new("demo.Vault")
                    .field("code", "I", Modifiers::PRIVATE | Modifiers::STATIC)
                    .field("open", "Z", Modifiers::PUBLIC | Modifiers::STATIC),
            )
            .expect("class");
        (vm, class, ArtOffsets::for_sdk(sdk).expect("table"))
    }

    #[test]
    fn test_retarget_reaches_private_field() {
        let (vm, class, offsets) = setup(30);
        let memory = vm.raw_memory().expect("memory");
        let retargeter = Retargeter::new(&vm, &memory, &offsets, 33);
        let open = vm.declared_field(class, "open").expect("field");
        let handle = vm.unreflect_getter(open).expect("handle");

        let sfields = memory.get_long(class, offsets.class_sfields) as usize;
        let lookup = retargeter.unrestricted_lookup(class).expect("lookup");
        let info = retargeter
            .retarget(handle, sfields + offsets.art_field_bias, lookup)
            .expect("retarget");
        let member = retargeter.member(info).expect("member");
        assert_eq!(vm.member_name(member).expect("name"), "code");
        assert!(vm.member_modifiers(member).expect("flags").is_private());
    }

    #[test]
    fn test_private_lookup_from_tiramisu() {
        let (vm, class, offsets) = setup(33);
        let memory = vm.raw_memory().expect("memory");
        let retargeter = Retargeter::new(&vm, &memory, &offsets, 33);
        let lookup = retargeter.unrestricted_lookup(class).expect("lookup");
        assert_eq!(memory.get_object(lookup, offsets.lookup_class), Some(class));
    }

    #[test]
    fn test_bad_descriptor_is_denied() {
        let (vm, class, offsets) = setup(31);
        let memory = vm.raw_memory().expect("memory");
        let retargeter = Retargeter::new(&vm, &memory, &offsets, 33);
        let open = vm.declared_field(class, "open").expect("field");
        let handle = vm.unreflect_getter(open).expect("handle");
        let lookup = retargeter.unrestricted_lookup(class).expect("lookup");
        let result = retargeter.retarget(handle, 0x40, lookup);
        assert!(matches!(
            result,
            Err(ReflectError::RetargetDenied {
                descriptor: 0x40,
                source: RuntimeError::IllegalArgument(_)
            })
        ));
    }
}
