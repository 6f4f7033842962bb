use log::warn;

use crate::backend::{ObjRef, RawMemory, RuntimeError};
use crate::memory::LocalMemory;

use super::class_linker::MemberArray;
use super::Vm;

/// Unchecked memory access into a runtime's heap.
///
/// Reads outside the heap yield zero and writes outside it are dropped, so a
/// miscomputed offset corrupts managed state at worst, never the host.
#[derive(Debug, Clone)]
pub struct VmMemory {
    vm: Vm,
    local: LocalMemory,
}

impl VmMemory {
    pub(crate) fn new(vm: Vm) -> Self {
        VmMemory { vm, local: LocalMemory }
    }

    fn mapped(&self, addr: usize, len: usize) -> bool {
        self.vm.inner.heap.contains(addr, len)
    }

    fn read<T: Copy + Default>(&self, addr: usize) -> T {
        if self.mapped(addr, std::mem::size_of::<T>()) {
            self.local.read(addr)
        } else {
            T::default()
        }
    }

    fn write<T: Copy>(&self, addr: usize, value: T) {
        if !self.mapped(addr, std::mem::size_of::<T>()) {
            warn!("dropped {} byte write to unmapped address {:#x}", std::mem::size_of::<T>(), addr);
            return;
        }
        self.local.write(addr, value);
    }
}

impl RawMemory for VmMemory {
    fn read_u32(&self, addr: usize) -> u32 {
        self.read(addr)
    }

    fn read_u64(&self, addr: usize) -> u64 {
        self.read(addr)
    }

    fn write_u32(&self, addr: usize, value: u32) {
        self.write(addr, value)
    }

    fn write_u64(&self, addr: usize, value: u64) {
        self.write(addr, value)
    }

    fn object_field_offset(&self, field: ObjRef) -> Result<usize, RuntimeError> {
        let wk = self.vm.wk();
        if self.vm.class_of(field) != Some(wk.field) {
            return Err(RuntimeError::IllegalArgument(format!("{:?} is not a field", field)));
        }
        let addr = self.vm.inner.heap.read::<u64>(field.addr() + wk.field_art_field) as usize;
        if self.vm.record_owner(addr, &[MemberArray::InstanceFields]).is_none() {
            return Err(RuntimeError::IllegalArgument("objectFieldOffset of a static field".to_string()));
        }
        Ok(self.vm.field_record(addr).offset as usize)
    }

    fn allocate_instance(&self, class: ObjRef) -> Result<ObjRef, RuntimeError> {
        self.vm.alloc_object(class)
    }
}
