//! Raw access to the current process's memory.

use std::sync::OnceLock;

use log::warn;
use process_memory::{LocalMember, Memory};

use crate::backend::{ManagedRuntime, RuntimeError};
use crate::reflect::ReflectError;

/// Reads and writes plain values at absolute addresses of this process.
///
/// Callers are responsible for only handing it mapped addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalMemory;

impl LocalMemory {
    pub fn read<T: Copy + Default>(&self, addr: usize) -> T {
        let mut member = LocalMember::<T>::new();
        member.set_offset(vec![addr]);
        unsafe { member.read().unwrap_or_default() }
    }

    pub fn write<T: Copy>(&self, addr: usize, value: T) -> bool {
        let mut member = LocalMember::<T>::new();
        member.set_offset(vec![addr]);
        #[allow(unused_unsafe)]
        let result = unsafe { member.write(&value) };
        if let Err(e) = &result {
            warn!("write of {} bytes at {:#x} failed: {}", std::mem::size_of::<T>(), addr, e);
        }
        result.is_ok()
    }
}

/// Lazily obtained raw-memory capability of a runtime.
///
/// The factory is asked once; a refusal is remembered.
pub struct MemoryHandle<M> {
    cell: OnceLock<Result<M, ReflectError>>,
}

impl<M> Default for MemoryHandle<M> {
    fn default() -> Self {
        MemoryHandle { cell: OnceLock::new() }
    }
}

impl<M> MemoryHandle<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<R>(&self, runtime: &R) -> Result<&M, ReflectError>
    where
        R: ManagedRuntime<Memory = M>,
    {
        self.cell
            .get_or_init(|| {
                runtime.raw_memory().map_err(|e: RuntimeError| {
                    warn!("raw memory unavailable: {}", e);
                    ReflectError::CalibrationUnavailable(format!("raw memory factory refused: {}", e))
                })
            })
            .as_ref()
            .map_err(Clone::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_round_trip() {
        let mut cell: Box<[u64; 2]> = Box::new([0, 0]);
        let addr = cell.as_mut_ptr() as usize;
        let memory = LocalMemory;
        assert!(memory.write::<u64>(addr + 8, 0xdead_beef_cafe));
        assert!(memory.write::<u32>(addr, 7));
        assert_eq!(memory.read::<u64>(addr + 8), 0xdead_beef_cafe);
        assert_eq!(memory.read::<u32>(addr), 7);
        assert_eq!(cell[1], 0xdead_beef_cafe);
    }
}
