//! Fixed-size arena backing every object and metadata record.
//!
//! The arena is allocated once, zeroed, and never moves or grows, so the
//! addresses handed out stay valid for the runtime's lifetime. No Rust
//! references into it are ever created; all access goes through raw reads
//! and writes of plain values.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backend::RuntimeError;

pub const DEFAULT_HEAP_CAPACITY: usize = 8 * 1024 * 1024;

const ALIGN: usize = 16;

pub(crate) struct Heap {
    base: *mut u8,
    capacity: usize,
    layout: Layout,
    /// Offset of the next free byte.
    top: AtomicUsize,
}

// The arena is plain memory; concurrent access is coordinated by callers.
unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

impl Heap {
    pub fn new(capacity: usize) -> Result<Heap, RuntimeError> {
        let layout = Layout::from_size_align(capacity.max(ALIGN), ALIGN)
            .map_err(|e| RuntimeError::Fatal(format!("bad heap layout: {}", e)))?;
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            return Err(RuntimeError::Fatal(format!("cannot reserve a {} byte heap", capacity)));
        }
        Ok(Heap {
            base,
            capacity: layout.size(),
            layout,
            // Keep address zero of the arena unused so no object sits at its base.
            top: AtomicUsize::new(ALIGN),
        })
    }

    /// Bump-allocate `size` zeroed bytes, 8-byte aligned.
    pub fn alloc(&self, size: usize) -> Result<usize, RuntimeError> {
        let size = align_up(size.max(8), 8);
        let offset = self.top.fetch_add(size, Ordering::SeqCst);
        if offset + size > self.capacity {
            return Err(RuntimeError::Fatal(format!(
                "heap exhausted: {} bytes requested, {} of {} in use",
                size, offset, self.capacity
            )));
        }
        Ok(self.base as usize + offset)
    }

    /// Whether `[addr, addr + len)` lies inside the allocated part of the arena.
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        let start = self.base as usize;
        let end = start + self.top.load(Ordering::SeqCst).min(self.capacity);
        addr >= start && addr.checked_add(len).is_some_and(|last| last <= end)
    }

    pub fn used(&self) -> usize {
        self.top.load(Ordering::SeqCst).min(self.capacity)
    }

    pub fn read<T: Copy + Default>(&self, addr: usize) -> T {
        if !self.contains(addr, std::mem::size_of::<T>()) {
            return T::default();
        }
        unsafe { std::ptr::read_unaligned(addr as *const T) }
    }

    pub fn write<T: Copy>(&self, addr: usize, value: T) -> bool {
        if !self.contains(addr, std::mem::size_of::<T>()) {
            return false;
        }
        unsafe { std::ptr::write_unaligned(addr as *mut T, value) };
        true
    }

    pub fn read_bytes(&self, addr: usize, len: usize) -> Option<Vec<u8>> {
        if !self.contains(addr, len) {
            return None;
        }
        let mut out = vec![0u8; len];
        unsafe { std::ptr::copy_nonoverlapping(addr as *const u8, out.as_mut_ptr(), len) };
        Some(out)
    }

    pub fn write_bytes(&self, addr: usize, bytes: &[u8]) -> bool {
        if !self.contains(addr, bytes.len()) {
            return false;
        }
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len()) };
        true
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) };
    }
}

pub(crate) fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_is_zeroed_and_aligned() {
        let heap = Heap::new(4096).expect("heap");
        let a = heap.alloc(3).expect("alloc");
        let b = heap.alloc(16).expect("alloc");
        assert_eq!(a % 8, 0);
        assert_eq!(b - a, 8);
        assert_eq!(heap.read::<u64>(b), 0);
        assert!(heap.write::<u32>(b + 4, 0xabcd));
        assert_eq!(heap.read::<u32>(b + 4), 0xabcd);
    }

    #[test]
    fn test_out_of_range_access_is_inert() {
        let heap = Heap::new(4096).expect("heap");
        let a = heap.alloc(8).expect("alloc");
        assert!(!heap.contains(a + 8, 1));
        assert!(!heap.write::<u64>(a + 64, 1));
        assert_eq!(heap.read::<u64>(a + 64), 0);
        assert_eq!(heap.read::<u64>(0x10), 0);
    }

    #[test]
    fn test_exhaustion() {
        let heap = Heap::new(64).expect("heap");
        assert!(heap.alloc(32).is_ok());
        assert!(matches!(heap.alloc(64), Err(RuntimeError::Fatal(_))));
    }
}
