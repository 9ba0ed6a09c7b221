//! Global heap front end
//!
//! Wraps a [`Heap`] over the firmware's `'static` carve-out behind a spin
//! lock so it can live in a `static` and serve as `#[global_allocator]`.
//! The lock only satisfies `Sync`; the allocator is still not interrupt safe
//! and must not be entered from inside one of its own operations.
//!
//! Also exposes the C-shaped surface (`malloc`, `calloc`, `realloc`, `free`)
//! the rest of the firmware calls with raw pointers. Every failure is a null
//! pointer.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::null_mut;
use spin::{Mutex, MutexGuard};

use crate::block::ALIGNMENT;
use crate::heap::{Heap, HeapPtr};

/// Spin-locked heap for `static` use
pub struct LockedHeap {
    inner: Mutex<Heap<'static>>,
}

impl LockedHeap {
    /// Create an uninitialized heap; every allocation returns null until init
    pub const fn empty() -> Self {
        Self {
            inner: Mutex::new(Heap::empty()),
        }
    }

    /// Initialize from the raw carve-out handed over by the boot code
    ///
    /// # Safety
    /// - `base..base + len` must be valid for reads and writes forever
    /// - Nothing else may access the region afterwards
    /// - Re-initializing invalidates every pointer handed out before
    pub unsafe fn init(&self, base: *mut u8, len: usize) {
        self.init_region(core::slice::from_raw_parts_mut(base, len));
    }

    /// Initialize from a `'static` region
    pub fn init_region(&self, region: &'static mut [u8]) {
        self.inner.lock().init(region);
    }

    /// Lock the underlying heap (statistics, block walks, checks)
    pub fn lock(&self) -> MutexGuard<'_, Heap<'static>> {
        self.inner.lock()
    }

    /// Allocate `size` bytes, null on failure
    pub fn malloc(&self, size: usize) -> *mut u8 {
        let mut heap = self.inner.lock();
        match heap.allocate(size) {
            Ok(ptr) => to_raw(&mut heap, ptr),
            Err(_) => null_mut(),
        }
    }

    /// Allocate `count * size` zeroed bytes, null on failure or overflow
    pub fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        let mut heap = self.inner.lock();
        match heap.allocate_zeroed(count, size) {
            Ok(ptr) => to_raw(&mut heap, ptr),
            Err(_) => null_mut(),
        }
    }

    /// Resize an allocation
    ///
    /// Null `ptr` allocates; `size == 0` frees and returns null. On failure
    /// null is returned and `ptr` is left untouched.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this heap.
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        let mut heap = self.inner.lock();
        let handle = if ptr.is_null() {
            None
        } else {
            Some(to_handle(&mut heap, ptr))
        };

        match heap.resize(handle, size) {
            Ok(Some(new_ptr)) => to_raw(&mut heap, new_ptr),
            _ => null_mut(),
        }
    }

    /// Release an allocation
    ///
    /// Null and pointers outside the arena are ignored.
    ///
    /// # Safety
    /// `ptr` must be null, outside the arena, or a live pointer returned by
    /// this heap. Any other pointer into the arena corrupts it.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let mut heap = self.inner.lock();
        let handle = to_handle(&mut heap, ptr);
        heap.release(handle);
    }

    /// Free bytes left in the arena, headers included
    pub fn free_memory(&self) -> usize {
        self.inner.lock().free_memory()
    }
}

impl Default for LockedHeap {
    fn default() -> Self {
        Self::empty()
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return null_mut();
        }
        self.malloc(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.free(ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return null_mut();
        }
        self.calloc(1, layout.size())
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return null_mut();
        }
        LockedHeap::realloc(self, ptr, new_size)
    }
}

fn to_raw(heap: &mut Heap<'static>, ptr: HeapPtr) -> *mut u8 {
    heap.region_ptr().wrapping_add(ptr.offset())
}

fn to_handle(heap: &mut Heap<'static>, ptr: *mut u8) -> HeapPtr {
    // Pointers below the region wrap to huge offsets and are rejected as
    // out of range
    HeapPtr::from_offset((ptr as usize).wrapping_sub(heap.region_ptr() as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;
    use std::vec;

    fn leaked_region(len: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; len].into_boxed_slice())
    }

    fn heap_with(len: usize) -> LockedHeap {
        let heap = LockedHeap::empty();
        heap.init_region(leaked_region(len));
        heap
    }

    #[test]
    fn test_uninitialized_returns_null() {
        let heap = LockedHeap::empty();
        assert!(heap.malloc(16).is_null());
        assert!(heap.calloc(2, 8).is_null());
    }

    #[test]
    fn test_malloc_free() {
        let heap = heap_with(4096);
        let initial = heap.free_memory();

        let ptr = heap.malloc(100);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % ALIGNMENT, 0);

        unsafe {
            ptr.write_bytes(0x5A, 100);
            assert_eq!(*ptr.add(99), 0x5A);
            heap.free(ptr);
        }
        assert_eq!(heap.free_memory(), initial);
        assert!(heap.lock().check().is_ok());
    }

    #[test]
    fn test_malloc_failures_are_null() {
        let heap = heap_with(1024);
        assert!(heap.malloc(0).is_null());
        assert!(heap.malloc(4096).is_null());
        assert!(heap.calloc(usize::MAX, 4).is_null());
    }

    #[test]
    fn test_calloc_zeroes() {
        let heap = heap_with(1024);

        // Dirty the arena first so calloc has something to clear
        let dirty = heap.malloc(64);
        unsafe {
            dirty.write_bytes(0xFF, 64);
            heap.free(dirty);
        }

        let ptr = heap.calloc(8, 8);
        assert!(!ptr.is_null());
        let bytes = unsafe { core::slice::from_raw_parts(ptr, 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_realloc_preserves_content() {
        let heap = heap_with(4096);

        unsafe {
            let ptr = heap.realloc(core::ptr::null_mut(), 16);
            assert!(!ptr.is_null());
            for i in 0..16 {
                *ptr.add(i) = i as u8;
            }

            let grown = heap.realloc(ptr, 512);
            assert!(!grown.is_null());
            assert_ne!(grown, ptr);
            for i in 0..16 {
                assert_eq!(*grown.add(i), i as u8);
            }

            // Shrinking keeps the block
            assert_eq!(heap.realloc(grown, 8), grown);

            assert!(heap.realloc(grown, 0).is_null());
        }
        assert_eq!(heap.lock().blocks().count(), 1);
    }

    #[test]
    fn test_free_ignores_foreign_pointers() {
        let heap = heap_with(1024);
        let ptr = heap.malloc(32);
        let before = heap.free_memory();

        let mut local = 0u64;
        unsafe {
            heap.free(core::ptr::null_mut());
            heap.free(&mut local as *mut u64 as *mut u8);
        }

        assert_eq!(heap.free_memory(), before);
        unsafe { heap.free(ptr) };
    }

    #[test]
    fn test_global_alloc() {
        let heap = heap_with(4096);
        let initial = heap.free_memory();

        unsafe {
            let layout = Layout::from_size_align(64, 8).unwrap();
            let ptr = GlobalAlloc::alloc(&heap, layout);
            assert!(!ptr.is_null());

            let zeroed = GlobalAlloc::alloc_zeroed(&heap, layout);
            assert_eq!(*zeroed, 0);

            let grown = GlobalAlloc::realloc(&heap, ptr, layout, 256);
            assert!(!grown.is_null());

            GlobalAlloc::dealloc(&heap, grown, Layout::from_size_align(256, 8).unwrap());
            GlobalAlloc::dealloc(&heap, zeroed, layout);

            let over_aligned = Layout::from_size_align(64, 64).unwrap();
            assert!(GlobalAlloc::alloc(&heap, over_aligned).is_null());
        }

        assert_eq!(heap.free_memory(), initial);
    }
}
