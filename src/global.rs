//! The process-wide heap.
//!
//! One [`MemAlloc`] backed by the real [`Kernel`] lives for the whole
//! process. It starts empty, builds its arena on the first small request and
//! is never torn down. The functions here, their C counterparts and
//! [`BrkAlloc`] are not synchronized: callers must make sure only one of them
//! runs at a time.

use std::{
    alloc::{GlobalAlloc, Layout},
    cell::UnsafeCell,
    ffi::c_void,
    ptr,
};

use crate::{config::ALIGNMENT, kernel::Kernel, memalloc::MemAlloc};

struct Heap(UnsafeCell<MemAlloc<Kernel>>);

// SAFETY: single threaded by contract, see the module documentation.
unsafe impl Sync for Heap {}

static HEAP: Heap = Heap(UnsafeCell::new(MemAlloc::new()));

/// Exclusive access to the process-wide heap.
///
/// **SAFETY**: no other reference obtained from this function may be alive.
#[inline]
unsafe fn heap() -> &'static mut MemAlloc<Kernel> {
    unsafe { &mut *HEAP.0.get() }
}

/// [`MemAlloc::allocate`] on the process-wide heap.
///
/// # Safety
///
/// Must not run concurrently with any other function of this module.
pub unsafe fn allocate(size: usize) -> *mut u8 {
    unsafe { heap().allocate(size) }
}

/// [`MemAlloc::zero_allocate`] on the process-wide heap.
///
/// # Safety
///
/// Must not run concurrently with any other function of this module.
pub unsafe fn zero_allocate(count: usize, size: usize) -> *mut u8 {
    unsafe { heap().zero_allocate(count, size) }
}

/// [`MemAlloc::resize`] on the process-wide heap.
///
/// # Safety
///
/// Must not run concurrently with any other function of this module, and
/// `ptr` must be null or come from the process-wide heap.
pub unsafe fn resize(ptr: *mut u8, size: usize) -> *mut u8 {
    unsafe { heap().resize(ptr, size) }
}

/// [`MemAlloc::release`] on the process-wide heap.
///
/// # Safety
///
/// Must not run concurrently with any other function of this module, and
/// `ptr` must be null or a live pointer from the process-wide heap.
pub unsafe fn release(ptr: *mut u8) {
    unsafe { heap().release(ptr) }
}

/// C entry point for [`allocate`].
///
/// # Safety
///
/// See [`allocate`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn brk_malloc(size: usize) -> *mut c_void {
    unsafe { allocate(size).cast() }
}

/// C entry point for [`zero_allocate`].
///
/// # Safety
///
/// See [`zero_allocate`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn brk_calloc(count: usize, size: usize) -> *mut c_void {
    unsafe { zero_allocate(count, size).cast() }
}

/// C entry point for [`resize`].
///
/// # Safety
///
/// See [`resize`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn brk_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    unsafe { resize(ptr.cast(), size).cast() }
}

/// C entry point for [`release`].
///
/// # Safety
///
/// See [`release`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn brk_free(ptr: *mut c_void) {
    unsafe { release(ptr.cast()) }
}

/// [`GlobalAlloc`] front end of the process-wide heap, for programs that
/// only ever allocate from one thread.
///
/// ```rust,no_run
/// use brkalloc::global::BrkAlloc;
///
/// #[global_allocator]
/// static ALLOCATOR: BrkAlloc = BrkAlloc;
///
/// fn main() {
///     let boxed = Box::new(22);
///     assert_eq!(22, *boxed);
/// }
/// ```
///
/// Layouts aligned to more than [`ALIGNMENT`] bytes are refused with null.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrkAlloc;

unsafe impl GlobalAlloc for BrkAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        unsafe { allocate(layout.size()) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        unsafe { zero_allocate(1, layout.size()) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { release(ptr) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        unsafe { resize(ptr, new_size) }
    }
}
