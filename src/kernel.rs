use std::{
    alloc::{self, Layout},
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::utils::align;

/// Virtual memory page size of the computer. This is usually 4096.
/// This value should be a constant, but we can't do that since we
/// don't know the value at compile time.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. The allocator only depends on these contracts, not on the
/// concrete APIs offered by each kernel.
///
/// **SAFETY**: implementors must hand out memory that is valid for reads and
/// writes, aligned to at least 8 bytes and not used by anyone else. The heap
/// returned by [`PlatformMemory::extend_heap`] must be linear: growing by `n`
/// bytes makes the `n` bytes starting at the previous break usable.
pub unsafe trait PlatformMemory {
    /// Moves the program break by `delta` bytes and returns the previous
    /// break, or `None` if the kernel refuses. A `delta` of zero queries the
    /// current break.
    unsafe fn extend_heap(&mut self, delta: isize) -> Option<NonNull<u8>>;

    /// Request a zeroed, private, read-write memory region of size `len`. It
    /// returns a Pointer to the given location or None if the underlying
    /// syscall fails.
    unsafe fn request_memory(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the
    /// kernel. `len` must match the length it was requested with.
    unsafe fn return_memory(&mut self, addr: NonNull<u8>, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    fn page_size(&self) -> usize;
}

/// The real operating system: program break plus anonymous mappings.
#[derive(Debug)]
pub struct Kernel {
    #[cfg(windows)]
    heap: win32::EmulatedBreak,
}

impl Kernel {
    /// Create a new handle to the operating system. No memory is requested
    /// until the allocator needs it.
    pub const fn new() -> Self {
        Self {
            #[cfg(windows)]
            heap: win32::EmulatedBreak::new(),
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrapper to calculate the computer's page size only once.
#[inline]
fn cached_page_size(query: impl FnOnce() -> usize) -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = query();
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory, cached_page_size};

    use libc::{intptr_t, mmap, munmap, off_t, sbrk, size_t};

    use std::{io, os::raw::{c_int, c_void}, ptr::NonNull};

    unsafe impl PlatformMemory for Kernel {
        unsafe fn extend_heap(&mut self, delta: isize) -> Option<NonNull<u8>> {
            let addr = unsafe { sbrk(delta as intptr_t) };

            if addr == usize::MAX as *mut c_void {
                log::warn!("sbrk({delta}) failed: {}", io::Error::last_os_error());
                return None;
            }

            NonNull::new(addr.cast::<u8>())
        }

        unsafe fn request_memory(&mut self, len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                match mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) {
                    libc::MAP_FAILED => {
                        log::warn!("mmap({len}) failed: {}", io::Error::last_os_error());
                        None
                    }
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(&mut self, addr: NonNull<u8>, len: usize) {
            if unsafe { munmap(addr.as_ptr().cast::<c_void>(), len as size_t) } != 0 {
                log::warn!("munmap({addr:p}, {len}) failed: {}", io::Error::last_os_error());
            }
        }

        fn page_size(&self) -> usize {
            cached_page_size(|| unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize })
        }
    }
}

#[cfg(windows)]
mod win32 {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::{self, NonNull}};

    use super::{Kernel, PlatformMemory, align, cached_page_size};

    use ::windows::Win32::System::{Memory, SystemInformation};

    /// Address space reserved for the emulated break.
    const HEAP_RESERVE: usize = 256 * 1024 * 1024;

    /// Windows has no program break, so we reserve a range of address space
    /// once and commit pages from its start as the break advances.
    #[derive(Debug)]
    pub(super) struct EmulatedBreak {
        base: *mut u8,
        brk: usize,
        committed: usize,
    }

    impl EmulatedBreak {
        pub(super) const fn new() -> Self {
            Self { base: ptr::null_mut(), brk: 0, committed: 0 }
        }
    }

    fn system_page_size() -> usize {
        unsafe {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }

    unsafe impl PlatformMemory for Kernel {
        unsafe fn extend_heap(&mut self, delta: isize) -> Option<NonNull<u8>> {
            let page_size = self.page_size();
            let heap = &mut self.heap;

            unsafe {
                if heap.base.is_null() {
                    let base = Memory::VirtualAlloc(None, HEAP_RESERVE, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);
                    if base.is_null() {
                        log::warn!("reserving {HEAP_RESERVE} bytes for the heap failed");
                        return None;
                    }
                    heap.base = base.cast();
                }

                let old = heap.brk;
                let Some(new) = old.checked_add_signed(delta).filter(|&new| new <= HEAP_RESERVE) else {
                    log::warn!("heap growth of {delta} bytes exceeds the reserved range");
                    return None;
                };

                if new > heap.committed {
                    let commit_end = align(new, page_size);
                    let addr = heap.base.add(heap.committed);
                    let committed = Memory::VirtualAlloc(
                        Some(addr as *const c_void),
                        commit_end - heap.committed,
                        Memory::MEM_COMMIT,
                        Memory::PAGE_READWRITE,
                    );
                    if committed.is_null() {
                        log::warn!("committing heap pages up to {commit_end} failed");
                        return None;
                    }
                    heap.committed = commit_end;
                }

                heap.brk = new;
                NonNull::new(heap.base.add(old))
            }
        }

        unsafe fn request_memory(&mut self, len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(&mut self, addr: NonNull<u8>, _len: usize) {
            if unsafe { Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE) }.is_err() {
                log::warn!("VirtualFree({addr:p}) failed");
            }
        }

        fn page_size(&self) -> usize {
            cached_page_size(system_page_size)
        }
    }
}

/// An in-process stand-in for the kernel.
///
/// The program break moves inside one fixed, zeroed region of `capacity`
/// bytes and mappings are served by the Rust global allocator. Growth past
/// the capacity is refused, which lets callers observe out-of-memory
/// conditions without touching the real process heap.
#[derive(Debug)]
pub struct SimulatedKernel {
    heap: NonNull<u8>,
    capacity: usize,
    brk: usize,
    page_size: usize,
    live_mappings: usize,
}

impl SimulatedKernel {
    /// Page size reported by the simulation.
    pub const PAGE_SIZE: usize = 4096;

    /// Creates a simulated heap that can grow up to `capacity` bytes, rounded
    /// up to whole pages.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or does not fit in an allocation layout.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "simulated heap needs a non-zero capacity");
        let capacity = align(capacity, Self::PAGE_SIZE);
        let layout = Layout::from_size_align(capacity, Self::PAGE_SIZE)
            .expect("simulated heap capacity overflows a layout");

        let heap = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .unwrap_or_else(|| alloc::handle_alloc_error(layout));

        Self {
            heap,
            capacity,
            brk: 0,
            page_size: Self::PAGE_SIZE,
            live_mappings: 0,
        }
    }

    /// Start of the simulated heap.
    pub fn heap_start(&self) -> *const u8 {
        self.heap.as_ptr()
    }

    /// Bytes between the start of the heap and the current break.
    pub fn heap_size(&self) -> usize {
        self.brk
    }

    /// Number of mappings requested and not yet returned.
    pub fn live_mappings(&self) -> usize {
        self.live_mappings
    }

    fn mapping_layout(&self, len: usize) -> Option<Layout> {
        Layout::from_size_align(len, self.page_size).ok()
    }
}

unsafe impl PlatformMemory for SimulatedKernel {
    unsafe fn extend_heap(&mut self, delta: isize) -> Option<NonNull<u8>> {
        let old = self.brk;
        let new = old.checked_add_signed(delta).filter(|&new| new <= self.capacity)?;

        self.brk = new;
        Some(unsafe { self.heap.add(old) })
    }

    unsafe fn request_memory(&mut self, len: usize) -> Option<NonNull<u8>> {
        let layout = self.mapping_layout(len).filter(|layout| layout.size() > 0)?;
        let addr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?;

        self.live_mappings += 1;
        Some(addr)
    }

    unsafe fn return_memory(&mut self, addr: NonNull<u8>, len: usize) {
        if let Some(layout) = self.mapping_layout(len) {
            unsafe { alloc::dealloc(addr.as_ptr(), layout) };
            self.live_mappings -= 1;
        }
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

impl Drop for SimulatedKernel {
    fn drop(&mut self) {
        if let Some(layout) = self.mapping_layout(self.capacity) {
            unsafe { alloc::dealloc(self.heap.as_ptr(), layout) };
        }
    }
}
