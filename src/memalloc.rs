use std::{cmp, ptr::{self, NonNull}};

use crate::{
    arena::{self, Arena},
    block::{Block, HEADER_SIZE, Status},
    config::MMAP_THRESHOLD,
    error::{self, AllocError},
    kernel::{Kernel, PlatformMemory},
    mapped,
    split::{grow_in_place, split},
    utils::pad,
};

/// Drop-in replacement for the `malloc` family.
///
/// Small requests are served from an arena grown through the program
/// break; requests whose padded size plus header reach [`MMAP_THRESHOLD`]
/// get a mapping of their own.
///
/// There is no locking. One instance must only be used from one thread at a
/// time, and an operation must finish before the next one starts.
pub struct MemAlloc<P: PlatformMemory = Kernel> {
    platform: P,
    arena: Arena,
}

/// Snapshot of one arena block, as returned by [`MemAlloc::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the payload.
    pub addr: usize,
    /// Payload capacity in bytes.
    pub size: usize,
    pub status: Status,
}

/// Iterator over the arena of a [`MemAlloc`] in list order.
pub struct Blocks<'a> {
    inner: arena::Iter<'a>,
}

impl MemAlloc<Kernel> {
    /// Allocator backed by the real operating system.
    pub const fn new() -> Self {
        Self::with_platform(Kernel::new())
    }
}

impl Default for MemAlloc<Kernel> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PlatformMemory> MemAlloc<P> {
    /// Allocator that gets its memory from `platform`.
    pub const fn with_platform(platform: P) -> Self {
        Self {
            platform,
            arena: Arena::new(),
        }
    }

    /// The memory source this allocator draws from.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Allocates at least `size` bytes aligned to 8.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidSize`] for a zero `size`; [`AllocError::OutOfMemory`]
    /// or [`AllocError::MapFailed`] when the kernel refuses memory.
    ///
    /// # Safety
    ///
    /// The platform must not be shared with another allocator that assumes
    /// it owns the memory this one gets.
    pub unsafe fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        unsafe { self.allocate_routed(size, MMAP_THRESHOLD) }
    }

    /// Allocates `count * size` zeroed bytes.
    ///
    /// Requests are routed to a mapping from one page on instead of from
    /// [`MMAP_THRESHOLD`]; the next call is not affected.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidSize`] if either argument is zero or the product
    /// overflows; otherwise as [`MemAlloc::try_allocate`].
    ///
    /// # Safety
    ///
    /// Same as [`MemAlloc::try_allocate`].
    pub unsafe fn try_zero_allocate(&mut self, count: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
        if count == 0 || size == 0 {
            return Err(AllocError::InvalidSize);
        }
        let total = count.checked_mul(size).ok_or(AllocError::InvalidSize)?;

        unsafe {
            let threshold = self.platform.page_size();
            let payload = self.allocate_routed(total, threshold)?;

            // Fresh mappings are already zeroed.
            if Block::from_payload(payload).as_ref().status != Status::Mapped {
                ptr::write_bytes(payload.as_ptr(), 0, total);
            }

            Ok(payload)
        }
    }

    /// Changes the size of the allocation at `ptr` to `size` bytes, keeping
    /// its contents up to the smaller of both sizes.
    ///
    /// A null `ptr` allocates. A zero `size` releases `ptr` and returns
    /// `Ok(None)`. Otherwise, in this order, the block is shrunk in place,
    /// grown in place over a free neighbour, or moved to a new allocation.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidState`] if `ptr` was already released, plus
    /// anything [`MemAlloc::try_allocate`] reports when moving. The existing
    /// allocation is left untouched on error.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by this allocator that has
    /// not been moved by an earlier resize.
    pub unsafe fn try_resize(&mut self, ptr: *mut u8, size: usize) -> Result<Option<NonNull<u8>>, AllocError> {
        let Some(payload) = NonNull::new(ptr) else {
            return unsafe { self.try_allocate(size).map(Some) };
        };

        if size == 0 {
            unsafe { self.release(ptr) };
            return Ok(None);
        }

        unsafe {
            let block = Block::from_payload(payload);
            let (status, current) = (block.as_ref().status, block.as_ref().size);

            if status == Status::Free {
                return Err(AllocError::InvalidState { addr: payload.as_ptr() as usize });
            }
            let padded = pad(size).ok_or(AllocError::InvalidSize)?;

            if status == Status::Allocated {
                if padded <= current && padded < MMAP_THRESHOLD && current < MMAP_THRESHOLD {
                    log::trace!("resize {payload:p}: shrink {current} -> {padded} in place");
                    split(block, padded);
                    return Ok(Some(payload));
                }

                self.arena.coalesce();
                if grow_in_place(block, padded) {
                    log::trace!("resize {payload:p}: grow {current} -> {padded} in place");
                    return Ok(Some(payload));
                }
            }

            let moved = self.try_allocate(size)?;
            ptr::copy_nonoverlapping(payload.as_ptr(), moved.as_ptr(), cmp::min(size, current));
            self.release(ptr);

            log::trace!("resize {payload:p}: moved to {moved:p}");
            Ok(Some(moved))
        }
    }

    /// Gives the allocation at `ptr` back. Mappings are returned to the
    /// kernel right away; arena blocks are only marked free. Null is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this allocator.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };

        unsafe {
            let mut block = Block::from_payload(payload);
            log::trace!("release {payload:p}");

            match block.as_ref().status {
                Status::Mapped => mapped::unmap_block(&mut self.platform, block),
                _ => {
                    debug_assert!(self.arena.contains(block));
                    block.as_mut().status = Status::Free;
                }
            }
        }
    }

    /// Like [`MemAlloc::try_allocate`], but returns null for a zero `size`
    /// and aborts the process if the kernel refuses memory.
    ///
    /// # Safety
    ///
    /// Same as [`MemAlloc::try_allocate`].
    pub unsafe fn allocate(&mut self, size: usize) -> *mut u8 {
        error::into_raw(unsafe { self.try_allocate(size) })
    }

    /// Like [`MemAlloc::try_zero_allocate`], with the error handling of
    /// [`MemAlloc::allocate`].
    ///
    /// # Safety
    ///
    /// Same as [`MemAlloc::try_allocate`].
    pub unsafe fn zero_allocate(&mut self, count: usize, size: usize) -> *mut u8 {
        error::into_raw(unsafe { self.try_zero_allocate(count, size) })
    }

    /// Like [`MemAlloc::try_resize`], returning null when the block was
    /// released or the call rejected, and aborting if the kernel refuses
    /// memory.
    ///
    /// # Safety
    ///
    /// Same as [`MemAlloc::try_resize`].
    pub unsafe fn resize(&mut self, ptr: *mut u8, size: usize) -> *mut u8 {
        match unsafe { self.try_resize(ptr, size) } {
            Ok(None) => ptr::null_mut(),
            Ok(Some(payload)) => payload.as_ptr(),
            Err(err) => error::into_raw(Err(err)),
        }
    }

    /// Number of bytes the allocation at `ptr` can hold, which may exceed
    /// the size it was requested with.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live pointer returned by this allocator.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { Block::from_payload(ptr).as_ref().size }
    }

    /// Walks the arena in list order. Mapped blocks are not part of it.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            inner: self.arena.iter(),
        }
    }

    /// The allocate routine behind both entry points. Requests whose padded
    /// size plus header reach `threshold` are mapped.
    unsafe fn allocate_routed(&mut self, size: usize, threshold: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidSize);
        }
        let padded = pad(size).ok_or(AllocError::InvalidSize)?;

        let block = if padded.saturating_add(HEADER_SIZE) < threshold {
            log::trace!("allocate {size}: arena, {padded} bytes");
            unsafe { self.allocate_in_arena(padded)? }
        } else {
            log::trace!("allocate {size}: mapping, {padded} bytes");
            unsafe { mapped::map_block(&mut self.platform, padded)? }
        };

        Ok(Block::payload(block))
    }

    unsafe fn allocate_in_arena(&mut self, padded: usize) -> Result<NonNull<Block>, AllocError> {
        unsafe {
            if self.arena.is_empty() {
                return self.arena.bootstrap(&mut self.platform, padded);
            }

            self.arena.coalesce();

            match self.arena.find_best(&mut self.platform, padded)? {
                Some(mut block) => {
                    block.as_mut().status = Status::Allocated;
                    split(block, padded);
                    Ok(block)
                }
                None => self.arena.append(&mut self.platform, padded),
            }
        }
    }
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.inner.next()?;
        let header = unsafe { block.as_ref() };

        Some(BlockInfo {
            addr: Block::payload(block).as_ptr() as usize,
            size: header.size,
            status: header.status,
        })
    }
}
