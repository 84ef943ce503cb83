use std::{marker::PhantomData, ptr::NonNull};

use crate::{
    block::{Block, HEADER_SIZE, Link, Status},
    config::{ALIGNMENT, MMAP_THRESHOLD},
    error::AllocError,
    kernel::PlatformMemory,
    split::split,
    utils::align,
};

/// The heap region grown through the program break, managed as a singly
/// linked list of [`Block`] headers stored in-band.
///
/// ```text
///  head
///   |
///   v
/// +--------+---------+   +--------+---------+   +--------+-------------+
/// | Header | Payload |-->| Header | Payload |-->| Header |   Payload   |
/// +--------+---------+   +--------+---------+   +--------+-------------+
///                                                                      ^
///                                                               program break
/// ```
///
/// Blocks appear in list order at strictly increasing addresses. Two
/// neighbours are usually adjacent in memory, but anyone else moving the
/// break can leave a gap between them.
pub(crate) struct Arena {
    head: Link,
}

/// Iterator over the blocks of an [`Arena`] in list order.
pub(crate) struct Iter<'a> {
    current: Link,
    marker: PhantomData<&'a Arena>,
}

impl Arena {
    pub const fn new() -> Self {
        Self { head: None }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn head(&self) -> Link {
        self.head
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            current: self.head,
            marker: PhantomData,
        }
    }

    /// Last block of the list.
    pub fn tail(&self) -> Link {
        self.iter().last()
    }

    /// Creates the arena on the first small allocation.
    ///
    /// We reserve [`MMAP_THRESHOLD`] bytes up front. The first block takes
    /// `padded` bytes and the rest becomes a free block, unless the rest is
    /// too small to be worth a header, in which case the first block keeps it.
    ///
    /// **SAFETY**: the arena must be empty.
    pub unsafe fn bootstrap<P: PlatformMemory>(
        &mut self,
        platform: &mut P,
        padded: usize,
    ) -> Result<NonNull<Block>, AllocError> {
        debug_assert!(self.is_empty());

        let addr = unsafe { grow(platform, MMAP_THRESHOLD)? };

        log::debug!("arena created at {addr:p} with {MMAP_THRESHOLD} bytes");

        unsafe {
            let block = Block::write(addr, MMAP_THRESHOLD - HEADER_SIZE, Status::Allocated, None);
            split(block, padded);
            self.head = Some(block);

            Ok(block)
        }
    }

    /// Grows the break by `padded` bytes plus a header and appends the new
    /// block, already allocated, to the end of the list.
    ///
    /// **SAFETY**: the arena must not be empty.
    pub unsafe fn append<P: PlatformMemory>(
        &mut self,
        platform: &mut P,
        padded: usize,
    ) -> Result<NonNull<Block>, AllocError> {
        let addr = unsafe { grow(platform, padded + HEADER_SIZE)? };

        log::debug!("arena grew by {} bytes, new tail at {addr:p}", padded + HEADER_SIZE);

        unsafe {
            let block = Block::write(addr, padded, Status::Allocated, None);

            match self.tail() {
                Some(mut tail) => tail.as_mut().next = Some(block),
                None => self.head = Some(block),
            }

            Ok(block)
        }
    }

    /// Whether `block` is reachable from the head of the arena.
    pub fn contains(&self, block: NonNull<Block>) -> bool {
        self.iter().any(|node| node == block)
    }
}

/// Moves the break by `len` bytes and returns where the new memory starts,
/// first bumping the break to an [`ALIGNMENT`] boundary if someone else left
/// it unaligned.
unsafe fn grow<P: PlatformMemory>(platform: &mut P, len: usize) -> Result<NonNull<u8>, AllocError> {
    let requested = len as isize;
    let oom = AllocError::OutOfMemory { requested };

    let brk = unsafe { platform.extend_heap(0) }.ok_or(oom)?.as_ptr() as usize;
    let gap = align(brk, ALIGNMENT) - brk;
    if gap > 0 {
        log::debug!("break at {brk:#x} is unaligned, skipping {gap} bytes");
        unsafe { platform.extend_heap(gap as isize) }.ok_or(oom)?;
    }

    unsafe { platform.extend_heap(requested) }.ok_or(oom)
}

impl Iterator for Iter<'_> {
    type Item = NonNull<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
        }

        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::MIN_SPLIT_SIZE, kernel::SimulatedKernel};

    fn layout(arena: &Arena) -> Vec<(usize, Status)> {
        arena
            .iter()
            .map(|block| unsafe { (block.as_ref().size, block.as_ref().status) })
            .collect()
    }

    #[test]
    fn new_arena_is_empty() {
        let arena = Arena::new();

        assert!(arena.is_empty());
        assert!(arena.iter().next().is_none());
        assert!(arena.tail().is_none());
    }

    #[test]
    fn bootstrap_splits_the_reservation() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let mut arena = Arena::new();

        unsafe {
            let block = arena.bootstrap(&mut kernel, 64).unwrap();

            assert_eq!(Some(block), arena.head());
            assert_eq!(kernel.heap_start(), block.as_ptr().cast::<u8>().cast_const());
        }

        assert_eq!(MMAP_THRESHOLD, kernel.heap_size());
        assert_eq!(
            vec![
                (64, Status::Allocated),
                (MMAP_THRESHOLD - 2 * HEADER_SIZE - 64, Status::Free),
            ],
            layout(&arena)
        );
    }

    #[test]
    fn bootstrap_keeps_small_remainder() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let mut arena = Arena::new();

        // Leaves room for a header but not for a minimum sized payload.
        let padded = MMAP_THRESHOLD - 2 * HEADER_SIZE - (MIN_SPLIT_SIZE - 8);
        unsafe { arena.bootstrap(&mut kernel, padded).unwrap() };

        assert_eq!(vec![(MMAP_THRESHOLD - HEADER_SIZE, Status::Allocated)], layout(&arena));
    }

    #[test]
    fn append_grows_the_break() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let mut arena = Arena::new();

        unsafe {
            arena.bootstrap(&mut kernel, MMAP_THRESHOLD - HEADER_SIZE).unwrap();
            let tail = arena.append(&mut kernel, 40).unwrap();

            assert_eq!(Some(tail), arena.tail());
            assert!(arena.contains(tail));
            assert!(Block::is_followed_by(arena.head().unwrap(), tail));
        }

        assert_eq!(MMAP_THRESHOLD + HEADER_SIZE + 40, kernel.heap_size());
        assert_eq!(2, arena.iter().count());
    }

    #[test]
    fn bootstrap_realigns_the_break() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let mut arena = Arena::new();

        unsafe {
            kernel.extend_heap(3).unwrap();
            let block = arena.bootstrap(&mut kernel, 64).unwrap();

            assert_eq!(0, block.as_ptr() as usize % ALIGNMENT);
            assert_eq!(kernel.heap_start().add(8), block.as_ptr().cast::<u8>().cast_const());
        }

        assert_eq!(8 + MMAP_THRESHOLD, kernel.heap_size());
    }

    #[test]
    fn append_realigns_the_break() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let mut arena = Arena::new();

        unsafe {
            arena.bootstrap(&mut kernel, MMAP_THRESHOLD - HEADER_SIZE).unwrap();
            kernel.extend_heap(5).unwrap();
            let tail = arena.append(&mut kernel, 40).unwrap();

            assert_eq!(0, tail.as_ptr() as usize % ALIGNMENT);
            assert_eq!(Some(tail), arena.tail());
            assert!(!Block::is_followed_by(arena.head().unwrap(), tail));
        }

        assert_eq!(MMAP_THRESHOLD + 8 + HEADER_SIZE + 40, kernel.heap_size());
    }

    #[test]
    fn bootstrap_out_of_memory() {
        let mut kernel = SimulatedKernel::new(4096);
        let mut arena = Arena::new();

        let result = unsafe { arena.bootstrap(&mut kernel, 64) };

        assert_eq!(
            Err(AllocError::OutOfMemory { requested: MMAP_THRESHOLD as isize }),
            result
        );
        assert!(arena.is_empty());
    }
}
