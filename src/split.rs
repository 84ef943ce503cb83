//! Splitting oversized blocks and merging free neighbours.

use std::ptr::NonNull;

use crate::{
    arena::Arena,
    block::{Block, HEADER_SIZE, Status},
    config::MIN_SPLIT_SIZE,
};

/// Shrinks `block` to `padded` bytes and turns what is left into a new free
/// block linked right after it. Nothing happens if the leftover can't hold a
/// header plus [`MIN_SPLIT_SIZE`] bytes; the block keeps it as slack.
///
/// ```text
/// +--------+-------------------------------+
/// | Header |            size               |
/// +--------+-------------------------------+
///
/// +--------+------------+--------+---------+
/// | Header |   padded   | Header |  Free   |
/// +--------+------------+--------+---------+
/// ```
///
/// **SAFETY**: `block` must be a valid header with `size >= padded`.
pub(crate) unsafe fn split(mut block: NonNull<Block>, padded: usize) {
    unsafe {
        let header = block.as_mut();
        debug_assert!(header.size >= padded);

        let leftover = header.size - padded;
        if leftover < HEADER_SIZE + MIN_SPLIT_SIZE {
            return;
        }

        let addr = Block::payload(block).add(padded);
        let rest = Block::write(addr, leftover - HEADER_SIZE, Status::Free, header.next);

        header.size = padded;
        header.next = Some(rest);
    }
}

/// Folds the block that follows `block` in the list into it.
///
/// **SAFETY**: `block` must have a successor that is physically adjacent.
pub(crate) unsafe fn absorb_next(mut block: NonNull<Block>) {
    unsafe {
        let header = block.as_mut();
        let Some(next) = header.next else {
            return;
        };
        debug_assert!(Block::is_followed_by(block, next));

        let next = next.as_ref();
        header.size += HEADER_SIZE + next.size;
        header.next = next.next;
    }
}

/// Extends an allocated arena block over its free successor so that it can
/// hold `padded` bytes, then splits off whatever is not needed.
///
/// Returns `false`, leaving everything untouched, when the successor is
/// missing, allocated, not adjacent or too small.
///
/// **SAFETY**: `block` must be a valid arena header.
pub(crate) unsafe fn grow_in_place(block: NonNull<Block>, padded: usize) -> bool {
    unsafe {
        let header = block.as_ref();
        let Some(next) = header.next else {
            return false;
        };

        let successor = next.as_ref();
        let fits = padded <= successor.size + HEADER_SIZE + header.size;
        if successor.status != Status::Free || !Block::is_followed_by(block, next) || !fits {
            return false;
        }

        absorb_next(block);
        split(block, padded);
    }

    true
}

impl Arena {
    /// Merges every run of free blocks that are neighbours both in the list
    /// and in memory.
    ///
    /// After a merge the grown block is compared again with its new
    /// successor, so a single pass leaves no mergeable pair behind.
    pub fn coalesce(&mut self) {
        let mut current = self.head();

        while let Some(block) = current {
            unsafe {
                let header = block.as_ref();
                let Some(next) = header.next else {
                    break;
                };

                let mergeable = header.status == Status::Free
                    && next.as_ref().status == Status::Free
                    && Block::is_followed_by(block, next);

                if mergeable {
                    absorb_next(block);
                } else {
                    current = Some(next);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MMAP_THRESHOLD,
        kernel::{PlatformMemory, SimulatedKernel},
    };

    fn layout(arena: &Arena) -> Vec<(usize, Status)> {
        arena
            .iter()
            .map(|block| unsafe { (block.as_ref().size, block.as_ref().status) })
            .collect()
    }

    fn set_status(arena: &Arena, index: usize, status: Status) {
        let mut block = arena.iter().nth(index).unwrap();
        unsafe { block.as_mut().status = status };
    }

    /// Arena whose blocks have the given payload sizes, all allocated except
    /// the remainder of the initial reservation.
    fn arena_with(kernel: &mut SimulatedKernel, sizes: &[usize]) -> Arena {
        let mut arena = Arena::new();
        unsafe {
            let mut block = arena.bootstrap(kernel, sizes[0]).unwrap();
            for &size in &sizes[1..] {
                let mut rest = block.as_ref().next.unwrap();
                rest.as_mut().status = Status::Allocated;
                split(rest, size);
                block = rest;
            }
        }
        arena
    }

    #[test]
    fn split_creates_trailing_free_block() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let arena = arena_with(&mut kernel, &[256]);
        let block = arena.head().unwrap();

        unsafe {
            (*block.as_ptr()).next = None;
            split(block, 64);
        }

        assert_eq!(
            vec![(64, Status::Allocated), (256 - 64 - HEADER_SIZE, Status::Free)],
            layout(&arena)
        );
    }

    #[test]
    fn split_keeps_small_leftover_as_slack() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let arena = arena_with(&mut kernel, &[64]);
        let block = arena.head().unwrap();

        unsafe {
            (*block.as_ptr()).next = None;
            split(block, 64 - 8);
            split(block, 64 - HEADER_SIZE - MIN_SPLIT_SIZE + 8);
        }

        assert_eq!(vec![(64, Status::Allocated)], layout(&arena));
    }

    #[test]
    fn coalesce_merges_runs() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let mut arena = arena_with(&mut kernel, &[64, 64, 64, 64]);

        set_status(&arena, 4, Status::Allocated);
        set_status(&arena, 1, Status::Free);
        set_status(&arena, 2, Status::Free);
        set_status(&arena, 3, Status::Free);
        arena.coalesce();

        let rest = MMAP_THRESHOLD - 5 * HEADER_SIZE - 4 * 64;
        assert_eq!(
            vec![
                (64, Status::Allocated),
                (3 * 64 + 2 * HEADER_SIZE, Status::Free),
                (rest, Status::Allocated),
            ],
            layout(&arena)
        );
    }

    #[test]
    fn coalesce_ignores_allocated_neighbours() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let mut arena = arena_with(&mut kernel, &[64, 64, 64]);

        set_status(&arena, 3, Status::Allocated);
        set_status(&arena, 0, Status::Free);
        set_status(&arena, 2, Status::Free);
        let before = layout(&arena);
        arena.coalesce();

        assert_eq!(before, layout(&arena));
    }

    #[test]
    fn coalesce_is_idempotent() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let mut arena = arena_with(&mut kernel, &[8, 16, 24, 32, 40, 48]);

        for index in [0, 1, 3, 4, 5] {
            set_status(&arena, index, Status::Free);
        }

        arena.coalesce();
        let once = layout(&arena);
        arena.coalesce();

        assert_eq!(once, layout(&arena));
        assert_eq!(3, once.len());
    }

    #[test]
    fn coalesce_requires_physical_adjacency() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let mut arena = arena_with(&mut kernel, &[MMAP_THRESHOLD - HEADER_SIZE]);

        unsafe {
            // Someone else moves the break between our two appends.
            kernel.extend_heap(64).unwrap();
            arena.append(&mut kernel, 32).unwrap();
        }

        set_status(&arena, 0, Status::Free);
        set_status(&arena, 1, Status::Free);
        arena.coalesce();

        assert_eq!(2, arena.iter().count());
    }

    #[test]
    fn grow_in_place_absorbs_free_successor() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let arena = arena_with(&mut kernel, &[64, 256, 64]);
        set_status(&arena, 1, Status::Free);
        let block = arena.head().unwrap();

        assert!(unsafe { grow_in_place(block, 128) });

        let rest = MMAP_THRESHOLD - 4 * HEADER_SIZE - 64 - 256 - 64;
        assert_eq!(
            vec![
                (128, Status::Allocated),
                (64 + 256 - 128, Status::Free),
                (64, Status::Allocated),
                (rest, Status::Free),
            ],
            layout(&arena)
        );
    }

    #[test]
    fn grow_in_place_takes_whole_successor() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let arena = arena_with(&mut kernel, &[64, 32, 64]);
        set_status(&arena, 1, Status::Free);
        let block = arena.head().unwrap();

        assert!(unsafe { grow_in_place(block, 64 + 32 + HEADER_SIZE) });
        assert_eq!((64 + 32 + HEADER_SIZE, Status::Allocated), layout(&arena)[0]);
        assert_eq!(3, arena.iter().count());
    }

    #[test]
    fn grow_in_place_refuses() {
        let mut kernel = SimulatedKernel::new(1 << 20);
        let arena = arena_with(&mut kernel, &[64, 32, 64]);
        let block = arena.head().unwrap();

        // Successor is allocated.
        assert!(!unsafe { grow_in_place(block, 96) });

        // Successor is free but too small.
        set_status(&arena, 1, Status::Free);
        let before = layout(&arena);
        assert!(!unsafe { grow_in_place(block, 64 + 32 + HEADER_SIZE + 8) });
        assert_eq!(before, layout(&arena));
    }
}
