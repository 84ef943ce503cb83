//! Constants that callers can observe through the allocator's behaviour.

/// Every payload size and every header offset is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Requests whose padded size plus header reach this value bypass the arena
/// and get their own mapping. It is also the size of the initial arena.
pub const MMAP_THRESHOLD: usize = 128 * 1024;

/// Smallest payload a block carved off by a split may have. Smaller leftovers
/// stay inside the block they came from.
pub const MIN_SPLIT_SIZE: usize = 32;
