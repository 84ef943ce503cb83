//! Large requests bypass the arena and get a mapping of their own.
//!
//! ```text
//! +--------+----------------------------------+
//! | Header |          padded payload          |  <- one mapping, one block
//! +--------+----------------------------------+
//! ```
//!
//! Mapped blocks are never linked into the arena and are given back to the
//! kernel as soon as they are released.

use std::ptr::NonNull;

use crate::{
    block::{Block, HEADER_SIZE, Status},
    error::AllocError,
    kernel::PlatformMemory,
};

/// Maps a standalone block with room for `padded` bytes of payload.
pub(crate) unsafe fn map_block<P: PlatformMemory>(
    platform: &mut P,
    padded: usize,
) -> Result<NonNull<Block>, AllocError> {
    let len = padded.checked_add(HEADER_SIZE).ok_or(AllocError::InvalidSize)?;

    unsafe {
        let addr = platform.request_memory(len).ok_or(AllocError::MapFailed { len })?;
        log::debug!("mapped {len} bytes at {addr:p}");

        Ok(Block::write(addr, padded, Status::Mapped, None))
    }
}

/// Returns the whole mapping behind `block` to the kernel.
///
/// **SAFETY**: `block` must come from [`map_block`] and must not be used
/// afterwards.
pub(crate) unsafe fn unmap_block<P: PlatformMemory>(platform: &mut P, block: NonNull<Block>) {
    unsafe {
        debug_assert_eq!(Status::Mapped, block.as_ref().status);

        let len = block.as_ref().size + HEADER_SIZE;
        log::debug!("unmapping {len} bytes at {block:p}");

        platform.return_memory(block.cast(), len);
    }
}
