use std::ptr::NonNull;

use crate::{
    arena::Arena,
    block::{Block, Link, Status},
    error::AllocError,
    kernel::PlatformMemory,
};

impl Arena {
    /// Returns the smallest free block that can hold `padded` bytes, the
    /// first one found on ties.
    ///
    /// A free tail that is too small is not skipped: the break is moved so
    /// that the tail holds exactly `padded` bytes and it is returned right
    /// away, even if a fitting block was already seen earlier in the scan.
    /// That keeps the heap from growing a new block behind a free one.
    ///
    /// The caller still has to mark the returned block as allocated.
    pub unsafe fn find_best<P: PlatformMemory>(
        &self,
        platform: &mut P,
        padded: usize,
    ) -> Result<Link, AllocError> {
        let mut best: Link = None;

        for block in self.iter() {
            let header = unsafe { block.as_ref() };
            if header.status != Status::Free {
                continue;
            }

            if header.size >= padded {
                if best.is_none_or(|best| unsafe { best.as_ref().size } > header.size) {
                    best = Some(block);
                }
            } else if header.next.is_none() && unsafe { extend_tail(platform, block, padded)? } {
                return Ok(Some(block));
            }
        }

        Ok(best)
    }
}

/// Moves the break so the free tail `block` ends up holding `padded` bytes.
///
/// Returns `false` if the break is no longer at the end of the tail, which
/// happens when something else in the process moved it since we last grew.
unsafe fn extend_tail<P: PlatformMemory>(
    platform: &mut P,
    mut block: NonNull<Block>,
    padded: usize,
) -> Result<bool, AllocError> {
    unsafe {
        let at_break = platform
            .extend_heap(0)
            .is_some_and(|brk| brk.as_ptr() == Block::end(block));
        if !at_break {
            log::debug!("break moved past the arena tail at {block:p}, not extending it");
            return Ok(false);
        }

        let header = block.as_mut();
        let requested = (padded - header.size) as isize;
        platform.extend_heap(requested).ok_or(AllocError::OutOfMemory { requested })?;

        log::debug!("arena tail at {block:p} extended by {requested} bytes");
        header.size = padded;
    }

    Ok(true)
}
