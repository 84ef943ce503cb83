use std::{mem, ptr::NonNull};

use crate::config::ALIGNMENT;

/// Non-null pointer to the next [`Block`] of the arena.
pub(crate) type Link = Option<NonNull<Block>>;

/// Header size of a block. Payloads start exactly this many bytes after
/// their header.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);

/// Where a block lives and whether it can be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Arena block available for reuse.
    Free,
    /// Arena block owned by the caller.
    Allocated,
    /// Standalone block backed by its own mapping, never linked in the arena.
    Mapped,
}

/// This is the structure of a block. The fields of the block are it's metadata,
/// content is placed after this header.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        |
/// |       status        |        | -> Header
/// +---------------------+        |
/// |        next         |        |
/// +---------------------+ <------+ <- pointer returned to the user
/// |       Content       |        |
/// |         ...         |        | -> `size` bytes of payload
/// |         ...         |        |
/// +---------------------+ <------+ <- next header, if adjacent
/// ```
///
/// The header is forced to 8 byte alignment so that on 32 bit targets the
/// payload that follows it still starts on an [`ALIGNMENT`] boundary.
#[repr(C, align(8))]
pub(crate) struct Block {
    /// Payload capacity in bytes, always a multiple of [`ALIGNMENT`].
    pub size: usize,
    pub status: Status,
    /// Next block in arena order. Always `None` for mapped blocks.
    pub next: Link,
}

impl Block {
    /// Writes a fresh header at `addr` and returns a pointer to it.
    ///
    /// **SAFETY**: `addr` must be aligned to [`ALIGNMENT`] and valid for
    /// writes of [`HEADER_SIZE`] bytes.
    pub unsafe fn write(addr: NonNull<u8>, size: usize, status: Status, next: Link) -> NonNull<Block> {
        let block = addr.cast::<Block>();
        unsafe { block.as_ptr().write(Block { size, status, next }) };
        block
    }

    /// Payload that follows the header of `block`.
    #[inline]
    pub fn payload(block: NonNull<Block>) -> NonNull<u8> {
        unsafe { block.cast::<u8>().add(HEADER_SIZE) }
    }

    /// Header that precedes a payload returned by the allocator.
    ///
    /// **SAFETY**: `payload` must have been returned by this allocator.
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<Block> {
        unsafe { payload.sub(HEADER_SIZE).cast() }
    }

    /// First byte past the payload of `block`.
    ///
    /// **SAFETY**: `block` must point to an initialized header.
    #[inline]
    pub unsafe fn end(block: NonNull<Block>) -> *mut u8 {
        unsafe { Block::payload(block).as_ptr().wrapping_add(block.as_ref().size) }
    }

    /// Whether `other` starts exactly where the payload of `block` ends.
    ///
    /// **SAFETY**: `block` must point to an initialized header.
    #[inline]
    pub unsafe fn is_followed_by(block: NonNull<Block>, other: NonNull<Block>) -> bool {
        unsafe { Block::end(block) == other.as_ptr().cast() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(8))]
    struct Scratch([u8; 256]);

    #[test]
    fn header_is_aligned() {
        assert_eq!(0, HEADER_SIZE % ALIGNMENT);
        assert_eq!(0, mem::align_of::<Block>() % ALIGNMENT);
    }

    #[test]
    fn payload_round_trip() {
        let mut scratch = Scratch([0; 256]);
        let addr = NonNull::new(scratch.0.as_mut_ptr()).unwrap();

        unsafe {
            let block = Block::write(addr, 64, Status::Allocated, None);
            let payload = Block::payload(block);

            assert_eq!(HEADER_SIZE, payload.as_ptr() as usize - addr.as_ptr() as usize);
            assert_eq!(block, Block::from_payload(payload));
            assert_eq!(payload.as_ptr().add(64), Block::end(block));
        }
    }

    #[test]
    fn adjacency() {
        let mut scratch = Scratch([0; 256]);
        let base = NonNull::new(scratch.0.as_mut_ptr()).unwrap();

        unsafe {
            let first = Block::write(base, 32, Status::Free, None);
            let second = Block::write(base.add(HEADER_SIZE + 32), 16, Status::Free, None);
            let far = Block::write(base.add(2 * HEADER_SIZE + 64), 8, Status::Free, None);

            assert!(Block::is_followed_by(first, second));
            assert!(!Block::is_followed_by(first, far));
            assert!(!Block::is_followed_by(second, first));
        }
    }
}
