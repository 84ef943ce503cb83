//! Error kinds reported by the allocator and the fail-fast path taken when
//! the operating system refuses memory.

use std::{process, ptr::NonNull};

use thiserror::Error;

/// Reasons an allocator operation can fail.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// A size or count of zero, or one whose padded value overflows.
    #[error("invalid allocation size")]
    InvalidSize,

    /// The payload at `addr` belongs to a block that was already released.
    #[error("block at {addr:#x} has already been released")]
    InvalidState {
        /// Payload address handed to the allocator.
        addr: usize,
    },

    /// The program break could not be moved.
    #[error("heap growth of {requested} bytes refused")]
    OutOfMemory {
        /// Signed break delta that was refused.
        requested: isize,
    },

    /// An anonymous mapping could not be created.
    #[error("mapping of {len} bytes refused")]
    MapFailed {
        /// Length of the refused mapping, header included.
        len: usize,
    },
}

impl AllocError {
    /// Whether the error comes from the OS refusing memory. There is no safe
    /// way to continue with a partially grown arena, so these abort the
    /// process when they reach the pointer-returning API.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. } | Self::MapFailed { .. })
    }
}

/// Logs `err` and terminates the process.
pub(crate) fn die(err: AllocError) -> ! {
    log::error!("fatal allocator failure: {err}");
    eprintln!("brkalloc: {err}");
    process::abort()
}

/// Turns the result of a fallible operation into the pointer the C-style API
/// returns: null for rejected calls, abort for fatal ones.
pub(crate) fn into_raw(result: Result<NonNull<u8>, AllocError>) -> *mut u8 {
    match result {
        Ok(ptr) => ptr.as_ptr(),
        Err(err) if err.is_fatal() => die(err),
        Err(err) => {
            log::warn!("{err}");
            std::ptr::null_mut()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds() {
        assert!(!AllocError::InvalidSize.is_fatal());
        assert!(!AllocError::InvalidState { addr: 0x1000 }.is_fatal());
        assert!(AllocError::OutOfMemory { requested: 4096 }.is_fatal());
        assert!(AllocError::MapFailed { len: 1 << 20 }.is_fatal());
    }

    #[test]
    fn rejected_calls_become_null() {
        assert!(into_raw(Err(AllocError::InvalidSize)).is_null());
        assert!(into_raw(Err(AllocError::InvalidState { addr: 8 })).is_null());
    }

    #[test]
    fn messages() {
        assert_eq!(
            "block at 0x10 has already been released",
            AllocError::InvalidState { addr: 16 }.to_string()
        );
        assert_eq!(
            "heap growth of 256 bytes refused",
            AllocError::OutOfMemory { requested: 256 }.to_string()
        );
    }
}
