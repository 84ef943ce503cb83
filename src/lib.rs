//! # brkalloc
//!
//! A replacement for the `malloc` family (allocate, zero-allocate, resize,
//! release) for single threaded programs.
//!
//! Small requests are carved out of an arena grown with the program break.
//! The arena is a singly linked list of blocks, each one a header followed by
//! its payload:
//!
//! ```text
//! +--------+---------+--------+---------+--------+-----------------+
//! | Header | Payload | Header | Payload | Header |  Free Payload   |
//! +--------+---------+--------+---------+--------+-----------------+
//!          ^                                                       ^
//!          pointer returned to the user                  program break
//! ```
//!
//! Free blocks are reused best-fit, oversized matches are split and free
//! neighbours are merged before every search. Requests that reach
//! [`config::MMAP_THRESHOLD`] (128 KiB, header included) skip the arena and
//! get an anonymous mapping of their own, which is unmapped on release.
//!
//! ```rust,no_run
//! use brkalloc::MemAlloc;
//!
//! let mut allocator = MemAlloc::new();
//!
//! unsafe {
//!     let ptr = allocator.allocate(64);
//!     let ptr = allocator.resize(ptr, 256);
//!     allocator.release(ptr);
//! }
//! ```
//!
//! The memory itself comes from a [`PlatformMemory`] implementation:
//! [`Kernel`] talks to the operating system, [`SimulatedKernel`] keeps the
//! whole heap inside one buffer.

mod arena;
mod block;
pub mod config;
mod error;
pub mod global;
mod kernel;
mod locator;
mod mapped;
mod memalloc;
mod split;
mod utils;

pub use block::{HEADER_SIZE, Status};
pub use error::AllocError;
pub use kernel::{Kernel, PlatformMemory, SimulatedKernel};
pub use memalloc::{BlockInfo, Blocks, MemAlloc};
