//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

use crate::config::ALIGNMENT;

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This is used to round the emulated program break up to whole pages on
/// platforms that commit memory page by page.
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Pads a requested `size` up to the next multiple of [`ALIGNMENT`].
///
/// Every size comparison, split and allocation works on padded sizes. Returns
/// `None` if the padded value does not fit in a `usize`.
#[inline]
pub fn pad(size: usize) -> Option<usize> {
    size.checked_next_multiple_of(ALIGNMENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let aligments = vec![(1..4096, 4096), (4097..8192, 8192)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, 4096))
            }
        }
    }

    #[test]
    fn pad_to_eight_bytes() {
        let paddings = vec![(1..=8, 8), (9..=16, 16), (17..=24, 24), (25..=32, 32)];

        for (sizes, expected) in paddings {
            for size in sizes {
                assert_eq!(Some(expected), pad(size));
            }
        }
    }

    #[test]
    fn pad_keeps_multiples() {
        assert_eq!(Some(0), pad(0));
        assert_eq!(Some(64), pad(64));
        assert_eq!(Some(131_072), pad(131_072));
    }

    #[test]
    fn pad_overflow() {
        assert_eq!(None, pad(usize::MAX));
        assert_eq!(None, pad(usize::MAX - 3));
    }
}
