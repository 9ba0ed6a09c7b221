//! Heap carve-out configuration
//!
//! The boot code hands the allocator a raw base address and a byte length.
//! That pair is the only configuration the heap recognizes.

use crate::block::{align_down, align_up, ALIGNMENT};

/// Largest arena the 32-bit size fields can describe
pub const MAX_ARENA_LEN: usize = align_down(u32::MAX as usize);

/// Heap carve-out as provided by the boot code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct HeapConfig {
    /// Base address of the reserved region
    pub base: usize,

    /// Length of the reserved region in bytes
    pub len: usize,
}

/// Trimmed arena range, both ends aligned to `ALIGNMENT`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaRange {
    /// First usable address
    pub start: usize,

    /// One past the last usable address
    pub end: usize,
}

impl ArenaRange {
    /// Arena length in bytes
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Check if `addr` lies within `[start, end)`
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }
}

impl HeapConfig {
    pub const fn new(base: usize, len: usize) -> Self {
        Self { base, len }
    }

    /// Compute the arena actually managed for this carve-out
    ///
    /// The base is rounded up to `ALIGNMENT`, the length shrinks by the bytes
    /// skipped and is rounded down to `ALIGNMENT`, then capped at
    /// [`MAX_ARENA_LEN`]. A carve-out too small to reach an aligned address
    /// yields an empty range. The range never extends past the top of the
    /// address space; a carve-out that would wrap is cut there.
    pub fn trimmed(&self) -> ArenaRange {
        let start = match align_up(self.base) {
            Some(start) => start,
            None => return ArenaRange { start: self.base, end: self.base },
        };

        let skipped = start - self.base;
        let len = self
            .len
            .saturating_sub(skipped)
            .min(usize::MAX - start)
            .min(MAX_ARENA_LEN);
        let len = align_down(len);
        debug_assert!(len % ALIGNMENT == 0);

        ArenaRange {
            start,
            end: start + len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_carve_out_unchanged() {
        let range = HeapConfig::new(0x1210_0000, 1024).trimmed();
        assert_eq!(range.start, 0x1210_0000);
        assert_eq!(range.end, 0x1210_0400);
        assert_eq!(range.len(), 1024);
    }

    #[test]
    fn test_unaligned_base_trims_both_ends() {
        // 5 bytes skipped to reach 0x1008, 1019 left, rounded down to 1016
        let range = HeapConfig::new(0x1003, 1024).trimmed();
        assert_eq!(range.start, 0x1008);
        assert_eq!(range.len(), 1016);
    }

    #[test]
    fn test_unaligned_length() {
        let range = HeapConfig::new(0x2000, 1030).trimmed();
        assert_eq!(range.len(), 1024);
    }

    #[test]
    fn test_carve_out_smaller_than_skip() {
        let range = HeapConfig::new(0x1001, 3).trimmed();
        assert!(range.is_empty());
    }

    #[test]
    fn test_carve_out_at_top_of_address_space() {
        // Aligned base with 7 bytes left before the address space ends
        let range = HeapConfig::new(usize::MAX - 7, 1024).trimmed();
        assert_eq!(range.start, usize::MAX - 7);
        assert!(range.is_empty());

        // Base that cannot be aligned up at all
        let range = HeapConfig::new(usize::MAX - 3, 1024).trimmed();
        assert!(range.is_empty());

        let range = HeapConfig::new(usize::MAX - 0x107, 0x1000).trimmed();
        assert_eq!(range.len(), 0x100);
        assert_eq!(range.end, usize::MAX - 7);
    }

    #[test]
    fn test_contains() {
        let range = HeapConfig::new(0x1000, 64).trimmed();
        assert!(range.contains(0x1000));
        assert!(range.contains(0x103f));
        assert!(!range.contains(0x1040));
        assert!(!range.contains(0xfff));
    }
}
