//! Block boundary tags
//!
//! Every block in the arena starts with an 8-byte header stored in place:
//!
//! ```text
//! offset 0: size      (u32) total block bytes incl. header, bit 0 = used
//! offset 4: prev_size (u32) true size of the physical predecessor, 0 if first
//! ```
//!
//! The two low bits of `size` are reserved for flags, so the true size is
//! always `size & SIZE_MASK`. Headers are read and written through the
//! arena's byte slice in native byte order.

use static_assertions::const_assert;

/// Block header size in bytes
pub const HEADER_SIZE: usize = 8;

/// Arena and block alignment unit
pub const ALIGNMENT: usize = 8;

/// Minimum block size: header plus 8 bytes of payload
pub const MIN_BLOCK_SIZE: usize = 16;

/// Used flag in the `size` field
const BLOCK_USED: u32 = 0x1;

/// Mask that strips the flag bits from `size`
const SIZE_MASK: u32 = !0x3;

const_assert!(ALIGNMENT.is_power_of_two());
const_assert!(HEADER_SIZE % ALIGNMENT == 0);
const_assert!(MIN_BLOCK_SIZE % ALIGNMENT == 0);
const_assert!(MIN_BLOCK_SIZE > HEADER_SIZE);
// Flag bits must fit in the alignment slack of a real size
const_assert!(!SIZE_MASK & (ALIGNMENT as u32 - 1) == !SIZE_MASK);

/// Decoded block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    raw_size: u32,
    prev_size: u32,
}

impl BlockHeader {
    /// Header for a free block
    pub fn free(size: usize, prev_size: usize) -> Self {
        Self {
            raw_size: size as u32 & SIZE_MASK,
            prev_size: prev_size as u32,
        }
    }

    /// Header for a used block
    pub fn used(size: usize, prev_size: usize) -> Self {
        Self {
            raw_size: (size as u32 & SIZE_MASK) | BLOCK_USED,
            prev_size: prev_size as u32,
        }
    }

    /// True block size in bytes (header included)
    #[inline]
    pub fn size(&self) -> usize {
        (self.raw_size & SIZE_MASK) as usize
    }

    /// Size of the physical predecessor, 0 for the first block
    #[inline]
    pub fn prev_size(&self) -> usize {
        self.prev_size as usize
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        self.raw_size & BLOCK_USED != 0
    }

    /// Replace the size, keeping the flag bits
    #[inline]
    pub fn set_size(&mut self, size: usize) {
        self.raw_size = (self.raw_size & !SIZE_MASK) | (size as u32 & SIZE_MASK);
    }

    #[inline]
    pub fn set_prev_size(&mut self, prev_size: usize) {
        self.prev_size = prev_size as u32;
    }

    #[inline]
    pub fn set_used(&mut self, used: bool) {
        if used {
            self.raw_size |= BLOCK_USED;
        } else {
            self.raw_size &= !BLOCK_USED;
        }
    }

    /// Decode a header from the first `HEADER_SIZE` bytes of `bytes`
    ///
    /// Returns `None` if fewer than `HEADER_SIZE` bytes are available.
    pub fn read(bytes: &[u8]) -> Option<Self> {
        let raw = bytes.get(..HEADER_SIZE)?;
        let mut size = [0u8; 4];
        let mut prev = [0u8; 4];
        size.copy_from_slice(&raw[..4]);
        prev.copy_from_slice(&raw[4..]);

        Some(Self {
            raw_size: u32::from_ne_bytes(size),
            prev_size: u32::from_ne_bytes(prev),
        })
    }

    /// Encode this header into the first `HEADER_SIZE` bytes of `bytes`
    ///
    /// # Panics
    /// Panics if `bytes` is shorter than `HEADER_SIZE`. Callers only write
    /// headers at block boundaries inside the arena.
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&self.raw_size.to_ne_bytes());
        bytes[4..HEADER_SIZE].copy_from_slice(&self.prev_size.to_ne_bytes());
    }
}

/// Align value up to `ALIGNMENT`, `None` on overflow
#[inline]
pub const fn align_up(val: usize) -> Option<usize> {
    match val.checked_add(ALIGNMENT - 1) {
        Some(v) => Some(v & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// Align value down to `ALIGNMENT`
#[inline]
pub const fn align_down(val: usize) -> usize {
    val & !(ALIGNMENT - 1)
}

/// Check if value is aligned to `ALIGNMENT`
#[inline]
pub const fn is_aligned(val: usize) -> bool {
    val & (ALIGNMENT - 1) == 0
}

/// Block size needed to serve a payload of `size` bytes
///
/// Header included, rounded up to `ALIGNMENT`, never below `MIN_BLOCK_SIZE`.
/// `None` if the computation overflows.
pub fn block_size_for(size: usize) -> Option<usize> {
    let total = align_up(size.checked_add(HEADER_SIZE)?)?;
    Some(total.max(MIN_BLOCK_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_helpers() {
        assert_eq!(align_up(0), Some(0));
        assert_eq!(align_up(1), Some(8));
        assert_eq!(align_up(8), Some(8));
        assert_eq!(align_up(13), Some(16));
        assert_eq!(align_up(usize::MAX), None);
        assert_eq!(align_down(15), 8);
        assert_eq!(align_down(16), 16);
        assert!(is_aligned(0x1000));
        assert!(!is_aligned(0x1004));
    }

    #[test]
    fn test_block_size_for() {
        // Tiny requests are floored at the minimum block
        assert_eq!(block_size_for(1), Some(MIN_BLOCK_SIZE));
        assert_eq!(block_size_for(8), Some(MIN_BLOCK_SIZE));
        assert_eq!(block_size_for(9), Some(24));
        assert_eq!(block_size_for(64), Some(72));
        assert_eq!(block_size_for(100), Some(112));
        assert_eq!(block_size_for(usize::MAX - 4), None);
    }

    #[test]
    fn test_header_flags() {
        let mut hdr = BlockHeader::free(64, 0);
        assert_eq!(hdr.size(), 64);
        assert!(!hdr.is_used());

        hdr.set_used(true);
        assert!(hdr.is_used());
        assert_eq!(hdr.size(), 64);

        hdr.set_size(128);
        assert!(hdr.is_used());
        assert_eq!(hdr.size(), 128);

        hdr.set_used(false);
        assert!(!hdr.is_used());
    }

    #[test]
    fn test_header_encoding() {
        let mut bytes = [0u8; 16];
        let hdr = BlockHeader::used(48, 32);
        hdr.write(&mut bytes[8..]);

        let decoded = BlockHeader::read(&bytes[8..]).unwrap();
        assert_eq!(decoded, hdr);
        assert_eq!(decoded.prev_size(), 32);

        // Bit 0 of the stored size carries the used flag
        assert_eq!(u32::from_ne_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), 49);
    }

    #[test]
    fn test_flag_bits_below_alignment() {
        assert_eq!(!SIZE_MASK & (ALIGNMENT as u32 - 1), !SIZE_MASK);
        assert_eq!(BLOCK_USED & SIZE_MASK, 0);

        // Every aligned size survives the mask untouched
        for size in (MIN_BLOCK_SIZE..256).step_by(ALIGNMENT) {
            let hdr = BlockHeader::used(size, 0);
            assert_eq!(hdr.size(), size);
            assert!(hdr.is_used());
        }
    }

    #[test]
    fn test_header_read_short() {
        assert!(BlockHeader::read(&[0u8; 7]).is_none());
    }
}
