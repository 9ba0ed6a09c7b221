//! Block walking and invariant checks
//!
//! The heap keeps four invariants between operations:
//! 1. Blocks tile `[start, end)` exactly
//! 2. Every block but the first records its predecessor's size in `prev_size`
//! 3. Every block size is aligned and at least `MIN_BLOCK_SIZE`
//! 4. No two adjacent blocks are both free
//!
//! [`verify`] reports the first violation it meets while walking the arena.

use crate::block::{is_aligned, BlockHeader, MIN_BLOCK_SIZE};
use thiserror::Error;

/// One block as seen by a walk of the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Header offset within the heap region
    pub offset: usize,

    /// Block size in bytes, header included
    pub size: usize,

    /// Recorded size of the physical predecessor
    pub prev_size: usize,

    pub used: bool,
}

/// Invariant violation found by [`verify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Corruption {
    #[error("Block at {offset:#x} has invalid size {size}")]
    BadSize { offset: usize, size: usize },

    #[error("Block at {offset:#x} (size {size}) runs past arena end {end:#x}")]
    Overrun { offset: usize, size: usize, end: usize },

    #[error("Header at {offset:#x} cannot be read")]
    Gap { offset: usize },

    #[error("Block at {offset:#x} records prev_size {recorded}, predecessor is {actual}")]
    PrevSizeMismatch {
        offset: usize,
        recorded: usize,
        actual: usize,
    },

    #[error("Free blocks at {first:#x} and {second:#x} were not coalesced")]
    AdjacentFree { first: usize, second: usize },
}

/// Iterator over the blocks of an arena in address order
///
/// Stops early at the first header that cannot be decoded or whose size
/// would not advance the walk.
pub struct Blocks<'h> {
    region: &'h [u8],
    at: usize,
    end: usize,
}

impl<'h> Blocks<'h> {
    pub(crate) fn new(region: &'h [u8], start: usize, end: usize) -> Self {
        Self {
            region,
            at: start,
            end,
        }
    }
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.at >= self.end {
            return None;
        }

        let hdr = self
            .region
            .get(self.at..self.end)
            .and_then(BlockHeader::read)?;
        let info = BlockInfo {
            offset: self.at,
            size: hdr.size(),
            prev_size: hdr.prev_size(),
            used: hdr.is_used(),
        };

        if info.size == 0 {
            self.at = self.end;
        } else {
            self.at = self.at.saturating_add(info.size);
        }

        Some(info)
    }
}

/// Verify all block invariants over `region[start..end]`
pub(crate) fn verify(region: &[u8], start: usize, end: usize) -> Result<(), Corruption> {
    let mut at = start;
    let mut prev: Option<BlockInfo> = None;

    while at < end {
        let hdr = region
            .get(at..end)
            .and_then(BlockHeader::read)
            .ok_or(Corruption::Gap { offset: at })?;
        let size = hdr.size();

        if size < MIN_BLOCK_SIZE || !is_aligned(size) {
            return Err(Corruption::BadSize { offset: at, size });
        }
        if size > end - at {
            return Err(Corruption::Overrun {
                offset: at,
                size,
                end,
            });
        }

        let expected_prev = prev.map_or(0, |p| p.size);
        if hdr.prev_size() != expected_prev {
            return Err(Corruption::PrevSizeMismatch {
                offset: at,
                recorded: hdr.prev_size(),
                actual: expected_prev,
            });
        }

        if let Some(p) = prev {
            if !p.used && !hdr.is_used() {
                return Err(Corruption::AdjacentFree {
                    first: p.offset,
                    second: at,
                });
            }
        }

        prev = Some(BlockInfo {
            offset: at,
            size,
            prev_size: hdr.prev_size(),
            used: hdr.is_used(),
        });
        at += size;
    }

    Ok(())
}
