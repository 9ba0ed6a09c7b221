//! First-fit boundary-tag heap
//!
//! # Design
//! - One arena, fixed at init, tiled by blocks with in-place headers
//! - First-fit linear scan from the arena start (O(blocks) allocation)
//! - Split on allocation when the remainder can hold a minimum block
//! - Forward then backward coalescing on release
//! - Shrinking resize keeps the block as is; growing resize always moves
//!
//! The heap borrows its arena as a byte slice and hands out [`HeapPtr`]
//! handles (payload offsets into that slice) instead of raw pointers.

use crate::block::{block_size_for, BlockHeader, HEADER_SIZE, MIN_BLOCK_SIZE};
use crate::check::{self, BlockInfo, Blocks, Corruption};
use crate::config::{ArenaRange, HeapConfig, MAX_ARENA_LEN};
use crate::{HeapError, Result};

/// Handle to a live allocation
///
/// Holds the payload offset from the start of the region the heap was
/// initialized with. Handles are only meaningful for the heap that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapPtr(usize);

impl HeapPtr {
    /// Rebuild a handle from a payload offset
    ///
    /// Used when a payload crosses a raw boundary (see [`crate::LockedHeap`]).
    /// An offset that is in range but not a payload boundary is not detected
    /// by [`Heap::release`] and corrupts the arena.
    pub const fn from_offset(offset: usize) -> Self {
        Self(offset)
    }

    /// Payload offset from the start of the heap region
    pub const fn offset(&self) -> usize {
        self.0
    }
}

/// Snapshot of arena usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Trimmed arena length in bytes
    pub arena_len: usize,

    /// Bytes held by used blocks, headers included
    pub used_bytes: usize,

    /// Bytes held by free blocks, headers included
    pub free_bytes: usize,

    pub used_blocks: usize,
    pub free_blocks: usize,

    /// Size of the largest free block, header included
    pub largest_free: usize,
}

/// First-fit heap over a borrowed arena
pub struct Heap<'a> {
    /// Whole region handed to `init`, including bytes trimmed for alignment
    region: &'a mut [u8],

    /// Offset of the first block within `region`
    start: usize,

    /// Offset one past the last block within `region`
    end: usize,
}

impl<'a> Heap<'a> {
    /// Create an uninitialized heap
    ///
    /// Every allocation fails with [`HeapError::Uninitialized`] until
    /// [`Heap::init`] is called.
    pub const fn empty() -> Self {
        Self {
            region: &mut [],
            start: 0,
            end: 0,
        }
    }

    /// Create a heap managing `region`
    pub fn new(region: &'a mut [u8]) -> Self {
        let mut heap = Self::empty();
        heap.init(region);
        heap
    }

    /// Create a heap from the raw carve-out handed over by the boot code
    ///
    /// # Safety
    /// - `base..base + len` must be valid for reads and writes for `'a`
    /// - Nothing else may access the region while the heap is alive
    pub unsafe fn from_raw_parts(base: *mut u8, len: usize) -> Self {
        Self::new(core::slice::from_raw_parts_mut(base, len))
    }

    /// Initialize the heap with a new arena
    ///
    /// The region is trimmed to `ALIGNMENT` on both ends (see
    /// [`HeapConfig::trimmed`]) and covered by one free block.
    ///
    /// Calling this again discards every outstanding allocation without
    /// warning; handles issued before become meaningless. A region too small
    /// to hold a minimum block leaves the heap uninitialized.
    pub fn init(&mut self, region: &'a mut [u8]) {
        let config = HeapConfig::new(region.as_ptr() as usize, region.len());
        let range = config.trimmed();

        if range.len() < MIN_BLOCK_SIZE {
            log::warn!(
                "heap: region {:#x}+{} too small for a block, heap left uninitialized",
                config.base,
                config.len
            );
            *self = Self::empty();
            return;
        }

        self.start = range.start - config.base;
        self.end = range.end - config.base;
        self.region = region;
        self.write_header(self.start, BlockHeader::free(range.len(), 0));

        log::info!(
            "heap: arena {:#x}-{:#x} ({} bytes)",
            range.start,
            range.end,
            range.len()
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.end > self.start
    }

    /// Arena bounds as offsets into the heap region
    pub fn arena_range(&self) -> ArenaRange {
        ArenaRange {
            start: self.start,
            end: self.end,
        }
    }

    /// Allocate a block with at least `size` usable bytes
    ///
    /// # Errors
    /// - `ZeroSize` if `size` is 0
    /// - `Uninitialized` if the heap has no arena
    /// - `OutOfMemory` if no free block is large enough
    pub fn allocate(&mut self, size: usize) -> Result<HeapPtr> {
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }
        if !self.is_initialized() {
            return Err(HeapError::Uninitialized);
        }

        let needed = match block_size_for(size) {
            Some(needed) if needed <= self.end - self.start => needed,
            _ => {
                log::debug!("heap: {} bytes can never fit the arena", size);
                return Err(HeapError::OutOfMemory { requested: size });
            }
        };

        let mut at = self.start;
        while at < self.end {
            let Some(mut hdr) = self.read_header(at) else {
                break;
            };

            let block_size = hdr.size();
            if block_size < MIN_BLOCK_SIZE || block_size > self.end - at {
                log::error!("heap: corrupt block at {:#x} (size {})", at, block_size);
                break;
            }

            if !hdr.is_used() && block_size >= needed {
                if block_size >= needed + MIN_BLOCK_SIZE {
                    let tail = at + needed;
                    let tail_size = block_size - needed;
                    self.write_header(tail, BlockHeader::free(tail_size, needed));
                    self.fix_prev_size(tail + tail_size, tail_size);
                    hdr.set_size(needed);
                }

                hdr.set_used(true);
                self.write_header(at, hdr);

                log::trace!("heap: alloc {} bytes -> block {:#x}+{}", size, at, hdr.size());
                return Ok(HeapPtr(at + HEADER_SIZE));
            }

            at += block_size;
        }

        log::debug!(
            "heap: out of memory ({} bytes requested, {} bytes free)",
            size,
            self.free_memory()
        );
        Err(HeapError::OutOfMemory { requested: size })
    }

    /// Allocate `count * size` zeroed bytes
    ///
    /// # Errors
    /// - `Overflow` if `count * size` exceeds [`MAX_ARENA_LEN`], the most a
    ///   block size field can describe, on 32-bit and 64-bit hosts alike
    /// - Anything [`Heap::allocate`] reports
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Result<HeapPtr> {
        let total = count
            .checked_mul(size)
            .filter(|total| *total <= MAX_ARENA_LEN)
            .ok_or(HeapError::Overflow { count, size })?;

        let ptr = self.allocate(total)?;
        self.region[ptr.0..ptr.0 + total].fill(0);
        Ok(ptr)
    }

    /// Return a block to the free pool
    ///
    /// Handles whose header would lie outside the arena are ignored. A handle
    /// that is inside the arena but not a payload boundary is NOT detected and
    /// corrupts the block metadata; callers must only pass handles returned by
    /// this heap.
    pub fn release(&mut self, ptr: HeapPtr) {
        let Some((at, mut hdr)) = self.block_of(ptr) else {
            log::warn!("heap: ignoring release of foreign pointer (offset {:#x})", ptr.0);
            return;
        };

        hdr.set_used(false);
        let mut size = hdr.size();

        // Forward: absorb a free successor
        let next = at.saturating_add(size);
        if next < self.end {
            if let Some(next_hdr) = self.read_header(next) {
                if !next_hdr.is_used() {
                    size += next_hdr.size();
                    hdr.set_size(size);
                    self.fix_prev_size(at + size, size);
                }
            }
        }
        self.write_header(at, hdr);

        // Backward: let a free predecessor absorb this block
        if hdr.prev_size() != 0 {
            let prev_at = at
                .checked_sub(hdr.prev_size())
                .filter(|prev_at| *prev_at >= self.start);

            if let Some(prev_at) = prev_at {
                if let Some(mut prev) = self.read_header(prev_at) {
                    if !prev.is_used() {
                        let merged = prev.size() + size;
                        prev.set_size(merged);
                        self.write_header(prev_at, prev);
                        self.fix_prev_size(prev_at + merged, merged);
                    }
                }
            }
        }

        log::trace!("heap: free block {:#x}", at);
    }

    /// Resize an allocation, C `realloc` style
    ///
    /// - `None` behaves as [`Heap::allocate`]
    /// - `new_size == 0` releases `ptr` and returns `Ok(None)`
    /// - If the current block already fits `new_size` the same handle comes
    ///   back; the block is never shrunk, so slack is not reclaimed
    /// - Otherwise the payload moves to a new block (`min(new_size, old
    ///   capacity)` bytes copied) and the old block is released
    ///
    /// # Errors
    /// - `InvalidPointer` if `ptr` does not name a block in the arena
    /// - Anything [`Heap::allocate`] reports; `ptr` stays valid in that case
    pub fn resize(&mut self, ptr: Option<HeapPtr>, new_size: usize) -> Result<Option<HeapPtr>> {
        let Some(ptr) = ptr else {
            return self.allocate(new_size).map(Some);
        };

        if new_size == 0 {
            self.release(ptr);
            return Ok(None);
        }

        let (_, hdr) = self
            .block_of(ptr)
            .ok_or(HeapError::InvalidPointer { offset: ptr.0 })?;
        let block_size = hdr.size();

        let needed = block_size_for(new_size).ok_or(HeapError::OutOfMemory {
            requested: new_size,
        })?;
        if needed <= block_size {
            return Ok(Some(ptr));
        }

        let new_ptr = self.allocate(new_size)?;
        let old_capacity = block_size.saturating_sub(HEADER_SIZE);
        let len = new_size
            .min(old_capacity)
            .min(self.end.saturating_sub(ptr.0));
        self.region.copy_within(ptr.0..ptr.0 + len, new_ptr.0);
        self.release(ptr);

        log::trace!("heap: moved {:#x} -> {:#x} ({} bytes)", ptr.0, new_ptr.0, len);
        Ok(Some(new_ptr))
    }

    /// Usable payload bytes of a live allocation
    pub fn capacity(&self, ptr: HeapPtr) -> Option<usize> {
        let (_, hdr) = self.block_of(ptr)?;
        hdr.is_used().then(|| hdr.size() - HEADER_SIZE)
    }

    /// Payload bytes of a live allocation
    pub fn payload(&self, ptr: HeapPtr) -> Option<&[u8]> {
        let capacity = self.capacity(ptr)?;
        self.region.get(ptr.0..ptr.0 + capacity)
    }

    /// Mutable payload bytes of a live allocation
    pub fn payload_mut(&mut self, ptr: HeapPtr) -> Option<&mut [u8]> {
        let capacity = self.capacity(ptr)?;
        self.region.get_mut(ptr.0..ptr.0 + capacity)
    }

    /// Walk all blocks in address order
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks::new(self.region, self.start, self.end)
    }

    /// Verify the tiling, boundary tag and coalescing invariants
    pub fn check(&self) -> core::result::Result<(), Corruption> {
        check::verify(self.region, self.start, self.end)
    }

    /// Current usage figures
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            arena_len: self.end - self.start,
            ..HeapStats::default()
        };

        for BlockInfo { size, used, .. } in self.blocks() {
            if used {
                stats.used_bytes += size;
                stats.used_blocks += 1;
            } else {
                stats.free_bytes += size;
                stats.free_blocks += 1;
                stats.largest_free = stats.largest_free.max(size);
            }
        }

        stats
    }

    /// Total bytes in free blocks, headers included
    pub fn free_memory(&self) -> usize {
        self.stats().free_bytes
    }

    /// Address of the first byte of the heap region
    pub(crate) fn region_ptr(&mut self) -> *mut u8 {
        self.region.as_mut_ptr()
    }

    /// Header offset and header for a handle, if the header is in the arena
    fn block_of(&self, ptr: HeapPtr) -> Option<(usize, BlockHeader)> {
        let at = ptr.0.checked_sub(HEADER_SIZE)?;
        if at < self.start || at >= self.end {
            return None;
        }
        Some((at, self.read_header(at)?))
    }

    fn read_header(&self, at: usize) -> Option<BlockHeader> {
        self.region.get(at..self.end).and_then(BlockHeader::read)
    }

    fn write_header(&mut self, at: usize, hdr: BlockHeader) {
        hdr.write(&mut self.region[at..]);
    }

    /// Point the block at `at` (if any) back at a predecessor of `prev_size`
    fn fix_prev_size(&mut self, at: usize, prev_size: usize) {
        if at >= self.end {
            return;
        }
        if let Some(mut hdr) = self.read_header(at) {
            hdr.set_prev_size(prev_size);
            self.write_header(at, hdr);
        }
    }
}

impl Default for Heap<'_> {
    fn default() -> Self {
        Self::empty()
    }
}
