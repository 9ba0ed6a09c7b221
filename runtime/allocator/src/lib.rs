//! Firmware Allocator - First-fit heap for bare-metal firmware
//!
//! # Purpose
//! Carves one reserved byte range (the heap carve-out handed over by the boot
//! code) into allocatable blocks. There is no OS allocator, no virtual memory
//! and no growth: the arena is fixed for the lifetime of the firmware.
//!
//! # Integration Points
//! - Depends on: boot code (base address + length of the carve-out)
//! - Provides to: all firmware code needing dynamic memory
//! - Surfaces: [`Heap`] (handle API), [`LockedHeap`] (raw pointer API and
//!   `GlobalAlloc`)
//!
//! # Architecture
//! ```text
//! [start ........................................................ end)
//! | hdr | payload    | hdr | free          | hdr | payload   | ...
//!   size|used          size                  size|used
//!   prev_size          prev_size             prev_size
//! ```
//! - Every block starts with an 8-byte boundary tag (see [`block`])
//! - Allocation: first-fit scan from `start`, split when the tail can hold a
//!   minimum block
//! - Deallocation: clear the used bit, merge with a free successor, then with a
//!   free predecessor located through `prev_size`
//! - Blocks always tile `[start, end)` exactly; no two free blocks touch
//!
//! # Caller obligations
//! Operations are not reentrant. Calling into the allocator from inside an
//! allocator operation (a fault handler, for example) corrupts the arena or,
//! through [`LockedHeap`], deadlocks.
//!
//! # Testing Strategy
//! - Unit tests: header encoding, splitting, coalescing, resize edge cases
//! - Integration tests: allocation scenarios, randomized invariant properties
//! - Benchmarks: allocate/release churn

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod block;
pub mod check;
pub mod config;
mod heap;
mod locked;
pub mod memtest;

pub use block::{ALIGNMENT, HEADER_SIZE, MIN_BLOCK_SIZE};
pub use check::{BlockInfo, Blocks, Corruption};
pub use config::{ArenaRange, HeapConfig, MAX_ARENA_LEN};
pub use heap::{Heap, HeapPtr, HeapStats};
pub use locked::LockedHeap;

use thiserror::Error;

/// Heap allocation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("Invalid size (must be > 0)")]
    ZeroSize,

    #[error("Heap not initialized")]
    Uninitialized,

    #[error("Allocation size overflow ({count} x {size} bytes)")]
    Overflow { count: usize, size: usize },

    #[error("Out of memory (requested: {requested} bytes)")]
    OutOfMemory { requested: usize },

    #[error("Pointer does not belong to the heap (offset {offset:#x})")]
    InvalidPointer { offset: usize },
}

pub type Result<T> = core::result::Result<T, HeapError>;
