//! Terminal rendering of the heap layout

use colored::Colorize;
use firmware_allocator::{BlockInfo, Heap, HeapStats};

/// Width of the arena bar in cells
pub const BAR_WIDTH: usize = 64;

/// One character per bar cell: `#` mostly used, `.` mostly free
///
/// A cell covers `len / width` bytes; its character follows the block that
/// owns the cell's first byte.
pub fn arena_bar(blocks: &[BlockInfo], start: usize, len: usize, width: usize) -> String {
    if len == 0 || width == 0 {
        return String::new();
    }

    (0..width)
        .map(|cell| {
            let at = start.saturating_add(cell * (len / width) + cell * (len % width) / width);
            let used = blocks
                .iter()
                .find(|b| at >= b.offset && at - b.offset < b.size)
                .is_some_and(|b| b.used);
            if used {
                '#'
            } else {
                '.'
            }
        })
        .collect()
}

/// Print one line per block plus the usage bar
pub fn print_block_map(heap: &Heap<'_>, base_addr: usize) {
    let blocks: Vec<BlockInfo> = heap.blocks().collect();
    let range = heap.arena_range();

    for block in &blocks {
        let state = if block.used {
            "used".red().bold()
        } else {
            "free".green()
        };
        println!(
            "  {:#010x}-{:#010x} {:>8} B  prev {:>8}  {}",
            base_addr.saturating_add(block.offset),
            base_addr
                .saturating_add(block.offset)
                .saturating_add(block.size),
            block.size,
            block.prev_size,
            state
        );
    }

    let bar = arena_bar(&blocks, range.start, range.len(), BAR_WIDTH);
    let colored: String = bar
        .chars()
        .map(|c| {
            if c == '#' {
                c.to_string().red().to_string()
            } else {
                c.to_string().green().to_string()
            }
        })
        .collect();
    println!("  [{}]", colored);
}

pub fn print_stats(stats: &HeapStats) {
    println!(
        "  {} bytes: {} used in {} blocks, {} free in {} blocks (largest {})",
        stats.arena_len,
        stats.used_bytes.to_string().red(),
        stats.used_blocks,
        stats.free_bytes.to_string().green(),
        stats.free_blocks,
        stats.largest_free
    );
}
