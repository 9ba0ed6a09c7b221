//! heap-sim - Host-side replay tool for the firmware heap
//!
//! Commands:
//! - `heap-sim run <scenario.toml>` - Replay a scripted allocation sequence
//! - `heap-sim layout --base <addr> --len <bytes>` - Show the trimmed arena
//! - `heap-sim memtest --len <bytes>` - Run the SDRAM pattern test on a host buffer

mod render;
mod scenario;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;

use firmware_allocator::memtest::{
    self, MemTestConfig, MemTestSummary, TestMemory, DEFAULT_CHUNK_WORDS, DEFAULT_PATTERNS,
};
use firmware_allocator::{ArenaRange, HeapConfig, HEADER_SIZE, MIN_BLOCK_SIZE};

use crate::scenario::{Outcome, Scenario};

#[derive(Parser)]
#[command(name = "heap-sim")]
#[command(version)]
#[command(about = "Replay firmware heap scenarios on the host", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario file
    Run {
        /// Scenario TOML file
        scenario: PathBuf,

        /// Print the block map after every step
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show how a carve-out is trimmed into an arena
    Layout {
        /// Base address (hex with 0x prefix, or decimal)
        #[arg(long, value_parser = parse_hex_or_dec)]
        base: usize,

        /// Length in bytes (hex with 0x prefix, or decimal)
        #[arg(long, value_parser = parse_hex_or_dec)]
        len: usize,
    },

    /// Run the memory pattern test on a host buffer
    Memtest {
        /// Bytes to test
        #[arg(long, value_parser = parse_hex_or_dec, default_value = "0x100000")]
        len: usize,

        /// Words written per chunk before verifying
        #[arg(long, default_value_t = DEFAULT_CHUNK_WORDS)]
        chunk_words: usize,
    },
}

fn parse_hex_or_dec(s: &str) -> Result<usize> {
    if let Some(hex) = s.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).context("Invalid hex number")
    } else {
        s.parse::<usize>().context("Invalid decimal number")
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { scenario, verbose } => {
            run_scenario(&scenario, verbose)?;
        }

        Commands::Layout { base, len } => {
            show_layout(HeapConfig::new(base, len))?;
        }

        Commands::Memtest { len, chunk_words } => {
            run_memtest(len, chunk_words)?;
        }
    }

    Ok(())
}

fn run_scenario(path: &PathBuf, verbose: bool) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let scenario = Scenario::parse(&text)?;

    println!(
        "{} Replaying {} ({} ops)",
        "▶".green(),
        path.display().to_string().bold(),
        scenario.ops.len()
    );

    let last = scenario.ops.len().saturating_sub(1);
    let stats = scenario.replay(|step, heap, base| {
        let line = match step.outcome {
            Outcome::Allocated { offset, capacity } => {
                format!("{:#010x} ({} B usable)", base + offset, capacity).green()
            }
            Outcome::Kept { offset } => format!("kept {:#010x}", base + offset).green(),
            Outcome::Moved { from, to } => {
                format!("moved {:#010x} -> {:#010x}", base + from, base + to).yellow()
            }
            Outcome::Released => "released".normal(),
            Outcome::Failed(err) => format!("FAILED: {}", err).red(),
        };
        println!("  [{:>3}] {:<40} {}", step.index, format!("{:?}", step.op), line);

        if verbose || step.index == last {
            if step.index == last {
                println!("\n{} Final layout", "✅".green());
            }
            render::print_block_map(heap, base);
        }
    })?;

    render::print_stats(&stats);

    Ok(())
}

/// Figures printed by `heap-sim layout`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LayoutPlan {
    range: ArenaRange,

    /// Bytes of the carve-out lost to alignment
    trimmed: usize,

    /// `None` when the arena cannot hold a single block
    largest_alloc: Option<usize>,
}

fn plan_layout(config: HeapConfig) -> Result<LayoutPlan> {
    if config.base.checked_add(config.len).is_none() {
        anyhow::bail!(
            "Carve-out {:#x}+{} wraps the address space",
            config.base,
            config.len
        );
    }

    let range = config.trimmed();
    Ok(LayoutPlan {
        range,
        trimmed: config.len.saturating_sub(range.len()),
        largest_alloc: (range.len() >= MIN_BLOCK_SIZE).then(|| range.len() - HEADER_SIZE),
    })
}

fn show_layout(config: HeapConfig) -> Result<()> {
    let plan = plan_layout(config)?;

    println!("{}", "Heap carve-out".bold());
    println!("  Requested: {:#010x} + {} bytes", config.base, config.len);
    println!(
        "  Arena:     {:#010x} - {:#010x} ({} bytes)",
        plan.range.start,
        plan.range.end,
        plan.range.len()
    );
    println!("  Trimmed:   {} bytes", plan.trimmed);

    match plan.largest_alloc {
        Some(largest) => println!("  Largest single allocation: {} bytes", largest),
        None => println!(
            "  {} too small for a single block, heap stays uninitialized",
            "⚠".yellow()
        ),
    }

    Ok(())
}

fn run_memtest(len: usize, chunk_words: usize) -> Result<()> {
    let mut words = vec![0u32; len / 4];
    println!("{} Testing {} bytes", "🔍".green(), words.len() * 4);

    check_memory(&mut words[..], chunk_words)?;

    println!("{} ALL TESTS PASSED", "✅".green());
    Ok(())
}

/// Run every default pattern over `mem`, failing on any memory error
fn check_memory<M>(mem: &mut M, chunk_words: usize) -> Result<MemTestSummary>
where
    M: TestMemory + ?Sized,
{
    let config = MemTestConfig {
        patterns: &DEFAULT_PATTERNS,
        chunk_words,
    };

    let summary = memtest::run(mem, &config, |pass| {
        let status = if pass.errors == 0 {
            "OK".green()
        } else {
            format!("{} errs", pass.errors).red()
        };
        println!("  Pass {} ({:#010x}): {}", pass.pass + 1, pass.pattern, status);
    });

    if !summary.passed() {
        if let Some(fault) = summary.first_fault {
            println!(
                "  First error at +{:#x}: wrote {:#010x}, read {:#010x}",
                fault.offset, fault.expected, fault.got
            );
        }
        if summary.basic_rw_failed {
            anyhow::bail!("Basic R/W broken");
        }
        anyhow::bail!("{} memory errors", summary.total_errors);
    }

    Ok(summary)
}
