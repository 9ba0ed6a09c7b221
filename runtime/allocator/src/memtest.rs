//! Memory pattern test for the heap carve-out
//!
//! Run once at boot, before the heap is initialized, to make sure the SDRAM
//! backing the arena holds data. A single `0xDEADBEEF` write/read of the
//! first word checks that the memory responds at all; if it does not, no
//! pass is run. Each pass then writes `pattern ^ i` to every word, chunk by
//! chunk, where `i` is the word index within its chunk, reads the chunk back
//! and counts the words that differ.
//!
//! The test needs no heap of its own: results are reported through a
//! per-pass callback and a fixed-size summary.

/// Default patterns: alternating bits, all ones, all zeros
pub const DEFAULT_PATTERNS: [u32; 3] = [0x5A5A_5A5A, 0xFFFF_FFFF, 0x0000_0000];

/// Default chunk: 64KB of 32-bit words
pub const DEFAULT_CHUNK_WORDS: usize = 64 * 1024 / 4;

/// Word used by the basic read/write check
pub const SANITY_WORD: u32 = 0xDEAD_BEEF;

/// Progress is logged every this many chunks
const PROGRESS_EVERY: usize = 4;

/// Word-addressable memory under test
///
/// Implementations must not let the compiler elide the accesses; the slice
/// implementation uses volatile reads and writes.
pub trait TestMemory {
    /// Number of 32-bit words
    fn words(&self) -> usize;

    fn write_word(&mut self, index: usize, value: u32);

    fn read_word(&self, index: usize) -> u32;
}

impl TestMemory for [u32] {
    fn words(&self) -> usize {
        self.len()
    }

    fn write_word(&mut self, index: usize, value: u32) {
        let word: *mut u32 = &mut self[index];
        // SAFETY: `word` comes from a live, aligned `&mut u32`
        unsafe { core::ptr::write_volatile(word, value) }
    }

    fn read_word(&self, index: usize) -> u32 {
        let word: *const u32 = &self[index];
        // SAFETY: `word` comes from a live, aligned `&u32`
        unsafe { core::ptr::read_volatile(word) }
    }
}

/// Pattern test parameters
#[derive(Debug, Clone, Copy)]
pub struct MemTestConfig<'p> {
    /// One pass per pattern
    pub patterns: &'p [u32],

    /// Words written before reading back
    pub chunk_words: usize,
}

impl Default for MemTestConfig<'static> {
    fn default() -> Self {
        Self {
            patterns: &DEFAULT_PATTERNS,
            chunk_words: DEFAULT_CHUNK_WORDS,
        }
    }
}

/// First mismatching word seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemFault {
    /// Byte offset from the start of the tested memory
    pub offset: usize,
    pub expected: u32,
    pub got: u32,
}

/// Result of one pattern pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub pass: usize,
    pub pattern: u32,
    pub errors: usize,
    pub first_fault: Option<MemFault>,
}

/// Result of a whole test run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemTestSummary {
    pub passes: usize,
    pub total_errors: usize,
    pub first_fault: Option<MemFault>,

    /// The basic read/write check failed and no pass was run
    pub basic_rw_failed: bool,
}

impl MemTestSummary {
    pub fn passed(&self) -> bool {
        self.total_errors == 0 && !self.basic_rw_failed
    }
}

/// Run every pattern pass over `mem`
///
/// `on_pass` is called after each pass with its report.
pub fn run<M, F>(mem: &mut M, config: &MemTestConfig<'_>, mut on_pass: F) -> MemTestSummary
where
    M: TestMemory + ?Sized,
    F: FnMut(&PassReport),
{
    let total = mem.words();
    let chunk_words = config.chunk_words.max(1);
    let chunks = total.div_ceil(chunk_words);
    let mut summary = MemTestSummary::default();

    log::info!(
        "memtest: {} bytes, {} passes, {} chunks",
        total * 4,
        config.patterns.len(),
        chunks
    );

    if total > 0 {
        mem.write_word(0, SANITY_WORD);
        let got = mem.read_word(0);
        if got != SANITY_WORD {
            log::error!("memtest: basic R/W broken (read {:#010x})", got);
            summary.basic_rw_failed = true;
            summary.total_errors = 1;
            summary.first_fault = Some(MemFault {
                offset: 0,
                expected: SANITY_WORD,
                got,
            });
            return summary;
        }
        log::info!("memtest: basic R/W OK");
    }

    for (pass, &pattern) in config.patterns.iter().enumerate() {
        let mut report = PassReport {
            pass,
            pattern,
            errors: 0,
            first_fault: None,
        };

        for chunk in 0..chunks {
            let first = chunk * chunk_words;
            let last = (first + chunk_words).min(total);
            let (errors, fault) = test_chunk(mem, first..last, pattern);

            report.errors += errors;
            if report.first_fault.is_none() {
                report.first_fault = fault;
            }

            if chunk % PROGRESS_EVERY == 0 {
                log::debug!("memtest: pass {} chunk {}/{}", pass + 1, chunk + 1, chunks);
            }
        }

        if report.errors == 0 {
            log::info!("memtest: pass {} ({:#010x}) OK", pass + 1, pattern);
        } else {
            log::warn!(
                "memtest: pass {} ({:#010x}) {} errors",
                pass + 1,
                pattern,
                report.errors
            );
        }

        summary.passes += 1;
        summary.total_errors += report.errors;
        if summary.first_fault.is_none() {
            summary.first_fault = report.first_fault;
        }
        on_pass(&report);
    }

    summary
}

/// Write then verify one chunk, returning the error count and first fault
fn test_chunk<M>(mem: &mut M, words: core::ops::Range<usize>, pattern: u32) -> (usize, Option<MemFault>)
where
    M: TestMemory + ?Sized,
{
    let first = words.start;
    for i in words.clone() {
        mem.write_word(i, pattern ^ (i - first) as u32);
    }

    let mut errors = 0;
    let mut first_fault = None;
    for i in words {
        let expected = pattern ^ (i - first) as u32;
        let got = mem.read_word(i);
        if got != expected {
            if first_fault.is_none() {
                first_fault = Some(MemFault {
                    offset: i * 4,
                    expected,
                    got,
                });
            }
            errors += 1;
        }
    }

    (errors, first_fault)
}
