//! Scenario files and replay
//!
//! A scenario describes the boot carve-out and a list of named operations:
//!
//! ```toml
//! [arena]
//! base = 0x12100000
//! len = 1024
//!
//! [[op]]
//! kind = "alloc"
//! name = "p"
//! size = 100
//! ```
//!
//! Replay runs the operations on a host buffer whose address has the same
//! alignment as `base`, so the trimmed arena matches what the firmware sees.

use std::collections::HashMap;

use firmware_allocator::{Corruption, Heap, HeapConfig, HeapError, HeapPtr, HeapStats, ALIGNMENT};
use serde::Deserialize;
use thiserror::Error;

/// Largest arena replayed on the host
pub const MAX_SIM_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Invalid scenario: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Arena of {len} bytes exceeds the simulator limit ({} bytes)", MAX_SIM_LEN)]
    ArenaTooLarge { len: usize },

    #[error("Arena {base:#x}+{len} wraps the address space")]
    ArenaWraps { base: usize, len: usize },

    #[error("Step {step}: no live allocation named '{name}'")]
    UnknownHandle { step: usize, name: String },

    #[error("Step {step}: '{name}' is still live")]
    DuplicateHandle { step: usize, name: String },

    #[error("Step {step}: heap corrupted")]
    Corrupted {
        step: usize,
        #[source]
        source: Corruption,
    },
}

pub type Result<T> = std::result::Result<T, ScenarioError>;

/// Parsed scenario file
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub arena: HeapConfig,

    #[serde(default, rename = "op")]
    pub ops: Vec<Op>,
}

/// One scripted heap operation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Op {
    Alloc { name: String, size: usize },
    Calloc { name: String, count: usize, size: usize },
    /// Unknown names behave like a null pointer: the call allocates
    Realloc { name: String, size: usize },
    Free { name: String },
}

/// What a step did to the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Allocated { offset: usize, capacity: usize },
    Kept { offset: usize },
    Moved { from: usize, to: usize },
    Released,
    Failed(HeapError),
}

/// One replayed step, reported to the observer
#[derive(Debug, Clone)]
pub struct Step<'s> {
    pub index: usize,
    pub op: &'s Op,
    pub outcome: Outcome,
}

impl Scenario {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Replay every operation, checking heap invariants after each one
    ///
    /// `observe` sees each step together with the heap and the emulated
    /// address of the heap region's first byte.
    pub fn replay<F>(&self, mut observe: F) -> Result<HeapStats>
    where
        F: FnMut(&Step<'_>, &Heap<'_>, usize),
    {
        if self.arena.base.checked_add(self.arena.len).is_none() {
            return Err(ScenarioError::ArenaWraps {
                base: self.arena.base,
                len: self.arena.len,
            });
        }
        if self.arena.len > MAX_SIM_LEN {
            return Err(ScenarioError::ArenaTooLarge { len: self.arena.len });
        }

        // Shift the host buffer so it shares the carve-out's misalignment
        let mut backing = vec![0u8; self.arena.len + ALIGNMENT];
        let addr = backing.as_ptr() as usize;
        let shift = (self.arena.base.wrapping_sub(addr)) % ALIGNMENT;
        let mut heap = Heap::new(&mut backing[shift..shift + self.arena.len]);

        let mut live: HashMap<&str, HeapPtr> = HashMap::new();

        for (index, op) in self.ops.iter().enumerate() {
            let outcome = match op {
                Op::Alloc { name, size } => {
                    claim(&live, index, name)?;
                    let result = heap.allocate(*size);
                    allocated(&mut live, &heap, name, result)
                }
                Op::Calloc { name, count, size } => {
                    claim(&live, index, name)?;
                    let result = heap.allocate_zeroed(*count, *size);
                    allocated(&mut live, &heap, name, result)
                }
                Op::Realloc { name, size } => {
                    let old = live.get(name.as_str()).copied();
                    match heap.resize(old, *size) {
                        Ok(Some(ptr)) => {
                            live.insert(name.as_str(), ptr);
                            match old {
                                Some(old) if old == ptr => Outcome::Kept { offset: ptr.offset() },
                                Some(old) => Outcome::Moved {
                                    from: old.offset(),
                                    to: ptr.offset(),
                                },
                                None => Outcome::Allocated {
                                    offset: ptr.offset(),
                                    capacity: heap.capacity(ptr).unwrap_or(0),
                                },
                            }
                        }
                        Ok(None) => {
                            live.remove(name.as_str());
                            Outcome::Released
                        }
                        Err(err) => Outcome::Failed(err),
                    }
                }
                Op::Free { name } => {
                    let ptr = live
                        .remove(name.as_str())
                        .ok_or_else(|| ScenarioError::UnknownHandle {
                            step: index,
                            name: name.clone(),
                        })?;
                    heap.release(ptr);
                    Outcome::Released
                }
            };

            heap.check()
                .map_err(|source| ScenarioError::Corrupted { step: index, source })?;

            log::debug!("step {}: {:?} -> {:?}", index, op, outcome);
            observe(&Step { index, op, outcome }, &heap, self.arena.base);
        }

        Ok(heap.stats())
    }
}

fn claim(live: &HashMap<&str, HeapPtr>, step: usize, name: &str) -> Result<()> {
    if live.contains_key(name) {
        return Err(ScenarioError::DuplicateHandle {
            step,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn allocated<'s>(
    live: &mut HashMap<&'s str, HeapPtr>,
    heap: &Heap<'_>,
    name: &'s str,
    result: firmware_allocator::Result<HeapPtr>,
) -> Outcome {
    match result {
        Ok(ptr) => {
            live.insert(name, ptr);
            Outcome::Allocated {
                offset: ptr.offset(),
                capacity: heap.capacity(ptr).unwrap_or(0),
            }
        }
        Err(err) => Outcome::Failed(err),
    }
}
