//! Randomized invariant checks
//!
//! Drives a heap with arbitrary operation sequences and checks after every
//! step that the block tiling is intact and live allocations kept their data.

use firmware_allocator::{Heap, HeapError, HeapPtr, HEADER_SIZE};
use proptest::prelude::*;

const ARENA_LEN: usize = 4096;

#[derive(Debug, Clone)]
enum Op {
    Alloc(usize),
    Zeroed(usize, usize),
    Free(usize),
    Resize(usize, usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1usize..400).prop_map(Op::Alloc),
        1 => (1usize..16, 1usize..32).prop_map(|(c, s)| Op::Zeroed(c, s)),
        3 => any::<usize>().prop_map(Op::Free),
        2 => (any::<usize>(), 0usize..600).prop_map(|(i, s)| Op::Resize(i, s)),
    ]
}

/// A live allocation and the byte it was filled with
struct Live {
    ptr: HeapPtr,
    len: usize,
    tag: u8,
}

fn fill(heap: &mut Heap<'_>, live: &Live) {
    heap.payload_mut(live.ptr).unwrap()[..live.len].fill(live.tag);
}

fn assert_tiled(heap: &Heap<'_>) {
    heap.check().expect("heap invariants violated");
    let total: usize = heap.blocks().map(|b| b.size).sum();
    assert_eq!(total, heap.arena_range().len());
}

proptest! {
    #[test]
    fn random_ops_keep_invariants(
        offset in 0usize..8,
        ops in proptest::collection::vec(arb_op(), 1..120),
    ) {
        let mut backing = vec![0u8; ARENA_LEN + 8];
        let mut heap = Heap::new(&mut backing[offset..]);
        let range = heap.arena_range();
        let mut live: Vec<Live> = Vec::new();
        let mut next_tag = 1u8;

        for op in ops {
            match op {
                Op::Alloc(size) => {
                    if let Ok(ptr) = heap.allocate(size) {
                        let entry = Live { ptr, len: size, tag: next_tag };
                        fill(&mut heap, &entry);
                        live.push(entry);
                        next_tag = next_tag.wrapping_add(1).max(1);
                    }
                }
                Op::Zeroed(count, size) => {
                    if let Ok(ptr) = heap.allocate_zeroed(count, size) {
                        let payload = heap.payload(ptr).unwrap();
                        prop_assert!(payload[..count * size].iter().all(|&b| b == 0));
                        live.push(Live { ptr, len: count * size, tag: 0 });
                    }
                }
                Op::Free(index) if !live.is_empty() => {
                    let entry = live.swap_remove(index % live.len());
                    heap.release(entry.ptr);
                }
                Op::Resize(index, new_size) if !live.is_empty() => {
                    let index = index % live.len();
                    let old = live[index].ptr;
                    match heap.resize(Some(old), new_size) {
                        Ok(Some(ptr)) => {
                            let entry = &mut live[index];
                            entry.ptr = ptr;
                            entry.len = entry.len.min(new_size);
                        }
                        Ok(None) => {
                            prop_assert_eq!(new_size, 0);
                            live.swap_remove(index);
                        }
                        Err(err) => {
                            prop_assert_eq!(err, HeapError::OutOfMemory { requested: new_size });
                            prop_assert!(heap.capacity(old).is_some());
                        }
                    }
                }
                _ => {}
            }

            assert_tiled(&heap);

            for entry in &live {
                let capacity = heap.capacity(entry.ptr).unwrap();
                prop_assert!(capacity >= entry.len);
                prop_assert!(entry.ptr.offset() - HEADER_SIZE >= range.start);
                prop_assert!(entry.ptr.offset() + capacity <= range.end);
                let payload = heap.payload(entry.ptr).unwrap();
                prop_assert!(payload[..entry.len].iter().all(|&b| b == entry.tag));
            }
        }

        for entry in live.drain(..) {
            heap.release(entry.ptr);
        }
        prop_assert_eq!(heap.blocks().count(), 1);
        prop_assert_eq!(heap.free_memory(), range.len());
    }

    #[test]
    fn alloc_then_release_restores_arena(size in 1usize..ARENA_LEN) {
        let mut backing = vec![0u8; ARENA_LEN];
        let mut heap = Heap::new(&mut backing[..]);
        let arena_len = heap.arena_range().len();

        if let Ok(ptr) = heap.allocate(size) {
            prop_assert!(heap.capacity(ptr).unwrap() >= size);
            heap.release(ptr);
        }

        let blocks: Vec<_> = heap.blocks().collect();
        prop_assert_eq!(blocks.len(), 1);
        prop_assert_eq!(blocks[0].size, arena_len);
        prop_assert!(!blocks[0].used);
    }

    #[test]
    fn adjacent_releases_merge_in_any_order(
        sizes in proptest::collection::vec(1usize..200, 3),
        order in Just(vec![0usize, 1, 2]).prop_shuffle(),
    ) {
        let mut backing = vec![0u8; ARENA_LEN];
        let mut heap = Heap::new(&mut backing[..]);

        let ptrs: Vec<HeapPtr> = sizes.iter().map(|&s| heap.allocate(s).unwrap()).collect();
        let guard = heap.allocate(8).unwrap();

        let first = ptrs[0].offset() - HEADER_SIZE;
        let extent = guard.offset() - HEADER_SIZE - first;

        for &i in order.iter() {
            heap.release(ptrs[i]);
            assert_tiled(&heap);
        }

        let merged = heap.blocks().next().unwrap();
        prop_assert_eq!(merged.offset, first);
        prop_assert_eq!(merged.size, extent);
        prop_assert!(!merged.used);
    }

    #[test]
    fn zeroed_overflow_fails(count in 2usize..1024) {
        let mut backing = vec![0u8; 256];
        let mut heap = Heap::new(&mut backing[..]);
        let size = usize::MAX / count + 1;

        prop_assert_eq!(
            heap.allocate_zeroed(count, size),
            Err(HeapError::Overflow { count, size })
        );
    }
}
