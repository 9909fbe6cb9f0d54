/*!
 * Reserved Region Tests
 * Commit merging, uncommit splitting and region splits
 */

use nmt::memory::{MemTag, NativeCallStack, VirtualMemoryTracker};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const A: usize = 0x7f00_0000_0000;
const K: usize = 1024;
const M: usize = K * K;

fn stack(id: usize) -> NativeCallStack {
    NativeCallStack::from_frames(&[0x40_0000 + id])
}

fn committed_ranges(tracker: &VirtualMemoryTracker, addr: usize) -> Vec<(usize, usize)> {
    tracker
        .reserved_region_at(addr)
        .unwrap()
        .committed_regions()
        .iter()
        .map(|c| (c.base(), c.size()))
        .collect()
}

fn reserve_gc() -> VirtualMemoryTracker {
    let tracker = VirtualMemoryTracker::new();
    tracker
        .add_reserved_region(A, M, stack(1), MemTag::GC)
        .unwrap();
    tracker
}

#[test]
fn test_adjacent_commits_merge() {
    let tracker = reserve_gc();
    tracker.add_committed_region(A, 4 * K, stack(2)).unwrap();
    tracker
        .add_committed_region(A + 4 * K, 4 * K, stack(2))
        .unwrap();

    assert_eq!(committed_ranges(&tracker, A), vec![(A, 8 * K)]);
    let gc = *tracker.snapshot().by_tag(MemTag::GC);
    assert_eq!(gc.committed, 8192);
    assert_eq!(gc.reserved, M);
}

#[test]
fn test_uncommit_punches_hole() {
    let tracker = reserve_gc();
    tracker.add_committed_region(A, 4 * K, stack(2)).unwrap();
    tracker
        .add_committed_region(A + 4 * K, 4 * K, stack(2))
        .unwrap();
    tracker
        .remove_uncommitted_region(A + 2 * K, 4 * K)
        .unwrap();

    assert_eq!(
        committed_ranges(&tracker, A),
        vec![(A, 2 * K), (A + 6 * K, 2 * K)]
    );
    assert_eq!(tracker.snapshot().by_tag(MemTag::GC).committed, 4096);
    assert_eq!(tracker.reserved_region_at(A).unwrap().committed_size(), 4096);
}

#[test]
fn test_split_uncommitted_region() {
    let cs = 64 * K;
    let tracker = VirtualMemoryTracker::new();
    tracker
        .add_reserved_region(A, 10 * cs, stack(3), MemTag::Code)
        .unwrap();
    tracker.split_reserved_region(A, 10 * cs, 4 * cs).unwrap();

    let regions = tracker.regions();
    let shapes: Vec<_> = regions
        .iter()
        .map(|r| (r.base(), r.size(), r.tag(), *r.stack()))
        .collect();
    assert_eq!(
        shapes,
        vec![
            (A, 4 * cs, MemTag::Code, stack(3)),
            (A + 4 * cs, 6 * cs, MemTag::Code, stack(3)),
        ]
    );
    assert_eq!(tracker.snapshot().by_tag(MemTag::Code).reserved, 10 * cs);
}

#[test]
fn test_reregistration_is_idempotent() {
    let tracker = reserve_gc();
    tracker.add_committed_region(A, 16 * K, stack(2)).unwrap();
    let before = tracker.snapshot();

    tracker
        .add_reserved_region(A, M, stack(1), MemTag::GC)
        .unwrap();
    assert_eq!(tracker.snapshot(), before);
    assert_eq!(tracker.region_count(), 1);
    assert_eq!(committed_ranges(&tracker, A), vec![(A, 16 * K)]);
}

#[test]
fn test_reserve_release_round_trip() {
    let tracker = VirtualMemoryTracker::new();
    let empty = tracker.snapshot();

    tracker
        .add_reserved_region(A, 2 * M, stack(1), MemTag::Internal)
        .unwrap();
    tracker
        .add_committed_region(A + M, 64 * K, stack(1))
        .unwrap();
    tracker.remove_released_region(A, 2 * M).unwrap();

    assert_eq!(tracker.region_count(), 0);
    let internal = *tracker.snapshot().by_tag(MemTag::Internal);
    assert_eq!((internal.reserved, internal.committed), (0, 0));
    assert_eq!(internal.peak_committed, 64 * K);
    assert_eq!(empty.total_reserved(), tracker.snapshot().total_reserved());
}

#[test]
fn test_merge_in_either_order() {
    for order in [[0, 1], [1, 0]] {
        let tracker = reserve_gc();
        for i in order {
            tracker
                .add_committed_region(A + i * 4 * K, 4 * K, stack(9))
                .unwrap();
        }
        assert_eq!(committed_ranges(&tracker, A), vec![(A, 8 * K)]);
    }
}

#[test]
fn test_different_stacks_do_not_merge() {
    let tracker = reserve_gc();
    tracker.add_committed_region(A, 4 * K, stack(2)).unwrap();
    tracker
        .add_committed_region(A + 4 * K, 4 * K, stack(3))
        .unwrap();

    assert_eq!(
        committed_ranges(&tracker, A),
        vec![(A, 4 * K), (A + 4 * K, 4 * K)]
    );
    assert_eq!(tracker.snapshot().by_tag(MemTag::GC).committed, 8 * K);
}

#[test]
fn test_recommit_from_new_stack_replaces_stack() {
    let tracker = reserve_gc();
    tracker.add_committed_region(A, 4 * K, stack(2)).unwrap();
    tracker.add_committed_region(A, 4 * K, stack(3)).unwrap();

    let region = tracker.reserved_region_at(A).unwrap();
    let committed = region.committed_regions();
    assert_eq!(committed.len(), 1);
    assert_eq!(*committed[0].stack(), stack(3));
    assert_eq!(tracker.snapshot().by_tag(MemTag::GC).committed, 4 * K);
}

#[test]
fn test_recommit_from_new_stack_merges_with_neighbour() {
    let tracker = reserve_gc();
    tracker.add_committed_region(A, 4 * K, stack(3)).unwrap();
    tracker
        .add_committed_region(A + 4 * K, 4 * K, stack(2))
        .unwrap();
    tracker
        .add_committed_region(A + 4 * K, 4 * K, stack(3))
        .unwrap();

    assert_eq!(committed_ranges(&tracker, A), vec![(A, 8 * K)]);
    assert_eq!(tracker.snapshot().by_tag(MemTag::GC).committed, 8 * K);
}

#[test]
fn test_recommit_over_existing_counts_only_new_bytes() {
    let tracker = reserve_gc();
    tracker.add_committed_region(A, 8 * K, stack(2)).unwrap();
    tracker
        .add_committed_region(A + 4 * K, 8 * K, stack(2))
        .unwrap();

    assert_eq!(committed_ranges(&tracker, A), vec![(A, 12 * K)]);
    assert_eq!(tracker.snapshot().by_tag(MemTag::GC).committed, 12 * K);
}

#[test]
fn test_split_then_release_both_halves() {
    let tracker = VirtualMemoryTracker::new();
    tracker
        .add_reserved_region(A, 8 * M, stack(4), MemTag::Thread)
        .unwrap();
    tracker.split_reserved_region(A, 8 * M, 3 * M).unwrap();
    tracker.remove_released_region(A, 3 * M).unwrap();
    tracker.remove_released_region(A + 3 * M, 5 * M).unwrap();

    assert_eq!(tracker.region_count(), 0);
    assert_eq!(tracker.snapshot().by_tag(MemTag::Thread).reserved, 0);
}

#[derive(Debug, Clone)]
enum Op {
    Commit { page: usize, pages: usize, stack: usize },
    Uncommit { page: usize, pages: usize },
}

const PAGES: usize = 64;
const PAGE: usize = 4 * K;

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..PAGES, 1..8usize, 0..3usize).prop_map(|(page, pages, stack)| Op::Commit {
            page,
            pages,
            stack
        }),
        (0..PAGES, 1..8usize).prop_map(|(page, pages)| Op::Uncommit { page, pages }),
    ]
}

proptest! {
    #[test]
    fn prop_committed_list_stays_canonical(ops in prop::collection::vec(op(), 1..64)) {
        let tracker = VirtualMemoryTracker::new();
        tracker
            .add_reserved_region(A, PAGES * PAGE, stack(0), MemTag::GC)
            .unwrap();

        for op in ops {
            match op {
                Op::Commit { page, pages, stack: id } => {
                    let pages = pages.min(PAGES - page);
                    tracker
                        .add_committed_region(A + page * PAGE, pages * PAGE, stack(id))
                        .unwrap();
                }
                Op::Uncommit { page, pages } => {
                    let pages = pages.min(PAGES - page);
                    tracker
                        .remove_uncommitted_region(A + page * PAGE, pages * PAGE)
                        .unwrap();
                }
            }

            let region = tracker.reserved_region_at(A).unwrap();
            let committed = region.committed_regions();
            for pair in committed.windows(2) {
                prop_assert!(pair[0].end() <= pair[1].base());
                prop_assert!(!(pair[0].end() == pair[1].base() && pair[0].stack() == pair[1].stack()));
            }
            for range in committed {
                prop_assert!(range.base() >= A && range.end() <= A + PAGES * PAGE);
                prop_assert!(range.size() > 0);
            }
            prop_assert_eq!(
                region.committed_size(),
                tracker.snapshot().by_tag(MemTag::GC).committed
            );
        }
    }
}
