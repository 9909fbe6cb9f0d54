/*!
 * Virtual Memory Tracker Tests
 * Overlap policies, partial releases and tagging
 */

use nmt::memory::{
    MemTag, MemTracker, NativeCallStack, NmtConfig, TrackingLevel, VirtualMemoryError,
    VirtualMemoryTracker,
};
use pretty_assertions::assert_eq;

const BASE: usize = 0x6000_0000;
const K: usize = 1024;
const M: usize = K * K;

fn stack(id: usize) -> NativeCallStack {
    NativeCallStack::from_frames(&[0x90_0000 + id, 0x91_0000 + id])
}

fn tracker() -> MemTracker {
    MemTracker::new(NmtConfig::with_level(TrackingLevel::Summary))
}

fn vm(tracker: &MemTracker, tag: MemTag) -> (usize, usize) {
    let stats = *tracker.virtual_memory_tracker().snapshot().by_tag(tag);
    (stats.reserved, stats.committed)
}

fn vm_of(tracker: &VirtualMemoryTracker, tag: MemTag) -> (usize, usize) {
    let stats = *tracker.snapshot().by_tag(tag);
    (stats.reserved, stats.committed)
}

#[test]
fn test_stale_thread_stack_is_overwritten() {
    let tracker = tracker();
    tracker.record_thread_stack(BASE, 512 * K, &stack(1));
    assert_eq!(vm(&tracker, MemTag::ThreadStack), (512 * K, 512 * K));

    // A new thread reuses the range before the old stack was released
    tracker.record_thread_stack(BASE + 256 * K, 512 * K, &stack(2));
    assert_eq!(vm(&tracker, MemTag::ThreadStack), (512 * K, 512 * K));

    let region = tracker
        .virtual_memory_tracker()
        .reserved_region_at(BASE + 256 * K)
        .unwrap();
    assert_eq!(region.base(), BASE + 256 * K);
    assert_eq!(*region.stack(), stack(2));
    assert_eq!(tracker.virtual_memory_tracker().region_count(), 1);

    tracker.release_thread_stack(BASE + 256 * K, 512 * K);
    assert_eq!(vm(&tracker, MemTag::ThreadStack), (0, 0));
}

#[test]
fn test_nested_java_heap_reservation_accepted() {
    let tracker = VirtualMemoryTracker::new();
    tracker
        .add_reserved_region(BASE, 64 * M, stack(1), MemTag::JavaHeap)
        .unwrap();
    tracker
        .add_reserved_region(BASE + M, 8 * M, stack(2), MemTag::JavaHeap)
        .unwrap();

    assert_eq!(tracker.region_count(), 1);
    assert_eq!(tracker.snapshot().by_tag(MemTag::JavaHeap).reserved, 64 * M);
}

#[test]
fn test_shared_class_space_partial_release_only_unmaps() {
    let tracker = VirtualMemoryTracker::new();
    tracker
        .add_reserved_region(BASE, 16 * M, stack(1), MemTag::ClassShared)
        .unwrap();
    tracker
        .add_committed_region(BASE + 4 * M, 4 * M, stack(1))
        .unwrap();
    tracker.remove_released_region(BASE + 4 * M, 4 * M).unwrap();

    let region = tracker.reserved_region_at(BASE).unwrap();
    assert_eq!((region.base(), region.size()), (BASE, 16 * M));
    assert_eq!(region.committed_size(), 0);
    let shared = *tracker.snapshot().by_tag(MemTag::ClassShared);
    assert_eq!((shared.reserved, shared.committed), (16 * M, 0));
}

#[test]
fn test_overlap_rejected() {
    let tracker = VirtualMemoryTracker::new();
    tracker
        .add_reserved_region(BASE, 4 * M, stack(1), MemTag::Code)
        .unwrap();

    let err = tracker
        .add_reserved_region(BASE + 2 * M, 4 * M, stack(2), MemTag::Internal)
        .unwrap_err();
    assert_eq!(
        err,
        VirtualMemoryError::OverlappingRegion {
            base: BASE + 2 * M,
            size: 4 * M,
            existing_base: BASE,
            existing_size: 4 * M,
            existing_tag: MemTag::Code,
        }
    );
    assert_eq!(tracker.region_count(), 1);
    assert_eq!(tracker.snapshot().by_tag(MemTag::Internal).reserved, 0);
}

#[test]
#[should_panic(expected = "inconsistency")]
fn test_overlap_is_fatal_through_facade() {
    let tracker = tracker();
    tracker.record_virtual_memory_reserve(BASE, 4 * M, &stack(1), MemTag::GC);
    tracker.record_virtual_memory_reserve(BASE + M, M, &stack(1), MemTag::Other);
}

#[test]
#[should_panic(expected = "Virtual memory error: Range [0x")]
fn test_range_past_address_space_is_fatal_through_facade() {
    let tracker = tracker();
    tracker.record_virtual_memory_reserve(usize::MAX - 0xfff, 0x1000, &stack(1), MemTag::Other);
}

#[test]
fn test_range_past_address_space_rejected() {
    let tracker = VirtualMemoryTracker::new();
    tracker
        .add_reserved_region(BASE, M, stack(1), MemTag::GC)
        .unwrap();

    assert_eq!(
        tracker
            .add_reserved_region(usize::MAX - 0xfff, 0x1000, stack(1), MemTag::GC)
            .unwrap_err(),
        VirtualMemoryError::AddressOverflow {
            addr: usize::MAX - 0xfff,
            size: 0x1000,
        }
    );
    assert!(matches!(
        tracker.add_committed_region(BASE, usize::MAX, stack(1)),
        Err(VirtualMemoryError::AddressOverflow { .. })
    ));
    assert!(matches!(
        tracker.remove_released_region(BASE, usize::MAX),
        Err(VirtualMemoryError::AddressOverflow { .. })
    ));
    assert_eq!(vm_of(&tracker, MemTag::GC), (M, 0));
}

#[test]
fn test_middle_release_splits_region() {
    let tracker = VirtualMemoryTracker::new();
    tracker
        .add_reserved_region(BASE, 10 * M, stack(1), MemTag::Internal)
        .unwrap();
    tracker.add_committed_region(BASE, M, stack(1)).unwrap();
    tracker
        .add_committed_region(BASE + 8 * M, M, stack(1))
        .unwrap();
    tracker
        .remove_released_region(BASE + 4 * M, 2 * M)
        .unwrap();

    let shapes: Vec<_> = tracker
        .regions()
        .iter()
        .map(|r| (r.base(), r.size(), r.committed_size()))
        .collect();
    assert_eq!(
        shapes,
        vec![(BASE, 4 * M, M), (BASE + 6 * M, 4 * M, M)]
    );
    let internal = *tracker.snapshot().by_tag(MemTag::Internal);
    assert_eq!((internal.reserved, internal.committed), (8 * M, 2 * M));
}

#[test]
fn test_edge_release_shrinks_region() {
    let tracker = VirtualMemoryTracker::new();
    tracker
        .add_reserved_region(BASE, 4 * M, stack(1), MemTag::GC)
        .unwrap();
    tracker.remove_released_region(BASE, M).unwrap();
    tracker.remove_released_region(BASE + 3 * M, M).unwrap();

    let region = tracker.reserved_region_at(BASE + M).unwrap();
    assert_eq!((region.base(), region.size()), (BASE + M, 2 * M));
    assert!(tracker.reserved_region_at(BASE).is_none());
    assert_eq!(tracker.snapshot().by_tag(MemTag::GC).reserved, 2 * M);
}

#[test]
fn test_split_refused_with_committed_memory() {
    let tracker = VirtualMemoryTracker::new();
    tracker
        .add_reserved_region(BASE, 4 * M, stack(1), MemTag::Code)
        .unwrap();
    tracker.add_committed_region(BASE, 64 * K, stack(1)).unwrap();

    assert_eq!(
        tracker.split_reserved_region(BASE, 4 * M, M).unwrap_err(),
        VirtualMemoryError::SplitWithCommittedMemory {
            base: BASE,
            committed: 64 * K,
        }
    );
    assert_eq!(
        tracker.split_reserved_region(BASE, 4 * M, 0).unwrap_err(),
        VirtualMemoryError::InvalidSplitOffset {
            base: BASE,
            size: 4 * M,
            offset: 0,
        }
    );
    assert!(matches!(
        tracker.split_reserved_region(BASE, 2 * M, M),
        Err(VirtualMemoryError::RegionNotFound { .. })
    ));
    assert_eq!(tracker.region_count(), 1);
}

#[test]
fn test_untagged_region_tagged_later() {
    let tracker = VirtualMemoryTracker::new();
    tracker
        .add_reserved_region(BASE, 2 * M, stack(1), MemTag::None)
        .unwrap();
    tracker.add_committed_region(BASE, M, stack(1)).unwrap();

    tracker
        .set_reserved_region_type(BASE + K, MemTag::Metaspace)
        .unwrap();
    assert_eq!(
        tracker.reserved_region_at(BASE).unwrap().tag(),
        MemTag::Metaspace
    );
    let metaspace = *tracker.snapshot().by_tag(MemTag::Metaspace);
    assert_eq!((metaspace.reserved, metaspace.committed), (2 * M, M));
    assert_eq!(tracker.snapshot().by_tag(MemTag::None).reserved, 0);

    // Same tag again is a no-op, a different one is a conflict
    tracker
        .set_reserved_region_type(BASE, MemTag::Metaspace)
        .unwrap();
    assert_eq!(
        tracker
            .set_reserved_region_type(BASE, MemTag::Code)
            .unwrap_err(),
        VirtualMemoryError::TagConflict {
            base: BASE,
            existing: MemTag::Metaspace,
            requested: MemTag::Code,
        }
    );

    // Unknown addresses are ignored
    tracker
        .set_reserved_region_type(BASE + 64 * M, MemTag::Code)
        .unwrap();
}

#[test]
fn test_commit_outside_reservation() {
    let tracker = VirtualMemoryTracker::new();
    tracker
        .add_reserved_region(BASE, M, stack(1), MemTag::GC)
        .unwrap();

    assert!(matches!(
        tracker.add_committed_region(BASE + M / 2, M, stack(1)),
        Err(VirtualMemoryError::CommitOutsideReservation { .. })
    ));
    assert!(matches!(
        tracker.add_committed_region(BASE + 2 * M, K, stack(1)),
        Err(VirtualMemoryError::RegionNotFound { .. })
    ));
}

#[test]
fn test_reserve_and_commit() {
    let tracker = tracker();
    tracker.record_virtual_memory_reserve_and_commit(BASE, 2 * M, &stack(1), MemTag::Code);
    assert_eq!(vm(&tracker, MemTag::Code), (2 * M, 2 * M));

    tracker.record_virtual_memory_uncommit(BASE + M, M);
    assert_eq!(vm(&tracker, MemTag::Code), (2 * M, M));

    tracker.record_virtual_memory_release(BASE, 2 * M);
    assert_eq!(vm(&tracker, MemTag::Code), (0, 0));
}

#[test]
fn test_walk_in_address_order() {
    let tracker = VirtualMemoryTracker::new();
    for (i, base) in [BASE + 8 * M, BASE, BASE + 4 * M].into_iter().enumerate() {
        tracker
            .add_reserved_region(base, M, stack(i), MemTag::Other)
            .unwrap();
    }

    let mut seen = Vec::new();
    assert!(tracker.walk_virtual_memory(|region| {
        seen.push(region.base());
        true
    }));
    assert_eq!(seen, vec![BASE, BASE + 4 * M, BASE + 8 * M]);

    let mut visited = 0;
    assert!(!tracker.walk_virtual_memory(|_| {
        visited += 1;
        false
    }));
    assert_eq!(visited, 1);
}

#[test]
fn test_untracked_process_ignores_virtual_memory() {
    let tracker = MemTracker::new(NmtConfig::with_level(TrackingLevel::Off));
    tracker.record_virtual_memory_reserve(BASE, M, &stack(1), MemTag::GC);
    tracker.record_virtual_memory_commit(BASE, M, &stack(1));
    // Would be an inconsistency if anything had been recorded
    tracker.record_virtual_memory_release(BASE + 64 * M, M);

    assert_eq!(tracker.virtual_memory_tracker().region_count(), 0);
}

#[test]
fn test_shutdown_stops_virtual_memory_accounting() {
    let tracker = tracker();
    tracker.record_virtual_memory_reserve(BASE, M, &stack(1), MemTag::GC);
    tracker.shutdown();
    tracker.record_virtual_memory_reserve(BASE + 4 * M, M, &stack(1), MemTag::GC);

    assert_eq!(tracker.virtual_memory_tracker().region_count(), 1);
    assert_eq!(vm(&tracker, MemTag::GC), (M, 0));
}
