/*!
 * Malloc Tracking Tests
 * Header accounting, call-site attribution and level degradation
 */

use nmt::memory::{
    MallocHeader, MallocTracker, MemTag, MemTracker, NativeCallStack, NmtConfig, TrackingLevel,
};
use pretty_assertions::assert_eq;
use std::ptr::NonNull;
use std::thread;

fn tracker(level: TrackingLevel) -> MemTracker {
    MemTracker::new(NmtConfig::with_level(level))
}

fn site(frame: usize) -> NativeCallStack {
    NativeCallStack::from_frames(&[frame, frame + 0x10, frame + 0x20])
}

#[repr(C, align(16))]
struct RawBlock([u8; 256]);

#[test]
fn test_malloc_free_returns_counters_to_zero() {
    let tracker = tracker(TrackingLevel::Detail);
    let stack = site(0x5000);

    let block = tracker.malloc(100, MemTag::Internal, &stack).unwrap();
    let internal = *tracker.malloc_tracker().snapshot().by_tag(MemTag::Internal);
    assert_eq!((internal.malloc_size(), internal.malloc_count()), (100, 1));

    tracker.free(block);

    let internal = *tracker.malloc_tracker().snapshot().by_tag(MemTag::Internal);
    assert_eq!((internal.malloc_size(), internal.malloc_count()), (0, 0));

    // The site survives with zeroed counters
    let sites = tracker.malloc_tracker().site_table().unwrap();
    let record = sites.lookup_or_add(&stack, MemTag::Internal).unwrap();
    assert!(!record.created);
    let snapshot = sites.site_at(record.location).unwrap();
    assert_eq!((snapshot.size, snapshot.count), (0, 0));
    assert_eq!(snapshot.peak_size, 100);
}

#[test]
fn test_block_payload_is_usable() {
    let tracker = tracker(TrackingLevel::Summary);
    let mut block = tracker
        .malloc(64, MemTag::Symbol, &NativeCallStack::EMPTY)
        .unwrap();

    assert_eq!(block.len(), 64);
    assert!(block.as_slice().iter().all(|byte| *byte == 0));
    block.as_mut_slice().copy_from_slice(&[0xab; 64]);
    assert_eq!(block.as_slice()[63], 0xab);
    assert_eq!(block.as_ptr() as usize % 16, 0);
    assert_eq!(block.recorded_size(), Some(64));
}

#[test]
fn test_realloc_moves_payload_and_accounting() {
    let tracker = tracker(TrackingLevel::Summary);
    let mut block = tracker
        .malloc(8, MemTag::Compiler, &NativeCallStack::EMPTY)
        .unwrap();
    block.as_mut_slice().copy_from_slice(b"tracking");

    let grown = tracker
        .realloc(block, 32, &NativeCallStack::EMPTY)
        .unwrap();
    assert_eq!(&grown.as_slice()[..8], b"tracking");
    assert_eq!(grown.tag(), MemTag::Compiler);

    let compiler = *tracker.malloc_tracker().snapshot().by_tag(MemTag::Compiler);
    assert_eq!((compiler.malloc_size(), compiler.malloc_count()), (32, 1));

    let shrunk = tracker
        .realloc(grown, 4, &NativeCallStack::EMPTY)
        .unwrap();
    assert_eq!(shrunk.as_slice(), b"trac");
    drop(shrunk);
    assert_eq!(tracker.malloc_tracker().snapshot().total_count(), 0);
}

#[test]
fn test_raw_header_round_trip() {
    let tracker = tracker(TrackingLevel::Summary);
    let mut storage = RawBlock([0; 256]);
    let raw = NonNull::new(storage.0.as_mut_ptr()).unwrap();

    unsafe {
        let user = tracker.record_malloc(raw, 200, MemTag::Thread, &NativeCallStack::EMPTY);
        assert_eq!(
            user.as_ptr() as usize - raw.as_ptr() as usize,
            MallocHeader::SIZE
        );
        assert_eq!(MallocTracker::get_size(user), 200);
        assert_eq!(MallocTracker::get_flags(user), MemTag::Thread);

        let back = tracker.record_free(user);
        assert_eq!(back, raw);
    }
}

#[test]
#[should_panic(expected = "double free")]
fn test_double_free_is_fatal() {
    let tracker = tracker(TrackingLevel::Summary);
    let mut storage = RawBlock([0; 256]);
    let raw = NonNull::new(storage.0.as_mut_ptr()).unwrap();

    unsafe {
        let user = tracker.record_malloc(raw, 16, MemTag::Other, &NativeCallStack::EMPTY);
        tracker.record_free(user);
        tracker.record_free(user);
    }
}

#[test]
fn test_site_overflow_degrades_to_summary() {
    // One bucket, three slots: the bootstrap site takes the first
    let config = NmtConfig {
        level: TrackingLevel::Detail,
        site_table_size: 1,
        max_bucket_length: 3,
        ..NmtConfig::default()
    };
    let tracker = MemTracker::new(config);

    let a = tracker.malloc(10, MemTag::Test, &site(0x100)).unwrap();
    let b = tracker.malloc(20, MemTag::Test, &site(0x200)).unwrap();
    assert_eq!(tracker.tracking_level(), TrackingLevel::Detail);

    // The allocation still succeeds and is still summarized
    let c = tracker.malloc(30, MemTag::Test, &site(0x300)).unwrap();
    assert_eq!(tracker.tracking_level(), TrackingLevel::Summary);
    assert_eq!(
        tracker
            .malloc_tracker()
            .snapshot()
            .by_tag(MemTag::Test)
            .malloc_size(),
        60
    );

    drop((a, b, c));
    let test = *tracker.malloc_tracker().snapshot().by_tag(MemTag::Test);
    assert_eq!((test.malloc_size(), test.malloc_count()), (0, 0));
    assert!(tracker.malloc_tracker().site_table().unwrap().is_shut_down());
}

#[test]
fn test_off_tracks_nothing() {
    let tracker = tracker(TrackingLevel::Off);
    let block = tracker.malloc(128, MemTag::GC, &site(0x1)).unwrap();
    assert_eq!(block.recorded_size(), None);
    assert_eq!(tracker.malloc_tracker().snapshot().total_count(), 0);
    assert!(tracker.malloc_tracker().site_table().is_none());
}

#[test]
fn test_arena_chunks_not_double_counted() {
    let tracker = tracker(TrackingLevel::Summary);
    let chunk = tracker
        .malloc(32 * 1024, MemTag::Chunk, &NativeCallStack::EMPTY)
        .unwrap();
    tracker.record_new_arena(MemTag::Compiler);
    tracker.record_arena_size_change(32 * 1024, MemTag::Compiler);

    let snapshot = tracker.malloc_tracker().snapshot();
    assert_eq!(snapshot.by_tag(MemTag::Chunk).malloc_size(), 0);
    assert_eq!(snapshot.by_tag(MemTag::Compiler).arena_size(), 32 * 1024);
    assert_eq!(snapshot.total_malloc() + snapshot.total_arena(), 32 * 1024);

    tracker.record_arena_size_change(-32 * 1024, MemTag::Compiler);
    tracker.record_arena_free(MemTag::Compiler);
    drop(chunk);
    let compiler = *tracker.malloc_tracker().snapshot().by_tag(MemTag::Compiler);
    assert_eq!((compiler.arena_size(), compiler.arena_count()), (0, 0));
}

#[test]
fn test_concurrent_malloc_free_balances() {
    let tracker = tracker(TrackingLevel::Detail);
    let tags = [MemTag::Internal, MemTag::GC, MemTag::Symbol, MemTag::Thread];

    thread::scope(|scope| {
        for worker in 0..8usize {
            let tracker = &tracker;
            scope.spawn(move || {
                for i in 0..500usize {
                    let tag = tags[(worker + i) % tags.len()];
                    let stack = site(0x1000 * (i % 16 + 1));
                    let block = tracker.malloc(i % 64 + 1, tag, &stack).unwrap();
                    assert_eq!(block.len(), i % 64 + 1);
                }
            });
        }
    });

    let snapshot = tracker.malloc_tracker().snapshot();
    assert_eq!(snapshot.total_count(), 0);
    assert_eq!(snapshot.total_malloc(), 0);
    for tag in tags {
        assert!(snapshot.by_tag(tag).malloc.peak_count > 0);
    }

    // 16 stacks x 4 tags at most, plus the bootstrap site
    let stats = tracker
        .malloc_tracker()
        .site_table()
        .unwrap()
        .statistics()
        .unwrap();
    assert!(stats.entries <= 16 * tags.len() + 1);
}
