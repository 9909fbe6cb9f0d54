/*!
 * Access Gate Tests
 */

use nmt::core::sync::AccessGate;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

#[test]
fn test_readers_enter_concurrently() {
    let gate = AccessGate::new();
    let entered = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..1000 {
                    let _access = gate.try_enter().unwrap();
                    entered.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(entered.load(Ordering::Relaxed), 8000);
    assert_eq!(gate.readers(), 0);
    assert!(!gate.is_closed());
}

#[test]
fn test_close_under_contention() {
    let gate = AccessGate::new();
    let admitted_after_close = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| loop {
                match gate.try_enter() {
                    Some(_access) => {
                        if gate.is_closed() {
                            // Entered before the close, still draining
                            continue;
                        }
                    }
                    None => break,
                }
            });
        }
        scope.spawn(|| {
            assert!(gate.close());
            if gate.try_enter().is_some() {
                admitted_after_close.fetch_add(1, Ordering::Relaxed);
            }
        });
    });

    assert!(gate.is_closed());
    assert_eq!(gate.readers(), 0);
    assert_eq!(admitted_after_close.load(Ordering::Relaxed), 0);
}

#[test]
fn test_only_one_close_wins() {
    let gate = AccessGate::new();
    let winners = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..6 {
            scope.spawn(|| {
                if gate.close() {
                    winners.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(winners.load(Ordering::Relaxed), 1);
}
