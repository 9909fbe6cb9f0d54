/*!
 * Thread Critical Section Tests
 */

use nmt::core::sync::ThreadCritical;
use pretty_assertions::assert_eq;
use std::thread;

#[test]
fn test_grouped_updates_are_atomic() {
    let critical = ThreadCritical::new((0_u64, 0_u64));

    thread::scope(|scope| {
        // Writers keep both halves equal inside one held section
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..500 {
                    let _held = critical.enter();
                    critical.with(|pair| pair.0 += 1);
                    critical.with(|pair| pair.1 += 1);
                }
            });
        }
        scope.spawn(|| {
            for _ in 0..500 {
                let (a, b) = critical.with(|pair| *pair);
                assert_eq!(a, b);
            }
        });
    });

    assert_eq!(critical.with(|pair| *pair), (2000, 2000));
}

#[test]
fn test_with_returns_closure_value() {
    let critical = ThreadCritical::new(vec![3, 1, 2]);
    let sorted = critical.with(|values| {
        values.sort_unstable();
        values.clone()
    });
    assert_eq!(sorted, vec![1, 2, 3]);
}

#[test]
#[should_panic]
fn test_nested_with_panics() {
    let critical = ThreadCritical::new(0_u32);
    critical.with(|_| critical.with(|value| *value += 1));
}
