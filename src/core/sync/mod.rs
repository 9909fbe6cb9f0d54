/*!
 * Synchronization Primitives
 *
 * Two primitives carry the tracker's concurrency model:
 * - `ThreadCritical`: reentrant critical section around region-list mutation
 * - `AccessGate`: shared/exclusive counter closed once at teardown
 *
 * Per-allocation counters use plain atomics and need neither.
 */

mod access_gate;
mod thread_critical;

pub use access_gate::{AccessGate, SharedAccess};
pub use thread_critical::{ThreadCritical, ThreadCriticalGuard};
