/*!
 * Memory Tracker
 *
 * Entry point for every tracking call. Owns the tracking level, the malloc
 * and virtual memory trackers and the last baseline.
 *
 * ## Levels
 *
 * The level is fixed at construction and afterwards only moves down:
 * - Site-table exhaustion drops `detail` to `summary`
 * - [`MemTracker::shutdown`] drops any level to `minimal`
 *
 * Allocations made while the process was started with `off` never carry a
 * header; every other level writes one, even after shutdown, so that frees
 * of older blocks stay correct.
 *
 * ## Failure model
 *
 * Virtual memory consistency violations are fatal: they are logged and the
 * call panics. Resource exhaustion degrades the level and never fails the
 * caller's operation.
 */

use super::baseline::{BaselineError, BaselineResult, MemBaseline};
use super::config::NmtConfig;
use super::diff::BaselineDiff;
use super::malloc::{MallocHeader, MallocTracker, SiteRecording, TrackedBlock};
use super::metaspace::MetaspaceCounters;
use super::stack::NativeCallStack;
use super::tag::MemTag;
use super::traits::MetaspaceStatsSource;
use super::types::{TrackingLevel, TrackingState};
use super::virtual_memory::{VirtualMemoryError, VirtualMemoryTracker};
use crate::core::errors::TrackerError;
use crate::core::types::{Address, Size, SizeDelta};
use arc_swap::ArcSwapOption;
use log::{error, warn};
use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};
use tracing::{info, instrument};

static GLOBAL: OnceLock<MemTracker> = OnceLock::new();

/// Native memory tracker
pub struct MemTracker {
    config: NmtConfig,
    state: TrackingState,
    malloc: MallocTracker,
    virtual_memory: VirtualMemoryTracker,
    metaspace: Arc<dyn MetaspaceStatsSource>,
    baseline: ArcSwapOption<MemBaseline>,
}

impl MemTracker {
    /// Tracker with built-in metaspace counters
    pub fn new(config: NmtConfig) -> Self {
        Self::with_metaspace(config, Arc::new(MetaspaceCounters::new()))
    }

    /// Tracker reading metaspace figures from `metaspace`
    pub fn with_metaspace(config: NmtConfig, metaspace: Arc<dyn MetaspaceStatsSource>) -> Self {
        let level = config.level;
        let malloc = MallocTracker::new(level, &config);
        info!(level = %level, "Native memory tracking initialized");
        Self {
            config,
            state: TrackingState::new(level),
            malloc,
            virtual_memory: VirtualMemoryTracker::new(),
            metaspace,
            baseline: ArcSwapOption::empty(),
        }
    }

    /// Install the process-wide tracker
    ///
    /// Only the first call configures it; later calls return the existing
    /// tracker unchanged.
    pub fn init_global(config: NmtConfig) -> &'static MemTracker {
        let mut installed = false;
        let tracker = GLOBAL.get_or_init(|| {
            installed = true;
            Self::new(config)
        });
        if !installed {
            warn!("Global memory tracker already initialized, configuration ignored");
        }
        tracker
    }

    /// Process-wide tracker, configured from the environment on first use
    pub fn global() -> &'static MemTracker {
        GLOBAL.get_or_init(|| Self::new(NmtConfig::from_env()))
    }

    pub fn config(&self) -> &NmtConfig {
        &self.config
    }

    #[inline]
    pub fn tracking_level(&self) -> TrackingLevel {
        self.state.current()
    }

    pub fn initial_level(&self) -> TrackingLevel {
        self.state.initial()
    }

    /// Bytes every allocation reserves in front of its payload
    #[inline]
    pub fn malloc_header_size(&self) -> Size {
        if self.state.initial() == TrackingLevel::Off {
            0
        } else {
            MallocHeader::SIZE
        }
    }

    /// Call stack of the caller, captured only at detail level
    #[inline(never)]
    pub fn call_stack(&self) -> NativeCallStack {
        if self.tracking_level() == TrackingLevel::Detail {
            NativeCallStack::capture(self.config.stack_skip)
        } else {
            NativeCallStack::EMPTY
        }
    }

    // ---------------------------------------------------------------------
    // Malloc
    // ---------------------------------------------------------------------

    /// Install a header at `raw` and account the allocation
    ///
    /// Returns the pointer handed to the caller: `raw` itself if the process
    /// started untracked, otherwise `raw` plus the header size.
    ///
    /// # Safety
    /// `raw` must be 16-byte aligned and valid for writes of
    /// `malloc_header_size() + size` bytes.
    pub unsafe fn record_malloc(
        &self,
        raw: NonNull<u8>,
        size: Size,
        tag: MemTag,
        stack: &NativeCallStack,
    ) -> NonNull<u8> {
        if self.state.initial() == TrackingLevel::Off {
            return raw;
        }
        let level = self.tracking_level();
        let (user, recording) = self.malloc.record_malloc(raw, size, tag, stack, level);
        if recording == SiteRecording::Overflow {
            self.degrade_to_summary();
        }
        user
    }

    /// Undo the accounting of a block and return the pointer to release
    ///
    /// # Safety
    /// `user` must come from [`MemTracker::record_malloc`] on this tracker
    /// and must not have been freed yet.
    pub unsafe fn record_free(&self, user: NonNull<u8>) -> NonNull<u8> {
        if self.state.initial() == TrackingLevel::Off {
            return user;
        }
        self.malloc.record_free(user, self.tracking_level())
    }

    /// Allocate a tracked block of `size` zeroed bytes
    ///
    /// Returns `None` if the global allocator fails.
    pub fn malloc(&self, size: Size, tag: MemTag, stack: &NativeCallStack) -> Option<TrackedBlock<'_>> {
        TrackedBlock::allocate(self, size, tag, stack)
    }

    /// Release a tracked block
    pub fn free(&self, block: TrackedBlock<'_>) {
        drop(block);
    }

    /// Move a block's payload into a new block of `new_size` bytes
    ///
    /// On allocation failure the original block is handed back untouched.
    pub fn realloc<'t>(
        &'t self,
        block: TrackedBlock<'t>,
        new_size: Size,
        stack: &NativeCallStack,
    ) -> Result<TrackedBlock<'t>, TrackedBlock<'t>> {
        let Some(mut resized) = TrackedBlock::allocate(self, new_size, block.tag(), stack) else {
            return Err(block);
        };
        let keep = block.len().min(new_size);
        resized.as_mut_slice()[..keep].copy_from_slice(&block.as_slice()[..keep]);
        drop(block);
        Ok(resized)
    }

    pub fn record_new_arena(&self, tag: MemTag) {
        if self.tracking_level().accounts() {
            self.malloc.record_new_arena(tag);
        }
    }

    pub fn record_arena_free(&self, tag: MemTag) {
        if self.tracking_level().accounts() {
            self.malloc.record_arena_free(tag);
        }
    }

    pub fn record_arena_size_change(&self, delta: SizeDelta, tag: MemTag) {
        if self.tracking_level().accounts() {
            self.malloc.record_arena_size_change(delta, tag);
        }
    }

    // ---------------------------------------------------------------------
    // Virtual memory
    // ---------------------------------------------------------------------

    pub fn record_virtual_memory_reserve(
        &self,
        base: Address,
        size: Size,
        stack: &NativeCallStack,
        tag: MemTag,
    ) {
        if self.tracking_level().accounts() {
            let result = self
                .virtual_memory
                .add_reserved_region(base, size, *stack, tag);
            Self::check(result);
        }
    }

    pub fn record_virtual_memory_commit(&self, base: Address, size: Size, stack: &NativeCallStack) {
        if self.tracking_level().accounts() {
            Self::check(self.virtual_memory.add_committed_region(base, size, *stack));
        }
    }

    /// Reserve and commit `[base, base + size)` as one step
    pub fn record_virtual_memory_reserve_and_commit(
        &self,
        base: Address,
        size: Size,
        stack: &NativeCallStack,
        tag: MemTag,
    ) {
        if !self.tracking_level().accounts() {
            return;
        }
        let _critical = self.virtual_memory.critical_section();
        Self::check(self.virtual_memory.add_reserved_region(base, size, *stack, tag));
        Self::check(self.virtual_memory.add_committed_region(base, size, *stack));
    }

    pub fn record_virtual_memory_uncommit(&self, base: Address, size: Size) {
        if self.tracking_level().accounts() {
            Self::check(self.virtual_memory.remove_uncommitted_region(base, size));
        }
    }

    pub fn record_virtual_memory_release(&self, base: Address, size: Size) {
        if self.tracking_level().accounts() {
            Self::check(self.virtual_memory.remove_released_region(base, size));
        }
    }

    pub fn record_virtual_memory_split_reserved(&self, base: Address, size: Size, split_offset: Size) {
        if self.tracking_level().accounts() {
            Self::check(
                self.virtual_memory
                    .split_reserved_region(base, size, split_offset),
            );
        }
    }

    pub fn record_virtual_memory_type(&self, addr: Address, tag: MemTag) {
        if self.tracking_level().accounts() {
            Self::check(self.virtual_memory.set_reserved_region_type(addr, tag));
        }
    }

    /// Account a thread stack as reserved and fully committed
    pub fn record_thread_stack(&self, base: Address, size: Size, stack: &NativeCallStack) {
        self.record_virtual_memory_reserve_and_commit(base, size, stack, MemTag::ThreadStack);
    }

    pub fn release_thread_stack(&self, base: Address, size: Size) {
        self.record_virtual_memory_release(base, size);
    }

    fn check(result: Result<(), VirtualMemoryError>) {
        if let Err(e) = result.map_err(TrackerError::from) {
            error!("Virtual memory tracking inconsistency: {}", e);
            panic!("virtual memory tracking inconsistency: {e}");
        }
    }

    // ---------------------------------------------------------------------
    // Levels
    // ---------------------------------------------------------------------

    /// Lower the tracking level to `level`
    ///
    /// Returns `false` if the tracker is already at or below `level`.
    /// Leaving detail level tears down the site table.
    pub fn transition_to(&self, level: TrackingLevel) -> bool {
        let Some(previous) = self.state.downgrade_to(level) else {
            return false;
        };
        if previous == TrackingLevel::Detail {
            self.malloc.shutdown();
        }
        info!(from = %previous, to = %self.tracking_level(), "Tracking level lowered");
        true
    }

    /// Stop accounting for the rest of the process
    pub fn shutdown(&self) {
        self.transition_to(TrackingLevel::Minimal);
    }

    fn degrade_to_summary(&self) {
        if self.transition_to(TrackingLevel::Summary) {
            warn!("Malloc site table is full, native memory tracking lowered to summary");
        }
    }

    // ---------------------------------------------------------------------
    // Baselines
    // ---------------------------------------------------------------------

    /// Take a new baseline and keep it as the reference for later diffs
    #[instrument(skip(self), level = "debug")]
    pub fn baseline(&self, summary_only: bool) -> BaselineResult<()> {
        let baseline = MemBaseline::capture(self, summary_only)?;
        info!(
            reserved = baseline.total_reserved_memory(),
            committed = baseline.total_committed_memory(),
            "Baseline taken"
        );
        self.baseline.store(Some(Arc::new(baseline)));
        Ok(())
    }

    /// Last baseline taken, if any
    pub fn get_baseline(&self) -> Option<Arc<MemBaseline>> {
        self.baseline.load_full()
    }

    /// Compare the current state against the last baseline
    pub fn diff_against_baseline(&self, summary_only: bool) -> BaselineResult<BaselineDiff> {
        let early = self.get_baseline().ok_or(BaselineError::NotAvailable)?;
        let current = MemBaseline::capture(self, summary_only)?;
        Ok(BaselineDiff::compute(&early, &current))
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn malloc_tracker(&self) -> &MallocTracker {
        &self.malloc
    }

    pub fn virtual_memory_tracker(&self) -> &VirtualMemoryTracker {
        &self.virtual_memory
    }

    pub fn metaspace_source(&self) -> &dyn MetaspaceStatsSource {
        self.metaspace.as_ref()
    }
}

impl fmt::Debug for MemTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemTracker")
            .field("initial_level", &self.initial_level())
            .field("level", &self.tracking_level())
            .field("regions", &self.virtual_memory.region_count())
            .field("has_baseline", &self.baseline.load().is_some())
            .finish()
    }
}
