use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use eonix_mm::paging::PFN;

use crate::collaborator::PageAllocator;
use crate::config::{Config, ReportSink};
use crate::error::EnableError;
use crate::publication::Published;
use crate::scanner::{scan_region, RegionSlot};
use crate::scheduler::Scheduler;

/// Default debounce interval between a wake request and the start of a
/// scan (§4.3). The engine never sleeps itself; this is exposed purely so
/// the integration glue arming a real timer has the design's default to
/// hand.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Opaque identity of one `enable()` call, handed back by `enable` and
/// required by [`Engine::disable`] (§4.5: "verify the identity of the
/// caller's configuration"; §6.1: disable is "no-op if `config` is not the
/// active configuration"). Plays the same role as the pointer-identity
/// check `src/rcu.rs`'s `RCUList::remove` does against its `Arc<T>`
/// argument, narrowed to a plain counter since a caller here has no
/// existing `Arc` handle of its own to compare by pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigToken(u64);

/// Returned by [`Engine::enable`] on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enabled {
    /// Pass this to [`Engine::disable`] to tear down this configuration.
    /// `disable` silently ignores any other token, including one from a
    /// configuration that has already been disabled.
    pub token: ConfigToken,
    /// `true` if the caller should now arm a debounce timer and call
    /// [`Engine::run_cycle`] once it elapses: per §4.5, `enable` requests
    /// an initial scan of every populated region rather than waiting for
    /// the first free that happens to cross `max_pages`.
    pub should_arm: bool,
}

pub(crate) struct ActiveState<P: PageAllocator> {
    token: ConfigToken,
    regions: Box<[RegionSlot<P::Region>]>,
    sink: Arc<dyn ReportSink>,
    max_pages: usize,
    min_order: u32,
    scheduler: Scheduler,
    cancel: AtomicBool,
}

impl<P: PageAllocator> ActiveState<P> {
    fn find_region(&self, pfn: PFN) -> Option<&RegionSlot<P::Region>> {
        self.regions
            .iter()
            .find(|slot| pfn >= slot.region.base_pfn() && pfn < slot.region.end_pfn())
    }
}

/// Owns the single active configuration for one allocator, per §4.5. All
/// of `Engine`'s public surface corresponds to one component of the
/// design: `enable`/`disable` are Lifecycle Control, `enqueue`/`dequeue`
/// are the Allocator Hooks, and `run_cycle` is what the Scheduler asks the
/// integrator to invoke once a debounce delay elapses.
pub struct Engine<P: PageAllocator> {
    gate: AtomicBool,
    active: Published<ActiveState<P>>,
    next_token: AtomicU64,
}

impl<P: PageAllocator> Engine<P> {
    pub const fn new() -> Self {
        Self {
            gate: AtomicBool::new(false),
            active: Published::empty(),
            next_token: AtomicU64::new(0),
        }
    }

    fn lock_gate(&self) {
        while self
            .gate
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
    }

    fn unlock_gate(&self) {
        self.gate.store(false, Ordering::Release);
    }

    /// Enable against `allocator`. Rejects with `Busy` if already active;
    /// rolls back cleanly (nothing is published) on any other failure. On
    /// success, returns the [`ConfigToken`] identifying this configuration
    /// and whether the caller should arm an initial debounce timer
    /// (§4.5: `enable` requests an initial scan of every populated region,
    /// including the empty region table an allocator may report this
    /// early, rather than waiting for the first free that happens to cross
    /// `max_pages`).
    pub fn enable(&self, allocator: &P, config: Config) -> Result<Enabled, EnableError> {
        self.lock_gate();
        let result = self.enable_locked(allocator, config);
        self.unlock_gate();
        result
    }

    fn enable_locked(&self, allocator: &P, config: Config) -> Result<Enabled, EnableError> {
        if self.active.enter().is_some() {
            return Err(EnableError::Busy);
        }
        if config.min_order < allocator.min_order() {
            return Err(EnableError::MinOrderTooSmall);
        }

        let mut regions: Vec<RegionSlot<P::Region>> = Vec::new();
        allocator.for_each_region(&mut |region| {
            regions.push(RegionSlot::new(region.clone(), config.min_order));
        });

        let token = ConfigToken(self.next_token.fetch_add(1, Ordering::Relaxed));

        let state = Arc::new(ActiveState {
            token,
            regions: regions.into_boxed_slice(),
            sink: config.sink,
            max_pages: config.max_pages.max(1),
            min_order: config.min_order,
            scheduler: Scheduler::new(),
            cancel: AtomicBool::new(false),
        });

        let should_arm = state.scheduler.request();
        self.active.publish(state);

        eonix_log::println_trace!("trace_free_page_reporting", "free_page_reporting: enabled");
        Ok(Enabled { token, should_arm })
    }

    /// Disable the configuration identified by `token`, if it is still the
    /// active one. A no-op for a stale or unrecognized token — including
    /// one from a configuration a prior `disable` already tore down — per
    /// §4.5/§6.1. Returns only after no scanner invocation can still
    /// observe the outgoing configuration (P4).
    pub fn disable(&self, token: ConfigToken) {
        self.lock_gate();

        let matched = match self.active.enter() {
            Some(state) if state.token == token => {
                state.cancel.store(true, Ordering::Release);
                state.scheduler.cancel_pending();
                true
            }
            _ => false,
        };

        if matched {
            let old = self.active.unpublish();
            self.active.quiesce();
            drop(old);

            eonix_log::println_trace!(
                "trace_free_page_reporting",
                "free_page_reporting: disabled"
            );
        }

        self.unlock_gate();
    }

    pub fn is_active(&self) -> bool {
        self.active.enter().is_some()
    }

    /// Allocator free-path hook. Returns `true` if the caller should now
    /// arm a debounce timer and later call [`Self::run_cycle`] (§4.2/§4.3).
    pub fn enqueue(&self, pfn: PFN, order: u32) -> bool {
        let Some(state) = self.active.enter() else {
            return false;
        };
        if order < state.min_order {
            return false;
        }
        let Some(slot) = state.find_region(pfn) else {
            return false;
        };
        let bit = (usize::from(pfn) - usize::from(slot.region.base_pfn())) >> state.min_order;
        slot.index.mark(bit);

        if slot.index.pending() >= state.max_pages {
            state.scheduler.request()
        } else {
            false
        }
    }

    /// Allocator allocate-path hook.
    pub fn dequeue(&self, pfn: PFN) {
        let Some(state) = self.active.enter() else {
            return;
        };
        let Some(slot) = state.find_region(pfn) else {
            return;
        };
        let bit = (usize::from(pfn) - usize::from(slot.region.base_pfn())) >> state.min_order;
        slot.index.unmark_if_set(bit);
    }

    /// Runs one full scheduler cycle: drains every region's candidate
    /// index once, round-robin, then returns to Idle. Returns `false`
    /// without doing anything if there is no active configuration or if
    /// a concurrent `disable` cancelled the pending cycle first.
    pub fn run_cycle(&self) -> bool {
        let Some(state) = self.active.enter() else {
            return false;
        };
        if !state.scheduler.begin_running() {
            return false;
        }

        for slot in state.regions.iter() {
            if state.cancel.load(Ordering::Acquire) {
                break;
            }
            scan_region(slot, state.min_order, state.max_pages, &*state.sink, &state.cancel);
        }

        state.scheduler.finish();
        true
    }
}

impl<P: PageAllocator> Default for Engine<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{BlockingSink, MockAllocator, MockRegion, RecordingSink};
    use std::sync::Arc as StdArc;
    use std::thread;
    use std::time::Duration as StdDuration;

    fn allocator(min_order: u32) -> MockAllocator {
        MockAllocator {
            regions: vec![StdArc::new(MockRegion::new(0, 1 << 16))],
            min_order,
        }
    }

    #[test]
    fn enable_twice_is_busy() {
        let engine = Engine::new();
        let alloc = allocator(9);
        let sink = StdArc::new(RecordingSink::default());
        let enabled = engine
            .enable(&alloc, Config::new(sink.clone(), 16, 9))
            .unwrap();
        assert_eq!(
            engine.enable(&alloc, Config::new(sink, 16, 9)).unwrap_err(),
            EnableError::Busy
        );
        engine.disable(enabled.token);
    }

    #[test]
    fn min_order_below_allocator_minimum_is_rejected() {
        let engine = Engine::new();
        let alloc = allocator(9);
        let sink = StdArc::new(RecordingSink::default());
        assert_eq!(
            engine.enable(&alloc, Config::new(sink, 16, 4)).unwrap_err(),
            EnableError::MinOrderTooSmall
        );
    }

    #[test]
    fn enable_succeeds_with_zero_populated_regions() {
        // An allocator that hasn't registered any region yet (e.g. early
        // boot) is not an enable-time error (§6.1/§7 name no such
        // rejection); the region table is just empty.
        let engine = Engine::new();
        let alloc = MockAllocator {
            regions: Vec::new(),
            min_order: 9,
        };
        let sink = StdArc::new(RecordingSink::default());
        let enabled = engine
            .enable(&alloc, Config::new(sink.clone(), 16, 9))
            .unwrap();
        assert!(engine.run_cycle());
        assert!(sink.batches.lock().unwrap().is_empty());
        engine.disable(enabled.token);
    }

    #[test]
    fn enable_arms_an_initial_scan_per_populated_region() {
        let engine = Engine::new();
        let alloc = allocator(9);
        let sink = StdArc::new(RecordingSink::default());
        let enabled = engine
            .enable(&alloc, Config::new(sink.clone(), 4, 9))
            .unwrap();
        assert!(enabled.should_arm, "enable requests an initial scan (4.5)");

        // Nothing was ever freed, so the initial scan finds the region's
        // candidate index empty and emits no batch.
        assert!(engine.run_cycle());
        assert!(sink.batches.lock().unwrap().is_empty());
        engine.disable(enabled.token);
    }

    #[test]
    fn end_to_end_free_triggers_scan_after_threshold() {
        let engine = Engine::new();
        let alloc = allocator(9);
        let sink = StdArc::new(RecordingSink::default());
        let enabled = engine
            .enable(&alloc, Config::new(sink.clone(), 4, 9))
            .unwrap();
        // Drain the initial (empty) scan enable() just armed so the
        // scheduler is back to Idle before the threshold-triggered
        // request below is the one under test.
        assert!(engine.run_cycle());
        assert!(sink.batches.lock().unwrap().is_empty());

        let region = &alloc.regions[0];
        let mut armed = false;
        for i in 0..4u32 {
            let pfn = PFN::from((i as usize) << 9);
            region.free(usize::from(pfn), 9, Default::default());
            armed = engine.enqueue(pfn, 9) || armed;
        }
        assert!(armed, "4th enqueue at max_pages should arm the scheduler");

        assert!(engine.run_cycle());
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
        assert_eq!(sink.batches.lock().unwrap()[0].len(), 4);

        engine.disable(enabled.token);
        assert!(!engine.is_active());
    }

    #[test]
    fn dequeue_prevents_reporting_a_reallocated_block() {
        let engine = Engine::new();
        let alloc = allocator(9);
        let sink = StdArc::new(RecordingSink::default());
        let enabled = engine
            .enable(&alloc, Config::new(sink.clone(), 16, 9))
            .unwrap();

        let region = &alloc.regions[0];
        let pfn = PFN::from(512usize);
        region.free(512, 9, Default::default());
        engine.enqueue(pfn, 9);
        region.allocate(512);
        engine.dequeue(pfn);

        assert!(engine.run_cycle());
        assert!(sink.batches.lock().unwrap().is_empty());
        engine.disable(enabled.token);
    }

    #[test]
    fn disable_without_enable_is_a_harmless_no_op() {
        let engine: Engine<MockAllocator> = Engine::new();
        engine.disable(ConfigToken(0));
        assert!(!engine.is_active());
    }

    #[test]
    fn disable_ignores_a_stale_token_from_an_earlier_configuration() {
        let engine = Engine::new();
        let alloc = allocator(9);
        let sink_a = StdArc::new(RecordingSink::default());
        let first = engine
            .enable(&alloc, Config::new(sink_a, 16, 9))
            .unwrap();
        engine.disable(first.token);
        assert!(!engine.is_active());

        let sink_b = StdArc::new(RecordingSink::default());
        let second = engine
            .enable(&alloc, Config::new(sink_b, 16, 9))
            .unwrap();
        assert!(second.token != first.token);

        // A caller still holding the first (now-stale) token must not be
        // able to tear down the second, unrelated configuration.
        engine.disable(first.token);
        assert!(engine.is_active(), "stale token must not disable a later configuration");

        engine.disable(second.token);
        assert!(!engine.is_active());
    }

    /// P2 (at-most-once scan) and P4 (quiescence on disable), exercised
    /// under real thread contention instead of a pre-set flag: one thread
    /// runs a scan whose reporter callback blocks, and `disable` is called
    /// concurrently from another thread while that scan is still in flight
    /// (§8 scenario 4).
    #[test]
    fn disable_waits_for_an_in_flight_scan_before_tearing_down() {
        let engine = StdArc::new(Engine::new());
        let alloc = StdArc::new(allocator(9));
        let sink = StdArc::new(BlockingSink::default());

        alloc.regions[0].free(512, 9, Default::default());
        let enabled = engine
            .enable(&*alloc, Config::new(sink.clone(), 16, 9))
            .unwrap();
        engine.enqueue(PFN::from(512usize), 9);

        let scan_engine = engine.clone();
        let scan_thread = thread::spawn(move || scan_engine.run_cycle());

        // Wait for the scanner to have isolated the block and parked inside
        // the reporter callback before trying to disable concurrently.
        sink.wait_until_entered();

        let disable_engine = engine.clone();
        let token = enabled.token;
        let disable_thread = thread::spawn(move || disable_engine.disable(token));

        // disable() must not be able to return while the callback is still
        // parked: give it a beat, then confirm it's still blocked.
        thread::sleep(StdDuration::from_millis(50));
        assert!(
            !disable_thread.is_finished(),
            "disable must block until the in-flight batch is released (P4)"
        );
        assert!(engine.is_active(), "configuration is still torn down mid-quiesce");

        sink.release();

        assert!(scan_thread.join().unwrap());
        disable_thread.join().unwrap();

        assert_eq!(sink.batches.lock().unwrap().len(), 1);
        assert!(!engine.is_active());

        // disable() having fully returned, a fresh enable() must succeed.
        let sink2 = StdArc::new(RecordingSink::default());
        assert!(engine.enable(&*alloc, Config::new(sink2, 16, 9)).is_ok());
    }
}
