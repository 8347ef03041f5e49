use core::sync::atomic::{AtomicU8, Ordering};

const IDLE: u8 = 0;
const PENDING: u8 = 1;
const RUNNING: u8 = 2;

/// Idle -> Pending -> Running -> Idle, as in §4.3. A single instance per
/// active configuration; there is no per-region state here, only the
/// global busy flag that guarantees at most one scan in flight (I4/P2).
pub struct Scheduler {
    state: AtomicU8,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    /// Called from the free hot path when `pending >= max_pages` and the
    /// scheduler looks idle. Returns `true` if this call is the one that
    /// transitioned Idle -> Pending, meaning the caller (the integration
    /// glue owning a timer) should arm the debounce delay. Any concurrent
    /// request that finds the scheduler already Pending or Running is
    /// absorbed into the in-flight cycle, exactly as §4.3 requires.
    pub fn request(&self) -> bool {
        self.state
            .compare_exchange(IDLE, PENDING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Called by the integration glue once the debounce delay has
    /// elapsed. Returns `true` if the caller should proceed to drain
    /// regions; `false` means a concurrent `cancel` (disable) won the
    /// race and there is nothing to do.
    pub fn begin_running(&self) -> bool {
        self.state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Called once every region's candidate index has been drained in
    /// this cycle. Returns to Idle so a future free can request again.
    pub fn finish(&self) {
        self.state.store(IDLE, Ordering::Release);
    }

    /// Used by `disable` to prevent a Pending cycle from ever starting;
    /// a Running cycle is left to finish its current batch and observe
    /// disable separately (see `Lifecycle`).
    pub fn cancel_pending(&self) {
        let _ = self
            .state
            .compare_exchange(PENDING, IDLE, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_wins_subsequent_are_absorbed() {
        let sc = Scheduler::new();
        assert!(sc.request());
        assert!(!sc.request());
        assert!(!sc.request());
    }

    #[test]
    fn begin_running_then_finish_allows_new_cycle() {
        let sc = Scheduler::new();
        assert!(sc.request());
        assert!(sc.begin_running());
        assert!(sc.is_running());
        sc.finish();
        assert!(sc.request());
    }

    #[test]
    fn cancel_pending_stops_begin_running() {
        let sc = Scheduler::new();
        assert!(sc.request());
        sc.cancel_pending();
        assert!(!sc.begin_running());
    }
}
