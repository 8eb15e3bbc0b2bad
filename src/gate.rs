// =============================================================================
// gate.rs — THE ONE-LANE BRIDGE
// =============================================================================
//
// Every lookup spins up a full Chromium process, and a modest VPS can
// afford exactly one of those at a time before it starts swapping itself
// into oblivion. So the entire engine funnels through a single-capacity
// semaphore: one browser session in flight, everyone else cooperatively
// parked in the async waiting room.
//
// The permit is an RAII guard. Acquire-then-always-release is not a
// convention here, it's a type: drop the guard and the slot frees, no
// matter which early return, error arm, or timeout path dropped it. A
// manually paired release would eventually be skipped by somebody's
// refactor, and a leaked permit on a capacity-one gate deadlocks every
// future request forever. We do not gamble on "eventually".
//
// No FIFO promise. Waiters wake in whatever order tokio feels like, which
// is fine — correctness here is "at most one", not "first come first
// served".
// =============================================================================

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// The single-flight gate. Capacity is configurable for symmetry with the
/// rest of the config surface, but the resource model of this engine is
/// written for capacity 1 and startup logs a warning for anything else.
pub struct SessionGate {
    slots: Arc<Semaphore>,
    capacity: usize,
    /// How many times a permit has been handed out, for the metrics page.
    pub acquisitions: portable_atomic::AtomicU64,
}

/// Proof of admission. Holding one of these IS holding the slot; dropping
/// it on any path — success, error, timeout, panic unwind — returns the
/// slot to the gate exactly once.
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
}

impl SessionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity.max(1))),
            capacity: capacity.max(1),
            acquisitions: portable_atomic::AtomicU64::new(0),
        }
    }

    /// Wait (cooperatively — no spinning, no blocked threads) until a slot
    /// is free, then claim it.
    pub async fn acquire(&self) -> SlotGuard {
        let waiting_since = std::time::Instant::now();
        // The semaphore is never closed while the engine lives, so the only
        // error acquire_owned can return cannot happen here.
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .expect("session gate semaphore closed — the engine is being dismantled");

        self.acquisitions
            .fetch_add(1, portable_atomic::Ordering::Relaxed);
        debug!(
            waited_ms = waiting_since.elapsed().as_millis() as u64,
            "Session slot acquired"
        );
        SlotGuard { _permit: permit }
    }

    /// How many slots are free right now. Capacity minus this is the number
    /// of browsers currently chewing on the court site.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_guard_returns_slot_on_drop() {
        let gate = SessionGate::new(1);
        assert_eq!(gate.available(), 1);
        {
            let _guard = gate.acquire().await;
            assert_eq!(gate.available(), 0);
        }
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_second_acquire_waits_for_first() {
        let gate = Arc::new(SessionGate::new(1));
        let guard = gate.acquire().await;

        let gate2 = Arc::clone(&gate);
        let waiter = tokio::spawn(async move {
            let _g = gate2.acquire().await;
        });

        // The waiter cannot finish while we hold the slot.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.expect("waiter completes once the slot frees");
    }

    #[tokio::test]
    async fn test_capacity_zero_is_clamped_to_one() {
        // A zero-capacity gate would deadlock the whole engine at startup.
        let gate = SessionGate::new(0);
        assert_eq!(gate.capacity(), 1);
        let _guard = gate.acquire().await;
    }

    #[tokio::test]
    async fn test_many_waiters_all_eventually_pass() {
        let gate = Arc::new(SessionGate::new(1));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                let _g = gate.acquire().await;
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            }));
        }
        for h in handles {
            h.await.expect("no waiter deadlocks");
        }
        assert_eq!(gate.available(), 1);
        assert_eq!(
            gate.acquisitions.load(portable_atomic::Ordering::Relaxed),
            8
        );
    }
}
