//! Shared handle to a connection and its scheduling state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

/// Nobody runs or waits to run a pass.
const IDLE: u8 = 0;
/// A pass is queued or running.
const SCHEDULED: u8 = 1;
/// A pass is queued or running and another one was requested meanwhile.
const RESCHEDULE: u8 = 2;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

fn now_millis() -> u64 {
    u64::try_from(EPOCH.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Work to apply to the connection in the next pass, left by a resume.
pub(crate) type Completion<C> = Box<dyn FnOnce(&mut C) + Send>;

struct Slot<C> {
    id: u64,
    connection: Mutex<C>,
    state: AtomicU8,
    idle: Notify,
    closed: AtomicBool,
    suspended: AtomicBool,
    last_active: AtomicU64,
    completion: Mutex<Option<Completion<C>>>,
}

/// A reference counted connection as it moves between a transport, the
/// dispatch queue and the workers.
///
/// Every pass over the connection has to be claimed with
/// [`schedule`](ConnectionRef::schedule) and given back with
/// [`release`](ConnectionRef::release). Claims made while a pass is in
/// flight don't start a second one, they make the running pass go around
/// once more instead, so passes over one connection never overlap and a
/// readiness signal arriving mid pass is never lost.
pub struct ConnectionRef<C> {
    slot: Arc<Slot<C>>,
}

impl<C> Clone for ConnectionRef<C> {
    fn clone(&self) -> Self {
        Self { slot: Arc::clone(&self.slot) }
    }
}

impl<C> ConnectionRef<C> {
    pub fn new(id: u64, connection: C) -> Self {
        Self {
            slot: Arc::new(Slot {
                id,
                connection: Mutex::new(connection),
                state: AtomicU8::new(IDLE),
                idle: Notify::new(),
                closed: AtomicBool::new(false),
                suspended: AtomicBool::new(false),
                last_active: AtomicU64::new(now_millis()),
                completion: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.slot.id
    }

    /// Claims the next pass.
    ///
    /// Returns `true` when the caller now owns the pass and must run or
    /// enqueue it, `false` when one is already in flight.
    pub fn schedule(&self) -> bool {
        let state = &self.slot.state;
        let mut current = state.load(Ordering::Acquire);
        loop {
            let next = match current {
                IDLE => SCHEDULED,
                SCHEDULED => RESCHEDULE,
                _ => return false,
            };
            match state.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return current == IDLE,
                Err(actual) => current = actual,
            }
        }
    }

    /// Gives a finished pass back.
    ///
    /// Returns `true` when another pass was requested while this one ran; the
    /// caller keeps ownership and must run it.
    pub fn release(&self) -> bool {
        let state = &self.slot.state;
        match state.compare_exchange(SCHEDULED, IDLE, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                self.slot.idle.notify_waiters();
                false
            }
            Err(_) => {
                state.store(SCHEDULED, Ordering::Release);
                true
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.slot.state.load(Ordering::Acquire) == IDLE
    }

    /// Resolves once the connection next becomes idle.
    ///
    /// Create it before dispatching a pass, then check
    /// [`is_idle`](ConnectionRef::is_idle) before awaiting it.
    pub fn idle_notified(&self) -> Notified<'_> {
        self.slot.idle.notified()
    }

    pub fn lock(&self) -> MutexGuard<'_, C> {
        self.slot.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, C>> {
        match self.slot.connection.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// The closed state seen by the last pass, readable without locking.
    pub fn is_closed(&self) -> bool {
        self.slot.closed.load(Ordering::Acquire)
    }

    /// Whether the last pass left the response suspended.
    pub fn is_suspended(&self) -> bool {
        self.slot.suspended.load(Ordering::Acquire)
    }

    pub(crate) fn record_state(&self, closed: bool, suspended: bool) {
        self.slot.closed.store(closed, Ordering::Release);
        self.slot.suspended.store(suspended, Ordering::Release);
        self.slot.last_active.store(now_millis(), Ordering::Release);
    }

    /// Time since the last pass over the connection ended.
    pub fn idle_for(&self) -> Duration {
        Duration::from_millis(now_millis().saturating_sub(self.slot.last_active.load(Ordering::Acquire)))
    }

    pub(crate) fn set_completion(&self, completion: Completion<C>) {
        *self.slot.completion.lock().unwrap_or_else(PoisonError::into_inner) = Some(completion);
    }

    pub(crate) fn take_completion(&self) -> Option<Completion<C>> {
        self.slot.completion.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl<C> fmt::Debug for ConnectionRef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRef")
            .field("id", &self.slot.id)
            .field("state", &self.slot.state.load(Ordering::Relaxed))
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_while_running_fold_into_one_rerun() {
        let conn = ConnectionRef::new(1, ());
        assert!(conn.schedule());
        assert!(!conn.schedule());
        assert!(!conn.schedule());

        assert!(conn.release());
        assert!(!conn.is_idle());
        assert!(!conn.release());
        assert!(conn.is_idle());
    }

    #[test]
    fn contended_claims_never_overlap_and_are_never_lost() {
        use std::sync::atomic::AtomicUsize;
        use std::thread;

        const THREADS: usize = 8;
        const CLAIMS: usize = 10_000;

        let conn = ConnectionRef::new(4, ());
        let requested = AtomicUsize::new(0);
        let served = AtomicUsize::new(0);
        let in_flight = AtomicUsize::new(0);
        let passes = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..CLAIMS {
                        requested.fetch_add(1, Ordering::SeqCst);
                        if !conn.schedule() {
                            continue;
                        }
                        loop {
                            assert_eq!(in_flight.fetch_add(1, Ordering::SeqCst), 0, "passes overlapped");
                            served.fetch_max(requested.load(Ordering::SeqCst), Ordering::SeqCst);
                            passes.fetch_add(1, Ordering::SeqCst);
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            if !conn.release() {
                                break;
                            }
                        }
                    }
                });
            }
        });

        assert!(conn.is_idle());
        // the last pass started after the last claim
        assert_eq!(served.load(Ordering::SeqCst), THREADS * CLAIMS);
        assert!(passes.load(Ordering::SeqCst) <= THREADS * CLAIMS);
    }

    #[test]
    fn idle_waiters_are_woken() {
        let conn = ConnectionRef::new(2, ());
        assert!(conn.schedule());

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let notified = conn.idle_notified();
        assert!(!conn.release());
        runtime.block_on(notified);
        assert!(conn.is_idle());
    }

    #[test]
    fn completion_is_taken_once() {
        let conn = ConnectionRef::new(3, 0u32);
        conn.set_completion(Box::new(|value: &mut u32| *value += 1));

        let completion = conn.take_completion().unwrap();
        completion(&mut *conn.lock());
        assert_eq!(*conn.lock(), 1);
        assert!(conn.take_completion().is_none());
    }
}
