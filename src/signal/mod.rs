//! The signal handler and the global state it's allowed to touch.
//!
//! Everything reachable from [`sigprof_handler`] is either a plain
//! atomic or a pointer into memory preallocated at pool-build time. No
//! allocation, no lock acquisition (other than the uncontended,
//! non-blocking timer-slot mutex taken elsewhere, never from here), and
//! no call into a function that isn't documented async-signal-safe.

mod ffi;

use std::sync::OnceLock;

use parking_lot::{Condvar, Mutex};

use crate::frame::{SampleKind, SignalContext, SlotError, ThreadState};
use crate::pool::TracePool;
use crate::runtime::ManagedRuntime;
use crate::sync::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

pub use ffi::{current_tid, install as install_handler, monotonic_now, uninstall as uninstall_handler, Handler};

/// A binary-ish semaphore used to let the controller block the consumer
/// loop exactly once, without missed wakeups or busy polling.
///
/// The consumer does `acquire(); release();` every iteration, so the
/// permit count is 1 whenever it's running. `acquire()` from the
/// controller's disenroll path consumes that permit without replacing
/// it, so the consumer's next `acquire()` blocks until `release()` is
/// called again from enroll.
pub struct Semaphore {
    permits: Mutex<u32>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Semaphore {
            permits: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }

    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.cv.wait(&mut permits);
        }
        *permits -= 1;
    }

    pub fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.cv.notify_one();
    }
}

/// Coordinates the signal handler's entry/exit with a disenroll in
/// progress: new invocations bail out at `try_enter` once a drain has
/// begun, and the draining thread busy-waits only for invocations that
/// got in before that point.
pub(crate) struct DrainGate {
    stop_signals: AtomicBool,
    active_handlers: AtomicUsize,
}

impl DrainGate {
    fn new() -> Self {
        DrainGate {
            stop_signals: AtomicBool::new(false),
            active_handlers: AtomicUsize::new(0),
        }
    }

    /// Called first thing in the signal handler. Returns `None` if a
    /// drain is in progress, in which case the handler must return
    /// immediately without touching anything else.
    fn try_enter(&self) -> Option<ActiveGuard<'_>> {
        if self.stop_signals.load(Ordering::Acquire) {
            return None;
        }
        Some(ActiveGuard::enter(&self.active_handlers))
    }

    /// Stops new handler invocations from proceeding past `try_enter`.
    pub(crate) fn begin_drain(&self) {
        self.stop_signals.store(true, Ordering::Release);
    }

    /// Busy-waits, calling `backoff` between polls, for every handler
    /// invocation already past `try_enter` to finish.
    pub(crate) fn wait_drained(&self, mut backoff: impl FnMut()) {
        while self.active_handlers.load(Ordering::Acquire) > 0 {
            backoff();
        }
    }

    /// Allows new handler invocations through `try_enter` again.
    pub(crate) fn end_drain(&self) {
        self.stop_signals.store(false, Ordering::Release);
    }
}

/// Process-wide sampler state, built once at first enrollment and never
/// rebuilt afterwards (only its atomics and queues change across
/// enroll/disenroll cycles).
pub struct SamplerCore {
    pub pool: TracePool,
    pub period_ns: AtomicU64,
    pub(crate) drain_gate: DrainGate,
    pub disenrolled: AtomicBool,
    /// Set by the consumer for the duration of each iteration's pool
    /// access, so disenroll can confirm the iteration that already took
    /// the semaphore's permit before disenroll did has finished, rather
    /// than assuming the next `acquire()` is the one that blocks.
    pub consumer_busy: AtomicBool,
    /// Drops since the last time the consumer emitted a drop event;
    /// reset to zero each time that event is emitted.
    pub drop_count: AtomicU64,
    /// Drops over the sampler's entire lifetime; never reset.
    pub cumulative_drop_count: AtomicU64,
    pub sem: Semaphore,
    pub signal: i32,
}

impl SamplerCore {
    pub fn new(pool: TracePool, period_ns: u64, signal: i32) -> Self {
        SamplerCore {
            pool,
            period_ns: AtomicU64::new(period_ns),
            drain_gate: DrainGate::new(),
            disenrolled: AtomicBool::new(true),
            consumer_busy: AtomicBool::new(false),
            drop_count: AtomicU64::new(0),
            cumulative_drop_count: AtomicU64::new(0),
            sem: Semaphore::new(0),
            signal,
        }
    }

    /// Records one dropped sample in both the interval and cumulative
    /// counters. Called from the signal handler on a full free queue or
    /// a (normally unreachable) full filled queue.
    fn record_drop(&self) {
        self.drop_count.fetch_add(1, Ordering::Relaxed);
        self.cumulative_drop_count.fetch_add(1, Ordering::Relaxed);
    }
}

static CORE: OnceLock<SamplerCore> = OnceLock::new();
static RUNTIME: OnceLock<&'static dyn ManagedRuntime> = OnceLock::new();

/// Installs the process-wide state. Must happen before the handler is
/// installed and before any timer is armed; idempotent calls after the
/// first are rejected by `OnceLock` and ignored.
pub fn init_core(core: SamplerCore) -> &'static SamplerCore {
    CORE.get_or_init(|| core)
}

pub fn init_runtime(runtime: &'static dyn ManagedRuntime) {
    let _ = RUNTIME.set(runtime);
}

pub fn core() -> Option<&'static SamplerCore> {
    CORE.get()
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        ActiveGuard(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The sampling signal handler. Registered once via `sigaction` with
/// `SA_SIGINFO`; fires on the real-time signal `CORE.signal` delivered to
/// a specific thread via `SIGEV_THREAD_ID`.
pub extern "C" fn sigprof_handler(_sig: i32, _info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
    let Some(core) = CORE.get() else { return };

    // Bail immediately if a disenroll is in flight; otherwise register
    // as an in-flight handler so its busy-drain sees us. Dropped (and
    // deregistered) on every return path below.
    let Some(_guard) = core.drain_gate.try_enter() else {
        return;
    };

    let Some(runtime) = RUNTIME.get().copied() else {
        return;
    };

    let Some(thread) = runtime.current_thread_if_managed_and_safe() else {
        return;
    };

    let Some(slot_ptr) = core.pool.free.pop() else {
        core.record_drop();
        return;
    };

    // SAFETY: this pointer came off the free queue, so nothing else
    // holds it; it stays ours until we push it onto `filled` below.
    let slot = unsafe { &mut *slot_ptr };
    slot.reset_for_fill(thread, monotonic_now());

    // GC/deopt/transitional only decide whether to attempt the walk;
    // the slot still reaches `filled` as a `NoSample` either way, so it
    // is committed as an event rather than dropped on the floor.
    let state = runtime.thread_state(thread);
    let skip_walk =
        runtime.is_stw_gc_active() || runtime.is_deopt_handler_active(thread) || state.is_transitional();

    if !skip_walk {
        runtime.set_in_async_stack_trace(thread, true);
        let sig_ctx = SignalContext(ctx);
        match state {
            ThreadState::InManaged => fill_java_sample(runtime, thread, &sig_ctx, slot),
            ThreadState::InNative => fill_native_sample(runtime, thread, &sig_ctx, slot),
            _ => unreachable!("transitional states are skipped above"),
        }
        runtime.set_in_async_stack_trace(thread, false);
    }

    slot.set_end_ns(monotonic_now());

    if core.pool.filled.push(slot_ptr).is_err() {
        // Should be unreachable (filled and free are sized identically
        // and a slot is never on both at once), but never leak a slot.
        core.record_drop();
        let _ = core.pool.free.push(slot_ptr);
    }
}

fn fill_java_sample(
    runtime: &dyn ManagedRuntime,
    thread: crate::frame::ThreadHandle,
    ctx: &SignalContext,
    slot: &mut crate::pool::Slot,
) {
    slot.set_kind(SampleKind::JavaSample);

    let Some(top) = runtime.top_frame_from_signal_context(thread, ctx) else {
        slot.set_frame_count(0);
        slot.set_error(SlotError::NoTopframe);
        return;
    };

    let cap = slot.capacity();
    let frames = slot.frames_mut();
    match runtime.async_stack_walker(thread, top, &mut frames[..cap]) {
        Some(n) if n > 0 => {
            slot.set_frame_count(n);
            slot.set_error(SlotError::Ok);
        }
        _ => {
            slot.set_frame_count(0);
            slot.set_error(SlotError::JavaWalkFailed);
        }
    }
}

fn fill_native_sample(
    runtime: &dyn ManagedRuntime,
    thread: crate::frame::ThreadHandle,
    ctx: &SignalContext,
    slot: &mut crate::pool::Slot,
) {
    slot.set_kind(SampleKind::NativeSample);

    if runtime.last_managed_frame(thread).is_none() {
        slot.set_frame_count(0);
        slot.set_error(SlotError::NoLastJavaFrame);
        return;
    }

    let Some(top) = runtime.top_frame_from_signal_context(thread, ctx) else {
        slot.set_frame_count(0);
        slot.set_error(SlotError::NoTopframe);
        return;
    };

    match runtime.first_managed_frame_below(thread, top) {
        Some(frame) if runtime.has_resolvable_method(frame) => {
            slot.frames_mut()[0] = frame;
            slot.set_frame_count(1);
            slot.set_error(SlotError::Ok);
        }
        Some(_) => {
            slot.set_frame_count(0);
            slot.set_error(SlotError::NoTopMethod);
        }
        None => {
            slot.set_frame_count(0);
            slot.set_error(SlotError::NativeWalkFailed);
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::DrainGate;

    #[test]
    fn entry_after_drain_begins_is_refused() {
        let gate = DrainGate::new();
        let guard = gate.try_enter();
        assert!(guard.is_some());
        drop(guard);

        gate.begin_drain();
        assert!(gate.try_enter().is_none());

        gate.end_drain();
        assert!(gate.try_enter().is_some());
    }
}

#[cfg(loom)]
mod loom_tests {
    use std::sync::Arc;

    use super::DrainGate;

    /// Models a handler entering concurrently with a disenroll beginning
    /// its drain: every interleaving must still converge on
    /// `wait_drained` seeing zero once the handler that got in has
    /// dropped its guard.
    #[test]
    fn drain_waits_for_in_flight_handler() {
        loom::model(|| {
            let gate = Arc::new(DrainGate::new());

            let handler_gate = gate.clone();
            let handler = loom::thread::spawn(move || {
                if let Some(guard) = handler_gate.try_enter() {
                    loom::thread::yield_now();
                    drop(guard);
                }
            });

            gate.begin_drain();
            gate.wait_drained(loom::thread::yield_now);

            handler.join().unwrap();
            assert_eq!(
                gate.active_handlers.load(crate::sync::Ordering::Acquire),
                0
            );
        });
    }
}
