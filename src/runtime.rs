//! The seams the embedding runtime plugs into.
//!
//! [`ManagedRuntime`] is reachable from the signal handler, so it must be
//! object-safe: no generic methods, no associated types, nothing that
//! would need per-type monomorphization of a function registered once
//! with `sigaction`. [`SymbolResolver`], [`EventRecorder`] and
//! [`CrashProtection`] are only ever touched from the consumer thread and
//! the controller, so they stay as ordinary type parameters on
//! [`crate::controller::Controller`].

use std::io;

use crate::frame::{RawFrame, SignalContext, ThreadHandle, ThreadState};
use crate::timer::TimerSlot;

/// Everything the sampler needs from the embedding runtime to take a
/// sample. Implementors must be safe to call from inside a `SA_SIGINFO`
/// handler for every method documented as handler-reachable below.
pub trait ManagedRuntime: Send + Sync {
    /// Returns the calling OS thread's managed-thread identity, or
    /// `None` if the calling thread has none, is exiting, or is
    /// otherwise unsafe to touch. Called from the signal handler.
    fn current_thread_if_managed_and_safe(&self) -> Option<ThreadHandle>;

    /// Called from the signal handler.
    fn thread_state(&self, thread: ThreadHandle) -> ThreadState;

    /// Whether `thread` is currently inside a deoptimization handler;
    /// such a thread is skipped even if otherwise `InManaged`. Called
    /// from the signal handler.
    fn is_deopt_handler_active(&self, thread: ThreadHandle) -> bool;

    /// Whether a stop-the-world GC safepoint is in effect process-wide.
    /// Called from the signal handler.
    fn is_stw_gc_active(&self) -> bool;

    /// Marks (or clears) that `thread` is currently being walked
    /// asynchronously, so the runtime's own safepoint/deopt machinery can
    /// avoid racing with the walk. Called from the signal handler.
    fn set_in_async_stack_trace(&self, thread: ThreadHandle, value: bool);

    /// Recovers the top frame from the interrupted thread's register
    /// state. Called from the signal handler.
    fn top_frame_from_signal_context(
        &self,
        thread: ThreadHandle,
        ctx: &SignalContext,
    ) -> Option<RawFrame>;

    /// Walks the managed call stack starting at `top`, writing into
    /// `out` and returning the number of frames written, or `None` if the
    /// walk failed partway through. Called from the signal handler.
    fn async_stack_walker(
        &self,
        thread: ThreadHandle,
        top: RawFrame,
        out: &mut [RawFrame],
    ) -> Option<usize>;

    /// The last managed frame recorded for `thread`, used as a
    /// last-resort single-frame sample when the full walk can't run.
    /// Called from the signal handler.
    fn last_managed_frame(&self, thread: ThreadHandle) -> Option<RawFrame>;

    /// The first managed frame beneath a native top frame, used when the
    /// thread was sampled while executing native code. Called from the
    /// signal handler.
    fn first_managed_frame_below(
        &self,
        thread: ThreadHandle,
        top: RawFrame,
    ) -> Option<RawFrame>;

    /// Whether `frame` resolves to a method the runtime can describe.
    /// Called from the signal handler.
    fn has_resolvable_method(&self, frame: RawFrame) -> bool;

    /// Whether `thread` is one of the runtime's own compiler threads,
    /// which are never sampled. Called from the controller, not the
    /// handler.
    fn is_compiler_thread(&self, thread: ThreadHandle) -> bool;

    /// The slot the runtime reserves in its own per-thread structure for
    /// this sampler's OS timer handle; the sampler keeps no separate
    /// handle table of its own.
    fn timer_slot(&self, thread: ThreadHandle) -> &TimerSlot;

    /// Resolves the CPU-time clock ID for `thread`, e.g. via
    /// `pthread_getcpuclockid`.
    fn per_thread_cpu_clock(&self, thread: ThreadHandle) -> io::Result<libc::clockid_t>;

    /// The kernel TID of `thread`'s underlying OS thread, used as
    /// `sigev_notify_thread_id` when arming its timer. Must remain
    /// correct for threads other than the caller, since the controller
    /// arms timers from its own thread while iterating `with_threads`.
    fn os_tid(&self, thread: ThreadHandle) -> libc::pid_t;

    /// A stable identifier for `thread` suitable for attaching to an
    /// emitted event. May be called under crash protection, since it can
    /// touch runtime-owned thread-local state.
    fn thread_id_for_event(&self, thread: ThreadHandle) -> u64;

    /// Invokes `f` once for every managed thread currently known to the
    /// runtime. Used by the controller to (re)arm or delete timers; never
    /// called from the signal handler.
    fn with_threads(&self, f: &mut dyn FnMut(ThreadHandle));
}

/// Resolves raw frames to stable, interned stacktrace identifiers, and
/// owns whatever scratch storage that requires.
pub trait SymbolResolver: Send + Sync {
    type Buffer: Send;

    /// Returns a buffer with at least `min_size` capacity, reusing
    /// `current` if it already satisfies that, otherwise allocating a
    /// replacement.
    fn get_or_renew_buffer(&self, current: Option<Self::Buffer>, min_size: usize) -> Self::Buffer;

    /// Interns `frames` and returns `(stacktrace_id, resolved_count)`.
    fn store(&self, frames: &[RawFrame], buffer: &mut Self::Buffer) -> (u64, usize);
}

/// Emits the two event kinds the sampler produces.
pub trait EventRecorder: Send + Sync {
    fn is_execution_sample_enabled(&self) -> bool;
    fn is_drop_event_enabled(&self) -> bool;

    fn emit_execution_sample(
        &self,
        thread_id: u64,
        stacktrace_id: u64,
        sample_kind: crate::frame::SampleKind,
        error: crate::frame::SlotError,
        start_ns: u64,
        end_ns: u64,
    );

    fn emit_drop_event(&self, dropped: u64, at_ns: u64);
}

/// Wraps a closure so that a synchronous memory-access fault raised
/// while it runs (e.g. touching a runtime thread-local that's mid-teardown)
/// is caught rather than taking down the consumer thread.
pub trait CrashProtection: Send + Sync {
    fn protect<T>(&self, f: impl FnOnce() -> T) -> Option<T>;
}
