//! Types shared between the signal handler and the consumer: raw frames,
//! the per-slot classification, and the opaque thread handle the runtime
//! hands back to us.

use std::ffi::c_void;

/// A single captured frame: an opaque method handle and a program counter
/// or bytecode index, exactly as the runtime's stack walker produced it.
///
/// Resolving `method_handle` to a stable method ID happens later, off the
/// signal-handler thread; see [`crate::runtime::SymbolResolver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawFrame {
    pub method_handle: usize,
    pub pc_or_bci: u64,
}

/// What kind of walk (if any) produced a slot's frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SampleKind {
    /// No walk was attempted, or the thread was in a transitional state.
    NoSample = 0,
    /// The thread was executing managed code at signal delivery.
    JavaSample = 1,
    /// The thread was executing native code at signal delivery.
    NativeSample = 2,
}

/// Per-slot error classification, recorded even on a successful sample
/// (`Ok`). A slot with a non-`Ok` error still produces an event, just with
/// an empty stacktrace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotError {
    Ok = 0,
    NoTrace,
    NoTopframe,
    JavaWalkFailed,
    NativeWalkFailed,
    NoTopMethod,
    NoLastJavaFrame,
}

/// The runtime-state tags a thread can be in when the timer fires.
///
/// `InVm` is intentionally unsampled: the upstream runtime this was
/// modeled on has a long-standing comment that walking while in VM code
/// causes "weird bugs", so it's folded into the transitional bucket here
/// rather than attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    InManaged,
    InNative,
    InVm,
    Transitioning,
    Blocked,
    New,
    Uninitialized,
}

impl ThreadState {
    /// Transitional states get no walk at all.
    pub fn is_transitional(self) -> bool {
        !matches!(self, ThreadState::InManaged | ThreadState::InNative)
    }
}

/// An opaque, runtime-owned identity for a managed thread.
///
/// The sampler never dereferences this; it's a correlation token the
/// runtime hands back through [`crate::runtime::ManagedRuntime`]. The
/// runtime is responsible for its validity for as long as it's reachable
/// via `current_thread_if_managed_and_safe` or `with_threads`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThreadHandle(pub *const c_void);

// SAFETY: a `ThreadHandle` is an opaque correlation token, never
// dereferenced by this crate; the runtime is responsible for any access
// it makes through the pointer it handed out.
unsafe impl Send for ThreadHandle {}
unsafe impl Sync for ThreadHandle {}

/// A signal-safe view of the `ucontext_t` passed to a `SA_SIGINFO` handler.
///
/// Only the runtime knows how to interpret it (register file layout is
/// architecture-specific); the sampler just forwards the raw pointer.
#[derive(Clone, Copy)]
pub struct SignalContext(pub(crate) *mut c_void);

impl SignalContext {
    /// The raw `ucontext_t*` as delivered to the signal handler.
    pub fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}
