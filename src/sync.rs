//! Atomic primitives used by [`crate::signal`]'s handler-reachable state.
//!
//! Built against `loom`'s shadow atomics under `--cfg loom` so the
//! disenroll-drain protocol (`stop_signals` / `active_handlers`) can be
//! model-checked; real atomics otherwise. `crossbeam_queue::ArrayQueue`
//! itself isn't loom-instrumented, so the trace pool's queues are out of
//! scope for this and are tested the ordinary way instead.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
