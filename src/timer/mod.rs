//! Per-thread CPU-time timer lifecycle.
//!
//! The sampler keeps no handle table of its own: each timer's handle
//! lives in a [`TimerSlot`] the runtime embeds in its own per-thread
//! structure, reached via
//! [`crate::runtime::ManagedRuntime::timer_slot`].

mod ffi;

use std::io;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, SamplerError};

/// Opaque storage for one thread's OS timer handle. The runtime embeds
/// this in its own per-thread record and never inspects its contents.
pub struct TimerSlot(Mutex<Option<libc::timer_t>>);

impl TimerSlot {
    pub const fn new() -> Self {
        TimerSlot(Mutex::new(None))
    }
}

impl Default for TimerSlot {
    fn default() -> Self {
        Self::new()
    }
}

// A `timer_t` is just an opaque kernel handle (an index or pointer into
// kernel timer tables, depending on libc); moving it across threads is
// sound, only ever accessed behind the slot's mutex.
unsafe impl Send for TimerSlot {}
unsafe impl Sync for TimerSlot {}

/// Creates and arms a CPU-time timer for `target_tid`, storing the
/// handle in `slot`. No-op (returns `Ok`) if a timer already exists.
pub fn arm(
    slot: &TimerSlot,
    clock_id: libc::clockid_t,
    signal: i32,
    target_tid: libc::pid_t,
    period: Duration,
) -> Result<()> {
    let mut guard = slot.0.lock();
    if guard.is_some() {
        return Ok(());
    }
    let timer = ffi::create(clock_id, signal, target_tid).map_err(SamplerError::TimerCreate)?;
    if let Err(e) = ffi::settime(timer, period) {
        let _ = ffi::delete(timer);
        return Err(SamplerError::TimerSet(e));
    }
    *guard = Some(timer);
    Ok(())
}

/// Re-arms an existing timer with a new period. No-op if no timer
/// exists for this slot (the thread isn't enrolled).
pub fn rearm(slot: &TimerSlot, period: Duration) -> Result<()> {
    let guard = slot.0.lock();
    match *guard {
        Some(timer) => ffi::settime(timer, period).map_err(SamplerError::TimerSet),
        None => Ok(()),
    }
}

/// Deletes the timer stored in `slot`, if any, leaving it empty.
pub fn delete(slot: &TimerSlot) -> io::Result<()> {
    let mut guard = slot.0.lock();
    if let Some(timer) = guard.take() {
        ffi::delete(timer)?;
    }
    Ok(())
}

pub fn getcpuclockid(thread: libc::pthread_t) -> io::Result<libc::clockid_t> {
    ffi::getcpuclockid(thread)
}
