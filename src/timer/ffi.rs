//! Thin wrappers over the raw POSIX timer syscalls. Each returns
//! `io::Result` via the same "check for -1, else `Error::last_os_error`"
//! pattern as the rest of this crate's FFI layer.

use std::io;
use std::mem::MaybeUninit;
use std::ptr;

/// `pthread_getcpuclockid(3)`: resolves the CPU-time clock ID for the
/// given native thread.
pub fn getcpuclockid(thread: libc::pthread_t) -> io::Result<libc::clockid_t> {
    let mut clock_id: libc::clockid_t = 0;
    let ret = unsafe { libc::pthread_getcpuclockid(thread, &mut clock_id) };
    if ret == 0 {
        Ok(clock_id)
    } else {
        Err(io::Error::from_raw_os_error(ret))
    }
}

/// `timer_create(2)`, bound to `signal` delivered via `SIGEV_THREAD_ID`
/// to `target_tid` (the Linux-specific `sigev_notify_thread_id` field).
pub fn create(
    clock_id: libc::clockid_t,
    signal: i32,
    target_tid: libc::pid_t,
) -> io::Result<libc::timer_t> {
    let mut sev: libc::sigevent = unsafe { MaybeUninit::zeroed().assume_init() };
    sev.sigev_notify = libc::SIGEV_THREAD_ID;
    sev.sigev_signo = signal;
    sev.sigev_notify_thread_id = target_tid;

    let mut timer: libc::timer_t = ptr::null_mut();
    let ret = unsafe { libc::timer_create(clock_id, &mut sev, &mut timer) };
    if ret == 0 {
        Ok(timer)
    } else {
        Err(io::Error::last_os_error())
    }
}

/// `timer_settime(2)`. `period` of zero arms a one-shot; any later
/// re-arm uses the same `period` for both initial expiry and interval so
/// sampling starts roughly `period` after the call rather than waiting
/// two full periods.
pub fn settime(timer: libc::timer_t, period: std::time::Duration) -> io::Result<()> {
    let spec = libc::itimerspec {
        it_interval: duration_to_timespec(period),
        it_value: duration_to_timespec(period),
    };
    let ret = unsafe { libc::timer_settime(timer, 0, &spec, ptr::null_mut()) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// `timer_delete(2)`.
pub fn delete(timer: libc::timer_t) -> io::Result<()> {
    let ret = unsafe { libc::timer_delete(timer) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn duration_to_timespec(d: std::time::Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}
