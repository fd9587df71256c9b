//! Raw `sigaction(2)` installation and the monotonic clock read used to
//! timestamp slots. Both are called only from ordinary (non-handler)
//! context except `monotonic_now`, which the handler also calls; glibc's
//! vDSO-backed `clock_gettime` takes no lock and is treated as
//! async-signal-safe in practice by every sampling profiler that does
//! this, ours included.

use std::io;
use std::mem::MaybeUninit;

pub type Handler = extern "C" fn(i32, *mut libc::siginfo_t, *mut libc::c_void);

/// Installs `handler` for `signal` with `SA_SIGINFO | SA_RESTART`, all
/// signals of the process's own mask blocked while it runs.
pub fn install(signal: i32, handler: Handler) -> io::Result<()> {
    let mut sa: libc::sigaction = unsafe { MaybeUninit::zeroed().assume_init() };
    sa.sa_sigaction = handler as usize;
    sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
    unsafe {
        libc::sigemptyset(&mut sa.sa_mask);
    }

    let ret = unsafe { libc::sigaction(signal, &sa, std::ptr::null_mut()) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Restores the default disposition for `signal`.
pub fn uninstall(signal: i32) -> io::Result<()> {
    let ret = unsafe { libc::signal(signal, libc::SIG_DFL) };
    if ret == libc::SIG_ERR {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Nanoseconds on `CLOCK_MONOTONIC`. Handler-reachable.
pub fn monotonic_now() -> u64 {
    let mut ts: libc::timespec = unsafe { MaybeUninit::zeroed().assume_init() };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// The calling thread's kernel TID, used as `sigev_notify_thread_id`.
pub fn current_tid() -> libc::pid_t {
    unsafe { libc::syscall(libc::SYS_gettid) as libc::pid_t }
}
