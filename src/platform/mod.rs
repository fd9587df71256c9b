//! Platform gate. The real sampler needs `timer_create`/`SIGEV_THREAD_ID`
//! and POSIX per-thread CPU-time clocks, so it's only built for `unix`.
//! Everything else gets a one-shot-warning no-op so embedders targeting
//! other platforms can still link against this crate.

#[cfg(unix)]
mod real {
    pub use crate::controller::Controller;
}

#[cfg(unix)]
pub use real::Controller;

#[cfg(not(unix))]
mod stub {
    use std::sync::Once;

    use crate::config::Config;
    use crate::error::Result;
    use crate::frame::ThreadHandle;
    use crate::runtime::{CrashProtection, EventRecorder, ManagedRuntime, SymbolResolver};

    static WARNED: Once = Once::new();

    fn warn_once() {
        WARNED.call_once(|| {
            tracing::warn!(
                "cpu-time-sampler has no implementation on this platform; sampling is a no-op"
            );
        });
    }

    /// No-op stand-in for [`crate::controller::Controller`] on non-Unix
    /// targets: every call succeeds and does nothing, after a one-time
    /// warning.
    pub struct Controller<RT, RS, ER, CP> {
        _runtime: RT,
        _resolver: RS,
        _recorder: ER,
        _crash: CP,
    }

    impl<RT, RS, ER, CP> Controller<RT, RS, ER, CP>
    where
        RT: ManagedRuntime + 'static,
        RS: SymbolResolver,
        ER: EventRecorder,
        CP: CrashProtection,
    {
        pub fn new(runtime: RT, resolver: RS, recorder: ER, crash: CP, _config: Config) -> Self {
            Controller {
                _runtime: runtime,
                _resolver: resolver,
                _recorder: recorder,
                _crash: crash,
            }
        }

        pub fn set_period(&self, period_ms: u64) -> Result<()> {
            if period_ms != 0 {
                warn_once();
            }
            Ok(())
        }

        pub fn on_thread_create(&self, _thread: ThreadHandle) -> Result<()> {
            Ok(())
        }

        pub fn on_thread_terminate(&self, _thread: ThreadHandle) {}
    }
}

#[cfg(not(unix))]
pub use stub::Controller;
