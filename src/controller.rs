//! The public entry point: wires a [`ManagedRuntime`] and its companion
//! traits to the signal handler, the timer lifecycle, and the consumer
//! thread, and exposes the lifecycle operations the embedding runtime
//! drives (period changes, enrollment, thread creation/termination).

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::error::{Result, SamplerError};
use crate::frame::ThreadHandle;
use crate::pool::TracePool;
use crate::runtime::{CrashProtection, EventRecorder, ManagedRuntime, SymbolResolver};
use crate::signal::{self, SamplerCore};
use crate::sync::Ordering;
use crate::timer;

/// Owns the sampler's lifecycle. Expected to be built once and kept
/// alive for the life of the embedding process; `runtime` is leaked to
/// `'static` so the signal handler can reach it through a process-wide
/// global.
pub struct Controller<RT, RS, ER, CP>
where
    RT: ManagedRuntime + 'static,
    RS: SymbolResolver + Clone + Send + 'static,
    ER: EventRecorder + Clone + 'static,
    CP: CrashProtection + Clone + 'static,
{
    runtime: &'static RT,
    resolver: RS,
    recorder: ER,
    crash: CP,
    config: Config,
    consumer_started: Mutex<bool>,
}

impl<RT, RS, ER, CP> Controller<RT, RS, ER, CP>
where
    RT: ManagedRuntime + 'static,
    RS: SymbolResolver + Clone + Send + 'static,
    ER: EventRecorder + Clone + 'static,
    CP: CrashProtection + Clone + 'static,
{
    /// Leaks `runtime` to `'static`; see the struct's doc comment for why.
    pub fn new(runtime: RT, resolver: RS, recorder: ER, crash: CP, config: Config) -> Self {
        let runtime: &'static RT = Box::leak(Box::new(runtime));
        Controller {
            runtime,
            resolver,
            recorder,
            crash,
            config,
            consumer_started: Mutex::new(false),
        }
    }

    /// Sets the sampling period. `0` disenrolls the sampler entirely;
    /// any other value enrolls it if not already enrolled, or re-arms
    /// every existing timer with the new period otherwise.
    #[instrument(skip(self), fields(period_ms))]
    pub fn set_period(&self, period_ms: u64) -> Result<()> {
        if period_ms == 0 {
            return self.disenroll();
        }

        if signal::core().is_none() {
            self.build_core(period_ms)?;
        }
        let core = signal::core().expect("just built");
        core.period_ns.store(period_ms * 1_000_000, Ordering::Relaxed);

        if core.disenrolled.load(Ordering::Acquire) {
            self.enroll(period_ms)
        } else {
            self.rearm_all(period_ms);
            Ok(())
        }
    }

    fn build_core(&self, period_ms: u64) -> Result<()> {
        let num_processors = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let capacity = self.config.queue_cap(period_ms, num_processors);

        let pool = TracePool::new(capacity, self.config.max_frames);
        let core = SamplerCore::new(pool, period_ms * 1_000_000, self.config.signal);
        signal::init_core(core);
        let runtime: &'static dyn ManagedRuntime = self.runtime;
        signal::init_runtime(runtime);

        info!(capacity, signal = self.config.signal, "trace pool built");
        self.start_consumer_once();
        Ok(())
    }

    fn start_consumer_once(&self) {
        let mut started = self.consumer_started.lock();
        if *started {
            return;
        }
        let runtime = self.runtime;
        let resolver = self.resolver.clone();
        let recorder = self.recorder.clone();
        let crash = self.crash.clone();
        let max_batch = self.config.max_batch;
        std::thread::Builder::new()
            .name("cpu-time-sampler-consumer".into())
            .spawn(move || crate::consumer::run(runtime, resolver, recorder, crash, max_batch))
            .expect("failed to spawn the sampler consumer thread");
        *started = true;
    }

    /// Enrollment: installs the signal handler (first call only) and
    /// arms a timer for every managed thread the runtime currently
    /// knows about.
    #[instrument(skip(self))]
    fn enroll(&self, period_ms: u64) -> Result<()> {
        let core = signal::core().ok_or(SamplerError::NotEnrolled)?;

        signal::install_handler(core.signal, crate::signal::sigprof_handler)
            .map_err(SamplerError::SignalHandlerInstall)?;

        let period = Duration::from_millis(period_ms);
        let mut first_err = None;
        self.runtime.with_threads(&mut |thread| {
            if self.runtime.is_compiler_thread(thread) {
                return;
            }
            if let Err(e) = self.arm_one(thread, period) {
                warn!(?e, "failed to arm timer for thread during enroll");
                first_err.get_or_insert(e);
            }
        });

        core.disenrolled.store(false, Ordering::Release);
        core.sem.release();

        if let Some(e) = first_err {
            return Err(e);
        }
        Ok(())
    }

    /// Disenrollment: delete every timer, block new handler invocations,
    /// drain in-flight ones, take the consumer's semaphore down, then
    /// reset queue state.
    #[instrument(skip(self))]
    fn disenroll(&self) -> Result<()> {
        let Some(core) = signal::core() else {
            return Ok(());
        };
        if core.disenrolled.load(Ordering::Acquire) {
            return Ok(());
        }

        // 1. delete every timer first, so no new signal can be queued.
        self.runtime.with_threads(&mut |thread| {
            let slot = self.runtime.timer_slot(thread);
            if let Err(e) = timer::delete(slot) {
                warn!(?e, "failed to delete timer during disenroll");
            }
        });

        // 2. stop any signal still in flight from proceeding past its
        // first check.
        core.drain_gate.begin_drain();

        // 3. busy-drain handlers that were already past that check when
        // we set the flag.
        core.drain_gate.wait_drained(|| std::thread::sleep(Duration::from_micros(1)));

        // 4. take the consumer's semaphore down; its next loop iteration
        // blocks here until a future enroll releases it. This alone only
        // guarantees the *next* iteration blocks — an iteration that had
        // already taken the permit before we did may still be touching
        // the pool, so wait for `consumer_busy` to clear before step 5.
        core.sem.acquire();
        while core.consumer_busy.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_micros(1));
        }

        // 5. mark disenrolled and reset both queues: every slot back on
        // free, filled cleared. Safe because every handler has drained
        // and the consumer is blocked on the semaphore taken in step 4.
        core.disenrolled.store(true, Ordering::Release);
        core.pool.reset();
        core.drop_count.store(0, Ordering::Relaxed);

        // 6. clear the flag that gated step 1 so a future enroll's
        // handler invocations aren't immediately dropped.
        core.drain_gate.end_drain();

        Ok(())
    }

    fn rearm_all(&self, period_ms: u64) {
        let period = Duration::from_millis(period_ms);
        self.runtime.with_threads(&mut |thread| {
            if self.runtime.is_compiler_thread(thread) {
                return;
            }
            let slot = self.runtime.timer_slot(thread);
            if let Err(e) = timer::rearm(slot, period) {
                warn!(?e, "failed to rearm timer on period change");
            }
        });
    }

    fn arm_one(&self, thread: ThreadHandle, period: Duration) -> Result<()> {
        let clock_id = self
            .runtime
            .per_thread_cpu_clock(thread)
            .map_err(SamplerError::ClockUnavailable)?;
        let slot = self.runtime.timer_slot(thread);
        let tid = self.runtime.os_tid(thread);
        timer::arm(slot, clock_id, self.config.signal, tid, period)
    }

    /// Called by the embedding runtime when a new managed thread starts.
    /// No-op unless the sampler is currently enrolled.
    pub fn on_thread_create(&self, thread: ThreadHandle) -> Result<()> {
        let Some(core) = signal::core() else {
            return Ok(());
        };
        if core.disenrolled.load(Ordering::Acquire) || self.runtime.is_compiler_thread(thread) {
            return Ok(());
        }
        let period_ms = core.period_ns.load(Ordering::Relaxed) / 1_000_000;
        self.arm_one(thread, Duration::from_millis(period_ms))
    }

    /// Called by the embedding runtime just before a managed thread
    /// exits. Deletes its timer if one exists; a no-op timer slot is
    /// harmless.
    pub fn on_thread_terminate(&self, thread: ThreadHandle) {
        let slot = self.runtime.timer_slot(thread);
        if let Err(e) = timer::delete(slot) {
            warn!(?e, "failed to delete timer on thread termination");
        }
    }
}
