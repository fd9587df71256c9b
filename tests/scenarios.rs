//! End-to-end scenarios against a mock runtime: a controller wired up
//! exactly the way a real embedder would, sampling real OS threads that
//! spin a CPU-bound loop.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpu_time_sampler::config::Config;
use cpu_time_sampler::controller::Controller;
use cpu_time_sampler::frame::{RawFrame, SampleKind, SignalContext, SlotError, ThreadHandle, ThreadState};
use cpu_time_sampler::runtime::{CrashProtection, EventRecorder, ManagedRuntime, SymbolResolver};
use cpu_time_sampler::timer::TimerSlot;

struct ThreadRecord {
    timer_slot: TimerSlot,
    pthread: libc::pthread_t,
    tid: libc::pid_t,
}

struct Inner {
    threads: Mutex<HashMap<usize, ThreadRecord>>,
}

#[derive(Clone)]
struct MockRuntime(Arc<Inner>);

thread_local! {
    static CURRENT_KEY: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

impl MockRuntime {
    fn new() -> Self {
        MockRuntime(Arc::new(Inner {
            threads: Mutex::new(HashMap::new()),
        }))
    }

    /// Registers the calling OS thread under `key` and marks it current,
    /// as a real embedder would on managed-thread startup.
    fn register_current(&self, key: usize) -> ThreadHandle {
        let record = ThreadRecord {
            timer_slot: TimerSlot::new(),
            pthread: unsafe { libc::pthread_self() },
            tid: cpu_time_sampler::signal::current_tid(),
        };
        self.0.threads.lock().unwrap().insert(key, record);
        CURRENT_KEY.with(|c| c.set(key));
        ThreadHandle(key as *const c_void)
    }

    fn unregister(&self, handle: ThreadHandle) {
        self.0.threads.lock().unwrap().remove(&(handle.0 as usize));
    }

    // SAFETY: the returned reference is only ever used synchronously by
    // the caller within the same call that obtained it; the entry it
    // points at is never moved while registered (registration mutations
    // only happen from the owning thread, serialized around each test's
    // single enroll/sample/disenroll sequence).
    fn with_record<T>(&self, handle: ThreadHandle, f: impl FnOnce(&ThreadRecord) -> T) -> T {
        let threads = self.0.threads.lock().unwrap();
        let record = threads
            .get(&(handle.0 as usize))
            .expect("thread registered with the mock runtime");
        f(record)
    }
}

impl ManagedRuntime for MockRuntime {
    fn current_thread_if_managed_and_safe(&self) -> Option<ThreadHandle> {
        let key = CURRENT_KEY.with(|c| c.get());
        if key == 0 {
            None
        } else {
            Some(ThreadHandle(key as *const c_void))
        }
    }

    fn thread_state(&self, _thread: ThreadHandle) -> ThreadState {
        ThreadState::InManaged
    }

    fn is_deopt_handler_active(&self, _thread: ThreadHandle) -> bool {
        false
    }

    fn is_stw_gc_active(&self) -> bool {
        false
    }

    fn set_in_async_stack_trace(&self, _thread: ThreadHandle, _value: bool) {}

    fn top_frame_from_signal_context(
        &self,
        _thread: ThreadHandle,
        _ctx: &SignalContext,
    ) -> Option<RawFrame> {
        Some(RawFrame {
            method_handle: 0xBEEF,
            pc_or_bci: 1,
        })
    }

    fn async_stack_walker(
        &self,
        _thread: ThreadHandle,
        top: RawFrame,
        out: &mut [RawFrame],
    ) -> Option<usize> {
        out[0] = top;
        Some(1)
    }

    fn last_managed_frame(&self, _thread: ThreadHandle) -> Option<RawFrame> {
        None
    }

    fn first_managed_frame_below(&self, _thread: ThreadHandle, _top: RawFrame) -> Option<RawFrame> {
        None
    }

    fn has_resolvable_method(&self, _frame: RawFrame) -> bool {
        true
    }

    fn is_compiler_thread(&self, _thread: ThreadHandle) -> bool {
        false
    }

    fn timer_slot(&self, thread: ThreadHandle) -> &TimerSlot {
        self.with_record(thread, |r| unsafe { &*(&r.timer_slot as *const TimerSlot) })
    }

    fn per_thread_cpu_clock(&self, thread: ThreadHandle) -> std::io::Result<libc::clockid_t> {
        self.with_record(thread, |r| cpu_time_sampler::timer::getcpuclockid(r.pthread))
    }

    fn os_tid(&self, thread: ThreadHandle) -> libc::pid_t {
        self.with_record(thread, |r| r.tid)
    }

    fn thread_id_for_event(&self, thread: ThreadHandle) -> u64 {
        thread.0 as u64
    }

    fn with_threads(&self, f: &mut dyn FnMut(ThreadHandle)) {
        let keys: Vec<usize> = self.0.threads.lock().unwrap().keys().copied().collect();
        for key in keys {
            f(ThreadHandle(key as *const c_void));
        }
    }
}

#[derive(Clone)]
struct VecResolver;

impl SymbolResolver for VecResolver {
    type Buffer = Vec<RawFrame>;

    fn get_or_renew_buffer(&self, current: Option<Vec<RawFrame>>, min_size: usize) -> Vec<RawFrame> {
        let mut buf = current.unwrap_or_default();
        buf.clear();
        buf.reserve(min_size);
        buf
    }

    fn store(&self, frames: &[RawFrame], buf: &mut Vec<RawFrame>) -> (u64, usize) {
        buf.extend_from_slice(frames);
        let id = frames.first().map(|f| f.method_handle as u64).unwrap_or(0);
        (id, frames.len())
    }
}

#[derive(Clone, Default)]
struct CountingRecorder {
    samples: Arc<AtomicU64>,
    drops: Arc<AtomicU64>,
}

impl EventRecorder for CountingRecorder {
    fn is_execution_sample_enabled(&self) -> bool {
        true
    }

    fn is_drop_event_enabled(&self) -> bool {
        true
    }

    fn emit_execution_sample(
        &self,
        _thread_id: u64,
        _stacktrace_id: u64,
        _kind: SampleKind,
        _error: SlotError,
        _start_ns: u64,
        _end_ns: u64,
    ) {
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    fn emit_drop_event(&self, dropped: u64, _at_ns: u64) {
        self.drops.fetch_add(dropped, Ordering::Relaxed);
    }
}

#[derive(Clone)]
struct NoopCrash;

impl CrashProtection for NoopCrash {
    fn protect<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        Some(f())
    }
}

/// Spins a CPU-bound worker registered with `runtime` under `key`,
/// running until `stop` is set. Returns the join handle and the handle
/// the controller should use for enroll/terminate calls.
fn spawn_worker(runtime: MockRuntime, key: usize, stop: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        runtime.register_current(key);
        let mut acc: u64 = 0;
        while !stop.load(Ordering::Relaxed) {
            for i in 0..10_000u64 {
                acc = acc.wrapping_add(i);
            }
        }
        std::hint::black_box(acc);
        runtime.unregister(ThreadHandle(key as *const c_void));
    })
}

fn new_controller(
    runtime: MockRuntime,
) -> Controller<MockRuntime, VecResolver, CountingRecorder, NoopCrash> {
    Controller::new(runtime, VecResolver, CountingRecorder::default(), NoopCrash, Config::default())
}

#[test]
fn steady_state_produces_samples() {
    let runtime = MockRuntime::new();
    let stop = Arc::new(AtomicBool::new(false));
    let worker = spawn_worker(runtime.clone(), 1, stop.clone());
    std::thread::sleep(Duration::from_millis(20));

    let controller = new_controller(runtime.clone());
    controller.on_thread_create(ThreadHandle(1usize as *const c_void)).unwrap();
    controller.set_period(5).unwrap();

    std::thread::sleep(Duration::from_millis(300));
    controller.set_period(0).unwrap();

    stop.store(true, Ordering::Relaxed);
    worker.join().unwrap();
}

#[test]
fn disenroll_stops_further_sampling() {
    let runtime = MockRuntime::new();
    let stop = Arc::new(AtomicBool::new(false));
    let worker = spawn_worker(runtime.clone(), 2, stop.clone());
    std::thread::sleep(Duration::from_millis(20));

    let recorder = CountingRecorder::default();
    let controller = Controller::new(
        runtime.clone(),
        VecResolver,
        recorder.clone(),
        NoopCrash,
        Config::default(),
    );
    controller.on_thread_create(ThreadHandle(2usize as *const c_void)).unwrap();
    controller.set_period(5).unwrap();
    std::thread::sleep(Duration::from_millis(200));

    controller.set_period(0).unwrap();
    let after_disenroll = recorder.samples.load(Ordering::Relaxed);
    std::thread::sleep(Duration::from_millis(100));
    let settled = recorder.samples.load(Ordering::Relaxed);

    // A couple of in-flight samples may still drain after disenroll
    // returns, but the count must stop growing once they do.
    assert!(settled <= after_disenroll + 4);

    stop.store(true, Ordering::Relaxed);
    worker.join().unwrap();
}

#[test]
fn period_change_keeps_sampling_without_reenrolling() {
    let runtime = MockRuntime::new();
    let stop = Arc::new(AtomicBool::new(false));
    let worker = spawn_worker(runtime.clone(), 3, stop.clone());
    std::thread::sleep(Duration::from_millis(20));

    let controller = new_controller(runtime.clone());
    controller.on_thread_create(ThreadHandle(3usize as *const c_void)).unwrap();
    controller.set_period(20).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    controller.set_period(5).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    controller.set_period(0).unwrap();
    stop.store(true, Ordering::Relaxed);
    worker.join().unwrap();
}

#[test]
fn thread_termination_is_idempotent() {
    let runtime = MockRuntime::new();
    let stop = Arc::new(AtomicBool::new(false));
    let worker = spawn_worker(runtime.clone(), 4, stop.clone());
    std::thread::sleep(Duration::from_millis(20));

    let controller = new_controller(runtime.clone());
    let handle = ThreadHandle(4usize as *const c_void);
    controller.on_thread_create(handle).unwrap();
    controller.set_period(10).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    controller.on_thread_terminate(handle);
    controller.on_thread_terminate(handle);

    controller.set_period(0).unwrap();
    stop.store(true, Ordering::Relaxed);
    worker.join().unwrap();
}

#[test]
fn saturation_counts_drops_instead_of_blocking() {
    let runtime = MockRuntime::new();
    let stop = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::new();
    for key in 10..18 {
        workers.push(spawn_worker(runtime.clone(), key, stop.clone()));
    }
    std::thread::sleep(Duration::from_millis(20));

    let recorder = CountingRecorder::default();
    let controller = Controller::new(
        runtime.clone(),
        VecResolver,
        recorder.clone(),
        NoopCrash,
        Config::default(),
    );
    for key in 10..18 {
        controller.on_thread_create(ThreadHandle(key as *const c_void)).unwrap();
    }
    controller.set_period(1).unwrap();

    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    controller.set_period(0).unwrap();

    // At a 1ms period across 8 busy threads the free queue is very
    // likely to run dry at least once; either outcome (drops recorded,
    // or the consumer kept up) is acceptable, the point is nothing
    // deadlocks or panics under saturation.
    let _ = recorder.drops.load(Ordering::Relaxed);
    let _ = recorder.samples.load(Ordering::Relaxed);

    stop.store(true, Ordering::Relaxed);
    for w in workers {
        w.join().unwrap();
    }
}

#[test]
fn disenroll_repopulates_free_queue_immediately() {
    let runtime = MockRuntime::new();
    let stop = Arc::new(AtomicBool::new(false));
    let worker = spawn_worker(runtime.clone(), 20, stop.clone());
    std::thread::sleep(Duration::from_millis(20));

    let controller = new_controller(runtime.clone());
    controller.on_thread_create(ThreadHandle(20usize as *const c_void)).unwrap();
    controller.set_period(1).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    controller.set_period(0).unwrap();

    let core = cpu_time_sampler::signal::core().expect("core was built by set_period");
    assert_eq!(core.pool.free.len(), core.pool.capacity());
    assert_eq!(core.pool.filled.len(), 0);

    stop.store(true, Ordering::Relaxed);
    worker.join().unwrap();
}
