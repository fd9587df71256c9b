//! The single dedicated consumer thread: drains filled slots, resolves
//! and emits events, returns slots to the free queue, then either
//! sleeps or yields before looping back to the semaphore.

use std::time::Duration;

use tracing::warn;

use crate::frame::{SampleKind, ThreadHandle};
use crate::runtime::{CrashProtection, EventRecorder, ManagedRuntime, SymbolResolver};
use crate::signal::{self, SamplerCore};
use crate::sync::Ordering;

/// Below this many nanoseconds of available slack per processor, a plain
/// yield is cheaper than paying a sleep's scheduling latency.
const SLEEP_THRESHOLD_NS: u64 = 300_000;

pub fn run<RT, RS, ER, CP>(runtime: &'static RT, resolver: RS, recorder: ER, crash: CP, max_batch: usize)
where
    RT: ManagedRuntime + 'static,
    RS: SymbolResolver,
    ER: EventRecorder,
    CP: CrashProtection,
{
    let core = signal::core().expect("consumer started before the sampler core was built");
    let num_processors = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let mut buffer: Option<RS::Buffer> = None;

    loop {
        // See `Semaphore`'s doc comment: this pair of calls is a no-op
        // unless disenroll has taken the one permit away, in which case
        // `acquire` blocks here until enroll restores it. `consumer_busy`
        // is raised before the permit is handed back so that a disenroll
        // which grabs the permit right after us still sees it set, and
        // only cleared once this iteration is done touching the pool.
        core.sem.acquire();
        core.consumer_busy.store(true, Ordering::Release);
        core.sem.release();

        process_filled(core, runtime, &resolver, &recorder, &crash, max_batch, &mut buffer);
        emit_drop_event(core, &recorder);
        core.consumer_busy.store(false, Ordering::Release);

        let period_ns = core.period_ns.load(Ordering::Relaxed);
        sleep_or_yield(period_ns, num_processors);
    }
}

fn process_filled<RT, RS, ER, CP>(
    core: &SamplerCore,
    runtime: &RT,
    resolver: &RS,
    recorder: &ER,
    crash: &CP,
    max_batch: usize,
    buffer: &mut Option<RS::Buffer>,
) where
    RT: ManagedRuntime,
    RS: SymbolResolver,
    ER: EventRecorder,
    CP: CrashProtection,
{
    for _ in 0..max_batch {
        let Some(slot_ptr) = core.pool.filled.pop() else {
            break;
        };

        // SAFETY: this pointer came off the filled queue; the handler
        // that produced it has already finished writing and released
        // any claim on it.
        let slot = unsafe { &mut *slot_ptr };

        if recorder.is_execution_sample_enabled() {
            let is_real_sample = slot.kind() != SampleKind::NoSample && slot.frame_count() > 0;

            let stacktrace_id = if is_real_sample {
                let min_size = slot.frame_count().max(1);
                let mut buf = resolver.get_or_renew_buffer(buffer.take(), min_size);
                let (stacktrace_id, resolved) = resolver.store(slot.frames(), &mut buf);
                *buffer = Some(buf);
                if resolved > 0 { stacktrace_id } else { 0 }
            } else {
                0
            };

            let thread_id = slot
                .thread()
                .and_then(|t: ThreadHandle| crash.protect(|| runtime.thread_id_for_event(t)))
                .unwrap_or(0);

            recorder.emit_execution_sample(
                thread_id,
                stacktrace_id,
                slot.kind(),
                slot.error(),
                slot.start_ns(),
                slot.end_ns(),
            );
        }

        if core.pool.free.push(slot_ptr).is_err() {
            warn!("trace slot dropped on return to the free queue; pool accounting is corrupt");
        }
    }
}

fn emit_drop_event<ER: EventRecorder>(core: &SamplerCore, recorder: &ER) {
    if !recorder.is_drop_event_enabled() {
        return;
    }
    let dropped = core.drop_count.swap(0, Ordering::Relaxed);
    if dropped > 0 {
        recorder.emit_drop_event(dropped, signal::monotonic_now());
    }
}

fn sleep_or_yield(period_ns: u64, num_processors: usize) {
    let per_processor = period_ns / num_processors.max(1) as u64;
    if per_processor > SLEEP_THRESHOLD_NS {
        std::thread::sleep(Duration::from_nanos(per_processor));
    } else {
        std::thread::yield_now();
    }
}
