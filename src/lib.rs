//! Per-thread CPU-time execution sampler for a managed runtime.
//!
//! A [`controller::Controller`] binds a POSIX per-thread CPU-time timer
//! to each managed thread the embedding runtime tells it about. When a
//! timer fires, a signal handler takes a preallocated trace slot off a
//! lock-free queue, walks (or attempts to walk) the interrupted thread's
//! stack, and hands the filled slot to a single consumer thread, which
//! resolves frames and emits execution-sample events off the hot path
//! entirely.
//!
//! ## Example
//!
//! ```no_run
//! use cpu_time_sampler::config::Config;
//! use cpu_time_sampler::controller::Controller;
//! # use cpu_time_sampler::frame::{RawFrame, SignalContext, ThreadHandle, ThreadState};
//! # use cpu_time_sampler::runtime::{CrashProtection, EventRecorder, ManagedRuntime, SymbolResolver};
//! # use cpu_time_sampler::timer::TimerSlot;
//! #
//! # #[derive(Clone)] struct Runtime;
//! # impl ManagedRuntime for Runtime {
//! #     fn current_thread_if_managed_and_safe(&self) -> Option<ThreadHandle> { None }
//! #     fn thread_state(&self, _t: ThreadHandle) -> ThreadState { ThreadState::InNative }
//! #     fn is_deopt_handler_active(&self, _t: ThreadHandle) -> bool { false }
//! #     fn is_stw_gc_active(&self) -> bool { false }
//! #     fn set_in_async_stack_trace(&self, _t: ThreadHandle, _v: bool) {}
//! #     fn top_frame_from_signal_context(&self, _t: ThreadHandle, _c: &SignalContext) -> Option<RawFrame> { None }
//! #     fn async_stack_walker(&self, _t: ThreadHandle, _top: RawFrame, _out: &mut [RawFrame]) -> Option<usize> { None }
//! #     fn last_managed_frame(&self, _t: ThreadHandle) -> Option<RawFrame> { None }
//! #     fn first_managed_frame_below(&self, _t: ThreadHandle, _top: RawFrame) -> Option<RawFrame> { None }
//! #     fn has_resolvable_method(&self, _f: RawFrame) -> bool { false }
//! #     fn is_compiler_thread(&self, _t: ThreadHandle) -> bool { false }
//! #     fn timer_slot(&self, _t: ThreadHandle) -> &TimerSlot { unimplemented!() }
//! #     fn per_thread_cpu_clock(&self, _t: ThreadHandle) -> std::io::Result<libc::clockid_t> { unimplemented!() }
//! #     fn os_tid(&self, _t: ThreadHandle) -> libc::pid_t { 0 }
//! #     fn thread_id_for_event(&self, _t: ThreadHandle) -> u64 { 0 }
//! #     fn with_threads(&self, _f: &mut dyn FnMut(ThreadHandle)) {}
//! # }
//! # #[derive(Clone)] struct Resolver;
//! # impl SymbolResolver for Resolver {
//! #     type Buffer = Vec<u8>;
//! #     fn get_or_renew_buffer(&self, cur: Option<Vec<u8>>, _min: usize) -> Vec<u8> { cur.unwrap_or_default() }
//! #     fn store(&self, _frames: &[RawFrame], _buf: &mut Vec<u8>) -> (u64, usize) { (0, 0) }
//! # }
//! # #[derive(Clone)] struct Recorder;
//! # impl EventRecorder for Recorder {
//! #     fn is_execution_sample_enabled(&self) -> bool { true }
//! #     fn is_drop_event_enabled(&self) -> bool { true }
//! #     fn emit_execution_sample(&self, _tid: u64, _stid: u64, _k: cpu_time_sampler::frame::SampleKind, _e: cpu_time_sampler::frame::SlotError, _s: u64, _e2: u64) {}
//! #     fn emit_drop_event(&self, _n: u64, _at: u64) {}
//! # }
//! # #[derive(Clone)] struct Crash;
//! # impl CrashProtection for Crash {
//! #     fn protect<T>(&self, f: impl FnOnce() -> T) -> Option<T> { Some(f()) }
//! # }
//!
//! let controller = Controller::new(Runtime, Resolver, Recorder, Crash, Config::default());
//! controller.set_period(10).unwrap(); // start sampling at 10ms
//! controller.set_period(0).unwrap(); // stop
//! ```

pub mod config;
pub mod consumer;
pub mod controller;
pub mod error;
pub mod frame;
pub mod platform;
pub mod pool;
pub mod runtime;
pub mod signal;
mod sync;
pub mod timer;
