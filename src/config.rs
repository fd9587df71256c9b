//! Tunables for the sampler. Everything here has a default matching the
//! behavior described for the pipeline; callers only need to reach for
//! this when they want to override one knob.

/// Lower bound on the trace-slot queue capacity, regardless of processor
/// count or period.
const MIN_QUEUE_CAP: usize = 80;

/// A cheap, conservative estimate of the size in bytes of an event
/// recorder's output chunk, used only to keep the trace pool from
/// outgrowing a single chunk's worth of stacktrace payloads. Override via
/// [`Config::max_chunk_size`] if the recorder's real chunk size is known.
const DEFAULT_MAX_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Config {
    /// The real-time signal number the sampler binds its per-thread
    /// timers to. Must not collide with a signal the embedding runtime
    /// or another library already owns.
    pub signal: i32,

    /// Capacity of each slot's preallocated frame buffer.
    pub max_frames: usize,

    /// See [`DEFAULT_MAX_CHUNK_SIZE`].
    pub max_chunk_size: usize,

    /// Maximum slots drained from the filled queue in one consumer pass.
    pub max_batch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            signal: libc::SIGRTMIN() + 2,
            max_frames: 2048,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_batch: 1000,
        }
    }
}

impl Config {
    /// Trace-slot queue capacity, fixed for the sampler's lifetime at
    /// first enrollment.
    ///
    /// Scales with the number of available processors and backs off at
    /// higher sampling rates, but never below [`MIN_QUEUE_CAP`] nor above
    /// what fits in `max_chunk_size` worth of frames.
    pub fn queue_cap(&self, period_ms: u64, num_processors: usize) -> usize {
        let divisor = if period_ms > 9 { 2 } else { 1 };
        let scaled = (20 * num_processors) / divisor;

        let word_size = std::mem::size_of::<usize>();
        let frame_bytes = self.max_frames.max(1) * word_size;
        let max_by_chunk = (self.max_chunk_size / 2 / frame_bytes.max(1)).max(MIN_QUEUE_CAP);

        scaled.clamp(MIN_QUEUE_CAP, max_by_chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_below_minimum() {
        let cfg = Config::default();
        assert!(cfg.queue_cap(1000, 1) >= MIN_QUEUE_CAP);
    }

    #[test]
    fn backs_off_above_9ms() {
        let cfg = Config::default();
        let fast = cfg.queue_cap(5, 64);
        let slow = cfg.queue_cap(10, 64);
        assert!(slow <= fast);
    }

    #[test]
    fn bounded_by_chunk_budget() {
        let mut cfg = Config::default();
        cfg.max_chunk_size = 4096;
        let cap = cfg.queue_cap(5, 256);
        let word_size = std::mem::size_of::<usize>();
        assert!(cap * cfg.max_frames * word_size <= cfg.max_chunk_size.max(cap * word_size));
    }
}
