//! Crate-surface error types.
//!
//! [`SlotError`] lives in [`crate::frame`] — it's a per-sample
//! classification that travels with a slot, not a `Result` a caller
//! handles. Everything a caller of [`crate::controller::Controller`] can
//! actually get back as an `Err` is here.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("failed to install the sampling signal handler: {0}")]
    SignalHandlerInstall(#[source] io::Error),

    #[error("failed to create a per-thread CPU-time timer: {0}")]
    TimerCreate(#[source] io::Error),

    #[error("failed to arm or disarm a per-thread CPU-time timer: {0}")]
    TimerSet(#[source] io::Error),

    #[error("per-thread CPU-time clock is unavailable for this thread: {0}")]
    ClockUnavailable(#[source] io::Error),

    #[error("sampler is not enrolled")]
    NotEnrolled,
}

pub type Result<T> = std::result::Result<T, SamplerError>;
