//! Signal processing over retrieved sensor waveforms.
//!
//! Everything here is pure: functions take an immutable [`Waveform`] and
//! return a new one (or a spectrum). Nothing touches the network.
//!
//! - `waveform`: samples, units and unit conversion (g ⇄ m/s²)
//! - `calculus`: integration and differentiation along the kinematic
//!   chain acceleration → velocity → displacement
//! - `fft`:      magnitude spectrum

pub mod calculus;
pub mod fft;
pub mod waveform;

use thiserror::Error;

pub use calculus::{IntegrateOptions, IntegrationMethod, differentiate, integrate};
pub use fft::{FftResult, fft};
pub use waveform::{Quantity, Sample, Unit, Waveform, convert, g_to_ms2, ms2_to_g};

/// Standard gravity in m/s².
pub const STANDARD_GRAVITY: f64 = 9.80665;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalError {
    #[error("waveform has no samples")]
    EmptyWaveform,

    #[error("{operation} needs at least {needed} samples, got {got}")]
    InsufficientSamples {
        operation: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("cannot {operation} a waveform in {unit}")]
    UnsupportedUnit { operation: &'static str, unit: Unit },

    #[error("invalid sample rate {0}")]
    InvalidSampleRate(f64),
}
