use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use super::SignalError;
use super::waveform::{Unit, Waveform};

/// Single-sided magnitude spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FftResult {
    /// Bin centre frequencies in Hz, ascending from 0.
    pub frequencies: Vec<f64>,

    /// Amplitude per bin, in the waveform's unit.
    pub magnitudes: Vec<f64>,

    pub unit: Unit,
    pub label: String,
}

impl FftResult {
    /// Hz between neighbouring bins.
    pub fn resolution(&self) -> f64 {
        match self.frequencies.as_slice() {
            [_, second, ..] => *second,
            _ => 0.0,
        }
    }

    /// `(frequency, magnitude)` of the largest bin.
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.frequencies
            .iter()
            .copied()
            .zip(self.magnitudes.iter().copied())
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Index of the bin whose centre is closest to `frequency`.
    pub fn nearest_bin(&self, frequency: f64) -> Option<usize> {
        let resolution = self.resolution();
        if resolution <= 0.0 || self.frequencies.is_empty() {
            return None;
        }
        let idx = (frequency / resolution).round().max(0.0) as usize;
        Some(idx.min(self.frequencies.len() - 1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Complex {
    re: f64,
    im: f64,
}

impl Complex {
    fn norm(self) -> f64 {
        self.re.hypot(self.im)
    }
}

/// Magnitude spectrum of a waveform.
///
/// Samples are zero-padded to the next power of two N; bins `0..N/2`
/// are returned with resolution `sample_rate / N`. Magnitudes are scaled
/// to peak amplitude of the original (unpadded) signal.
pub fn fft(waveform: &Waveform) -> Result<FftResult, SignalError> {
    if waveform.is_empty() {
        return Err(SignalError::EmptyWaveform);
    }
    if !(waveform.sample_rate.is_finite() && waveform.sample_rate > 0.0) {
        return Err(SignalError::InvalidSampleRate(waveform.sample_rate));
    }

    let n = waveform.len();
    let padded = n.next_power_of_two();
    let mut buf: Vec<Complex> = waveform
        .values()
        .map(|re| Complex { re, im: 0.0 })
        .chain(std::iter::repeat(Complex { re: 0.0, im: 0.0 }))
        .take(padded)
        .collect();
    transform(&mut buf);

    let bins = (padded / 2).max(1);
    let resolution = waveform.sample_rate / padded as f64;
    let frequencies = (0..bins).map(|k| k as f64 * resolution).collect();
    let magnitudes = buf[..bins]
        .iter()
        .enumerate()
        .map(|(k, c)| {
            let scale = if k == 0 { 1.0 } else { 2.0 };
            c.norm() * scale / n as f64
        })
        .collect();

    Ok(FftResult {
        frequencies,
        magnitudes,
        unit: waveform.unit,
        label: format!("{} spectrum", waveform.label).trim_start().to_string(),
    })
}

/// In-place iterative radix-2 Cooley-Tukey. `buf.len()` must be a power of two.
fn transform(buf: &mut [Complex]) {
    let n = buf.len();
    if n < 2 {
        return;
    }

    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = i.reverse_bits() >> (usize::BITS - bits);
        if j > i {
            buf.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let angle = -2.0 * PI / len as f64;
        for start in (0..n).step_by(len) {
            for k in 0..len / 2 {
                let (sin, cos) = (angle * k as f64).sin_cos();
                let w = Complex { re: cos, im: sin };
                let a = buf[start + k];
                let b = buf[start + k + len / 2];
                let t = Complex {
                    re: b.re * w.re - b.im * w.im,
                    im: b.re * w.im + b.im * w.re,
                };
                buf[start + k] = Complex {
                    re: a.re + t.re,
                    im: a.im + t.im,
                };
                buf[start + k + len / 2] = Complex {
                    re: a.re - t.re,
                    im: a.im - t.im,
                };
            }
        }
        len <<= 1;
    }
}
