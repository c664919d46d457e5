use super::SignalError;
use super::STANDARD_GRAVITY;
use super::waveform::{Unit, Waveform, relabel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationMethod {
    #[default]
    Trapezoidal,
    Simpson,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IntegrateOptions {
    pub method: IntegrationMethod,

    /// Value of the first output sample, in output units.
    pub initial_value: f64,
}

/// Output unit and scale of integrating one unit step down the chain.
fn integral_unit(unit: Unit) -> Option<(Unit, f64)> {
    match unit {
        Unit::G => Some((Unit::MillimetersPerSecond, STANDARD_GRAVITY * 1000.0)),
        Unit::MetersPerSecondSquared => Some((Unit::MillimetersPerSecond, 1000.0)),
        Unit::MillimetersPerSecond => Some((Unit::Micrometers, 1000.0)),
        Unit::Millimeters | Unit::Micrometers => None,
    }
}

/// Output unit and scale of differentiating one unit step up the chain.
fn derivative_unit(unit: Unit) -> Option<(Unit, f64)> {
    match unit {
        Unit::Micrometers => Some((Unit::MillimetersPerSecond, 0.001)),
        Unit::Millimeters => Some((Unit::MillimetersPerSecond, 1.0)),
        Unit::MillimetersPerSecond => Some((Unit::MetersPerSecondSquared, 0.001)),
        Unit::G | Unit::MetersPerSecondSquared => None,
    }
}

/// Integrates acceleration into velocity, or velocity into displacement.
///
/// Simpson needs three samples; shorter inputs fall back to the
/// trapezoidal rule.
pub fn integrate(waveform: &Waveform, options: IntegrateOptions) -> Result<Waveform, SignalError> {
    let (unit, scale) = integral_unit(waveform.unit).ok_or(SignalError::UnsupportedUnit {
        operation: "integrate",
        unit: waveform.unit,
    })?;
    if waveform.is_empty() {
        return Err(SignalError::EmptyWaveform);
    }

    let raw = match options.method {
        IntegrationMethod::Simpson if waveform.len() >= 3 => simpson(waveform),
        _ => trapezoidal(waveform),
    };
    let values = raw
        .into_iter()
        .map(|v| v * scale + options.initial_value)
        .collect();

    Ok(waveform.derive(
        values,
        unit,
        relabel(&waveform.label, waveform.unit.quantity(), unit.quantity()),
    ))
}

fn trapezoidal(waveform: &Waveform) -> Vec<f64> {
    let s = &waveform.samples;
    let mut out = Vec::with_capacity(s.len());
    let mut acc = 0.0;
    out.push(acc);
    for pair in s.windows(2) {
        acc += (pair[0].value + pair[1].value) / 2.0 * (pair[1].time - pair[0].time);
        out.push(acc);
    }
    out
}

fn simpson(waveform: &Waveform) -> Vec<f64> {
    let s = &waveform.samples;
    let mut out = vec![0.0; s.len()];
    out[1] = (s[0].value + s[1].value) / 2.0 * (s[1].time - s[0].time);
    for i in 2..s.len() {
        let span = s[i].time - s[i - 2].time;
        out[i] = out[i - 2] + span / 6.0 * (s[i - 2].value + 4.0 * s[i - 1].value + s[i].value);
    }
    out
}

/// Differentiates displacement into velocity, or velocity into acceleration.
///
/// Forward difference at the first sample, backward at the last,
/// central everywhere else.
pub fn differentiate(waveform: &Waveform) -> Result<Waveform, SignalError> {
    let (unit, scale) = derivative_unit(waveform.unit).ok_or(SignalError::UnsupportedUnit {
        operation: "differentiate",
        unit: waveform.unit,
    })?;
    let s = &waveform.samples;
    if s.len() < 2 {
        return Err(SignalError::InsufficientSamples {
            operation: "differentiate",
            needed: 2,
            got: s.len(),
        });
    }

    let n = s.len();
    let slope = |a: usize, b: usize| (s[b].value - s[a].value) / (s[b].time - s[a].time);
    let values = (0..n)
        .map(|i| match i {
            0 => slope(0, 1),
            i if i == n - 1 => slope(n - 2, n - 1),
            i => slope(i - 1, i + 1),
        })
        .map(|d| d * scale)
        .collect();

    Ok(waveform.derive(
        values,
        unit,
        relabel(&waveform.label, waveform.unit.quantity(), unit.quantity()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn sine(freq: f64, rate: f64, n: usize, unit: Unit, label: &str) -> Waveform {
        let values: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / rate).sin())
            .collect();
        Waveform::from_values(&values, rate, unit, label)
    }

    #[test]
    fn test_constant_acceleration_both_methods() {
        let w = Waveform::from_values(&[1.0; 11], 10.0, Unit::MetersPerSecondSquared, "accel");
        for method in [IntegrationMethod::Trapezoidal, IntegrationMethod::Simpson] {
            let v = integrate(&w, IntegrateOptions { method, initial_value: 0.0 }).unwrap();
            assert_eq!(v.unit, Unit::MillimetersPerSecond);
            // 1 m/s² for 1 s is 1 m/s
            assert_relative_eq!(v.samples[10].value, 1000.0, epsilon = 1e-9);
            assert_relative_eq!(v.samples[5].value, 500.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_simpson_falls_back_below_three_samples() {
        let w = Waveform::from_values(&[2.0, 4.0], 1.0, Unit::MillimetersPerSecond, "v");
        let simpson = integrate(
            &w,
            IntegrateOptions {
                method: IntegrationMethod::Simpson,
                initial_value: 0.0,
            },
        )
        .unwrap();
        let trap = integrate(&w, IntegrateOptions::default()).unwrap();
        assert_eq!(simpson, trap);
        assert_relative_eq!(trap.samples[1].value, 3000.0);
        assert_eq!(trap.unit, Unit::Micrometers);
    }

    #[test]
    fn test_g_integrates_to_velocity_with_label() {
        let w = sine(10.0, 1000.0, 100, Unit::G, "X acceleration");
        let v = integrate(&w, IntegrateOptions::default()).unwrap();
        assert_eq!(v.unit, Unit::MillimetersPerSecond);
        assert_eq!(v.label, "X velocity");
        assert_eq!(v.samples[0].value, 0.0);
        assert_eq!(v.len(), w.len());
    }

    #[test]
    fn test_simpson_is_closer_on_smooth_signals() {
        // a(t) = cos(2πft) m/s², v(t) = sin(2πft) / (2πf) m/s
        let f = 5.0;
        let rate = 200.0;
        let values: Vec<f64> = (0..201).map(|i| (2.0 * PI * f * i as f64 / rate).cos()).collect();
        let w = Waveform::from_values(&values, rate, Unit::MetersPerSecondSquared, "a");
        let exact = |t: f64| (2.0 * PI * f * t).sin() / (2.0 * PI * f) * 1000.0;

        let err = |method| {
            let v = integrate(&w, IntegrateOptions { method, initial_value: 0.0 }).unwrap();
            v.samples
                .iter()
                .map(|s| (s.value - exact(s.time)).abs())
                .fold(0.0, f64::max)
        };
        let trap_err = err(IntegrationMethod::Trapezoidal);
        let simpson_err = err(IntegrationMethod::Simpson);
        assert!(simpson_err < trap_err, "{simpson_err} >= {trap_err}");
    }

    #[test]
    fn test_unsupported_units() {
        let disp = Waveform::from_values(&[1.0, 2.0], 1.0, Unit::Micrometers, "");
        assert!(matches!(
            integrate(&disp, IntegrateOptions::default()),
            Err(SignalError::UnsupportedUnit { operation: "integrate", .. })
        ));
        let acc = Waveform::from_values(&[1.0, 2.0], 1.0, Unit::G, "");
        assert!(matches!(
            differentiate(&acc),
            Err(SignalError::UnsupportedUnit { operation: "differentiate", .. })
        ));
    }

    #[test]
    fn test_differentiate_edges_and_center() {
        // x = t² sampled at 1 Hz: 0, 1, 4, 9 (mm)
        let w = Waveform::from_values(&[0.0, 1.0, 4.0, 9.0], 1.0, Unit::Millimeters, "displacement");
        let v = differentiate(&w).unwrap();
        let got: Vec<f64> = v.values().collect();
        assert_eq!(got, vec![1.0, 2.0, 4.0, 5.0]);
        assert_eq!(v.unit, Unit::MillimetersPerSecond);
        assert_eq!(v.label, "velocity");

        let single = Waveform::from_values(&[1.0], 1.0, Unit::Millimeters, "");
        assert!(matches!(
            differentiate(&single),
            Err(SignalError::InsufficientSamples { needed: 2, got: 1, .. })
        ));
    }

    #[test]
    fn test_integrate_of_derivative_recovers_signal() {
        let w = sine(5.0, 1000.0, 400, Unit::MillimetersPerSecond, "velocity");
        let a = differentiate(&w).unwrap();
        assert_eq!(a.unit, Unit::MetersPerSecondSquared);

        let back = integrate(
            &a,
            IntegrateOptions {
                method: IntegrationMethod::Trapezoidal,
                initial_value: w.samples[0].value,
            },
        )
        .unwrap();
        assert_eq!(back.unit, Unit::MillimetersPerSecond);
        for i in 2..w.len() - 2 {
            assert_relative_eq!(back.samples[i].value, w.samples[i].value, epsilon = 2e-3);
        }
    }

    #[test]
    fn test_round_trip_on_five_samples() {
        let w = Waveform::from_values(&[0.0, 1.0, 2.0, 3.0, 4.0], 10.0, Unit::Micrometers, "d");
        let v = differentiate(&w).unwrap();
        let back = integrate(&v, IntegrateOptions::default()).unwrap();
        for i in 1..4 {
            assert_relative_eq!(back.samples[i].value, w.samples[i].value, epsilon = 1e-9);
        }
    }
}
