//! IIR signal conditioning for the vibration channel.
//!
//! Butterworth low-pass (noise suppression ahead of feature extraction) and
//! band-pass (ISO 10816-3 10–1000 Hz severity band) filters, both applied
//! zero-phase by running the same coefficients forward and backward over the
//! window with odd-extension padding and steady-state initial conditions.

use num_complex::Complex64;
use thiserror::Error;

use crate::config::defaults::ISO_BAND_MIN_SAMPLES;

#[derive(Debug, Error, PartialEq)]
pub enum DspError {
    #[error("insufficient data: needed {needed}, available {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("invalid normalized cutoff {0} (must be in (0, 1))")]
    InvalidCutoff(f64),

    #[error("invalid frequency band [{low}, {high}] Hz")]
    InvalidBand { low: f64, high: f64 },
}

// ============================================================================
// Filter design
// ============================================================================

/// Transfer-function form IIR filter with `a[0] == 1`.
#[derive(Debug, Clone)]
pub struct IirFilter {
    b: Vec<f64>,
    a: Vec<f64>,
}

impl IirFilter {
    /// Design a digital Butterworth low-pass filter.
    ///
    /// `cutoff` is normalized to the Nyquist frequency, matching the
    /// convention of the training-side tooling.
    pub fn butter_lowpass(order: usize, cutoff: f64) -> Result<Self, DspError> {
        if !(cutoff > 0.0 && cutoff < 1.0) || order == 0 {
            return Err(DspError::InvalidCutoff(cutoff));
        }

        let (zeros, poles, gain) = butter_prototype(order);
        // Pre-warp to the analog domain (design sample rate fs = 2).
        let warped = 4.0 * (std::f64::consts::PI * cutoff / 2.0).tan();
        let (zeros, poles, gain) = lp_to_lp(&zeros, &poles, gain, warped);
        let (zeros, poles, gain) = bilinear(&zeros, &poles, gain);
        Ok(Self::from_zpk(&zeros, &poles, gain))
    }

    /// Design a digital Butterworth band-pass filter.
    ///
    /// `low` and `high` are normalized to the Nyquist frequency; the
    /// resulting filter has order `2 * order`.
    pub fn butter_bandpass(order: usize, low: f64, high: f64) -> Result<Self, DspError> {
        if order == 0 || !(low > 0.0 && high < 1.0 && low < high) {
            return Err(DspError::InvalidBand { low, high });
        }

        let (zeros, poles, gain) = butter_prototype(order);
        let w1 = 4.0 * (std::f64::consts::PI * low / 2.0).tan();
        let w2 = 4.0 * (std::f64::consts::PI * high / 2.0).tan();
        let (zeros, poles, gain) = lp_to_bp(&zeros, &poles, gain, (w1 * w2).sqrt(), w2 - w1);
        let (zeros, poles, gain) = bilinear(&zeros, &poles, gain);
        Ok(Self::from_zpk(&zeros, &poles, gain))
    }

    fn from_zpk(zeros: &[Complex64], poles: &[Complex64], gain: f64) -> Self {
        let b: Vec<f64> = poly(zeros).iter().map(|c| (*c * gain).re).collect();
        let a: Vec<f64> = poly(poles).iter().map(|c| c.re).collect();
        Self { b, a }
    }

    pub fn numerator(&self) -> &[f64] {
        &self.b
    }

    pub fn denominator(&self) -> &[f64] {
        &self.a
    }

    /// Single-pass direct-form-II-transposed filter with initial state `zi`.
    fn filter_with_state(&self, signal: &[f64], zi: &[f64]) -> Vec<f64> {
        let n = self.a.len().max(self.b.len());
        let mut b = self.b.clone();
        let mut a = self.a.clone();
        b.resize(n, 0.0);
        a.resize(n, 0.0);

        let mut z = zi.to_vec();
        z.resize(n - 1, 0.0);

        let mut out = Vec::with_capacity(signal.len());
        for &x in signal {
            let y = b[0] * x + z.first().copied().unwrap_or(0.0);
            for j in 0..z.len() {
                let next = if j + 1 < z.len() { z[j + 1] } else { 0.0 };
                z[j] = b[j + 1] * x + next - a[j + 1] * y;
            }
            out.push(y);
        }
        out
    }

    /// Steady-state initial filter state for a unit step input.
    ///
    /// Solves `(I - C^T) zi = B` where `C` is the companion matrix of `a`,
    /// so that forward/backward passes start without edge transients.
    fn steady_state(&self) -> Vec<f64> {
        let n = self.a.len().max(self.b.len());
        if n < 2 {
            return Vec::new();
        }
        let mut b = self.b.clone();
        let mut a = self.a.clone();
        b.resize(n, 0.0);
        a.resize(n, 0.0);

        let dim = n - 1;
        // I - companion(a)^T
        let mut m = vec![vec![0.0_f64; dim]; dim];
        for (i, row) in m.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                let companion_ji = if j == 0 {
                    -a[i + 1]
                } else if j == i + 1 {
                    1.0
                } else {
                    0.0
                };
                *cell = if i == j { 1.0 } else { 0.0 } - companion_ji;
            }
        }
        let rhs: Vec<f64> = (0..dim).map(|i| b[i + 1] - a[i + 1] * b[0]).collect();
        solve_linear(m, rhs)
    }

    /// Zero-phase filtering: forward pass, reverse, backward pass, reverse.
    ///
    /// The signal is odd-extended at both ends before filtering so the filter
    /// state is settled inside the kept region.
    pub fn filtfilt(&self, signal: &[f64]) -> Result<Vec<f64>, DspError> {
        let ntaps = self.a.len().max(self.b.len());
        if signal.len() < 2 {
            return Err(DspError::InsufficientData {
                needed: 2,
                available: signal.len(),
            });
        }
        let padlen = (3 * ntaps).min(signal.len() - 1);

        let ext = odd_extend(signal, padlen);
        let zi = self.steady_state();

        let scaled: Vec<f64> = zi.iter().map(|z| z * ext[0]).collect();
        let forward = self.filter_with_state(&ext, &scaled);

        let mut reversed: Vec<f64> = forward.into_iter().rev().collect();
        let scaled: Vec<f64> = zi.iter().map(|z| z * reversed[0]).collect();
        reversed = self.filter_with_state(&reversed, &scaled);

        let mut out: Vec<f64> = reversed.into_iter().rev().collect();
        out.drain(..padlen);
        out.truncate(signal.len());
        Ok(out)
    }
}

/// Analog Butterworth prototype: no zeros, poles on the unit left half-circle.
fn butter_prototype(order: usize) -> (Vec<Complex64>, Vec<Complex64>, f64) {
    let n = order as i64;
    let poles: Vec<Complex64> = (0..order)
        .map(|k| {
            let m = (-n + 1 + 2 * k as i64) as f64;
            let theta = std::f64::consts::PI * m / (2.0 * n as f64);
            -Complex64::from_polar(1.0, theta)
        })
        .collect();
    (Vec::new(), poles, 1.0)
}

/// Scale a low-pass prototype to cutoff `wo` (rad/s).
fn lp_to_lp(
    zeros: &[Complex64],
    poles: &[Complex64],
    gain: f64,
    wo: f64,
) -> (Vec<Complex64>, Vec<Complex64>, f64) {
    let degree = poles.len() - zeros.len();
    let z: Vec<Complex64> = zeros.iter().map(|&s| s * wo).collect();
    let p: Vec<Complex64> = poles.iter().map(|&s| s * wo).collect();
    (z, p, gain * wo.powi(degree as i32))
}

/// Transform a low-pass prototype to a band-pass with center `wo` and
/// bandwidth `bw` (rad/s). Doubles the filter order.
fn lp_to_bp(
    zeros: &[Complex64],
    poles: &[Complex64],
    gain: f64,
    wo: f64,
    bw: f64,
) -> (Vec<Complex64>, Vec<Complex64>, f64) {
    let degree = poles.len() - zeros.len();
    let transform = |roots: &[Complex64]| -> Vec<Complex64> {
        let mut out = Vec::with_capacity(roots.len() * 2);
        for &r in roots {
            let scaled = r * (bw / 2.0);
            let disc = (scaled * scaled - Complex64::new(wo * wo, 0.0)).sqrt();
            out.push(scaled + disc);
        }
        for &r in roots {
            let scaled = r * (bw / 2.0);
            let disc = (scaled * scaled - Complex64::new(wo * wo, 0.0)).sqrt();
            out.push(scaled - disc);
        }
        out
    };

    let mut z = transform(zeros);
    z.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
    let p = transform(poles);
    (z, p, gain * bw.powi(degree as i32))
}

/// Bilinear transform from the analog s-plane to the digital z-plane
/// (design sample rate fs = 2, so `2*fs = 4`).
fn bilinear(
    zeros: &[Complex64],
    poles: &[Complex64],
    gain: f64,
) -> (Vec<Complex64>, Vec<Complex64>, f64) {
    let fs2 = Complex64::new(4.0, 0.0);
    let degree = poles.len() - zeros.len();

    let z_digital: Vec<Complex64> = zeros
        .iter()
        .map(|&s| (fs2 + s) / (fs2 - s))
        .chain(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree))
        .collect();
    let p_digital: Vec<Complex64> = poles.iter().map(|&s| (fs2 + s) / (fs2 - s)).collect();

    let num: Complex64 = zeros.iter().fold(Complex64::new(1.0, 0.0), |acc, &s| {
        acc * (fs2 - s)
    });
    let den: Complex64 = poles.iter().fold(Complex64::new(1.0, 0.0), |acc, &s| {
        acc * (fs2 - s)
    });
    (z_digital, p_digital, gain * (num / den).re)
}

/// Monic polynomial with the given roots, lowest order last.
fn poly(roots: &[Complex64]) -> Vec<Complex64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for &r in roots {
        coeffs.push(Complex64::new(0.0, 0.0));
        for i in (1..coeffs.len()).rev() {
            let prev = coeffs[i - 1];
            coeffs[i] -= r * prev;
        }
    }
    coeffs
}

/// Gaussian elimination with partial pivoting for the small zi system.
fn solve_linear(mut m: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Vec<f64> {
    let n = rhs.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| {
                m[i][col]
                    .abs()
                    .partial_cmp(&m[j][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        m.swap(col, pivot);
        rhs.swap(col, pivot);
        let diag = m[col][col];
        if diag.abs() < 1e-300 {
            continue;
        }
        for row in (col + 1)..n {
            let factor = m[row][col] / diag;
            for k in col..n {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut acc = rhs[row];
        for k in (row + 1)..n {
            acc -= m[row][k] * x[k];
        }
        if m[row][row].abs() > 1e-300 {
            x[row] = acc / m[row][row];
        }
    }
    x
}

fn odd_extend(signal: &[f64], padlen: usize) -> Vec<f64> {
    let first = signal[0];
    let last = signal[signal.len() - 1];
    let mut ext = Vec::with_capacity(signal.len() + 2 * padlen);
    for i in (1..=padlen).rev() {
        ext.push(2.0 * first - signal[i]);
    }
    ext.extend_from_slice(signal);
    for i in 1..=padlen {
        ext.push(2.0 * last - signal[signal.len() - 1 - i]);
    }
    ext
}

// ============================================================================
// Vibration helpers
// ============================================================================

pub fn rms(signal: &[f64]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|x| x * x).sum::<f64>() / signal.len() as f64).sqrt()
}

/// RMS of the vibration signal restricted to the ISO 10816-3 severity band.
///
/// The upper edge is clamped to 0.99 of Nyquist. Signals shorter than
/// [`ISO_BAND_MIN_SAMPLES`] are rejected as too short to carry band content.
pub fn iso_band_rms(
    signal: &[f64],
    sample_rate_hz: f64,
    low_hz: f64,
    high_hz: f64,
) -> Result<f64, DspError> {
    if signal.len() < ISO_BAND_MIN_SAMPLES {
        return Err(DspError::InsufficientData {
            needed: ISO_BAND_MIN_SAMPLES,
            available: signal.len(),
        });
    }
    let nyquist = sample_rate_hz / 2.0;
    let high = high_hz.min(0.99 * nyquist);
    if !(low_hz > 0.0 && low_hz < high) {
        return Err(DspError::InvalidBand {
            low: low_hz,
            high,
        });
    }
    let filter = IirFilter::butter_bandpass(4, low_hz / nyquist, high / nyquist)?;
    let filtered = filter.filtfilt(signal)?;
    Ok(rms(&filtered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / fs).sin()).collect()
    }

    #[test]
    fn lowpass_coefficients_are_normalized() {
        let f = IirFilter::butter_lowpass(3, 0.1).unwrap();
        assert_eq!(f.numerator().len(), 4);
        assert_eq!(f.denominator().len(), 4);
        assert!((f.denominator()[0] - 1.0).abs() < 1e-12);
        // Unit DC gain
        let dc = f.numerator().iter().sum::<f64>() / f.denominator().iter().sum::<f64>();
        assert!((dc - 1.0).abs() < 1e-9, "DC gain {dc}");
    }

    #[test]
    fn bandpass_blocks_dc_and_nyquist() {
        let f = IirFilter::butter_bandpass(4, 0.02, 0.9).unwrap();
        assert_eq!(f.numerator().len(), 9);
        let dc: f64 = f.numerator().iter().sum();
        let nyq: f64 = f
            .numerator()
            .iter()
            .enumerate()
            .map(|(i, b)| if i % 2 == 0 { *b } else { -*b })
            .sum();
        assert!(dc.abs() < 1e-9, "DC leakage {dc}");
        assert!(nyq.abs() < 1e-9, "Nyquist leakage {nyq}");
    }

    #[test]
    fn lowpass_suppresses_noise() {
        let fs = 1000.0;
        let clean = sine(20.0, fs, 1000);
        // Deterministic pseudo-noise well above the cutoff
        let noisy: Vec<f64> = clean
            .iter()
            .enumerate()
            .map(|(i, &x)| x + 0.5 * (2.0 * PI * 400.0 * i as f64 / fs).sin())
            .collect();

        let filter = IirFilter::butter_lowpass(3, 0.1).unwrap();
        let filtered = filter.filtfilt(&noisy).unwrap();

        let err = |a: &[f64]| -> f64 {
            a.iter()
                .zip(&clean)
                .map(|(x, c)| (x - c) * (x - c))
                .sum::<f64>()
                .sqrt()
        };
        assert!(err(&filtered) < err(&noisy) / 2.0);
    }

    #[test]
    fn filtfilt_preserves_sine_crest_factor() {
        let fs = 1000.0;
        let signal = sine(50.0, fs, 1000);
        let filter = IirFilter::butter_lowpass(3, 0.2).unwrap();
        let filtered = filter.filtfilt(&signal).unwrap();

        let r = rms(&filtered);
        let peak = filtered.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
        let crest = peak / r;
        assert!((crest - std::f64::consts::SQRT_2).abs() < 0.02, "crest {crest}");
    }

    #[test]
    fn iso_band_rms_on_window_sized_signal() {
        let signal: Vec<f64> = (0..30).map(|i| 2.0 + 0.05 * (i % 10) as f64).collect();
        let value = iso_band_rms(&signal, 1000.0, 10.0, 1000.0).unwrap();
        assert!(value.is_finite());
        assert!(value >= 0.0);
    }

    #[test]
    fn iso_band_rejects_short_signal() {
        let signal = vec![1.0; 5];
        let err = iso_band_rms(&signal, 1000.0, 10.0, 1000.0).unwrap_err();
        assert!(matches!(err, DspError::InsufficientData { .. }));
    }

    #[test]
    fn iso_band_rejects_inverted_band() {
        let signal = vec![1.0; 30];
        let err = iso_band_rms(&signal, 1000.0, 600.0, 100.0).unwrap_err();
        assert!(matches!(err, DspError::InvalidBand { .. }));
    }

    #[test]
    fn iso_band_passes_in_band_tone() {
        let fs = 1000.0;
        let tone = sine(100.0, fs, 512);
        let band = iso_band_rms(&tone, fs, 10.0, 1000.0).unwrap();
        // In-band tone keeps most of its energy (sine RMS = 0.707)
        assert!((band - std::f64::consts::FRAC_1_SQRT_2).abs() < 0.05, "band rms {band}");
    }
}
