//! Kaiser-windowed FIR filter design.
//!
//! All resampling and Hilbert filters in this crate are windowed-sinc
//! designs sized for 60 dB of stopband attenuation.

use std::f64::consts::PI;

/// Zeroth-order modified Bessel function of the first kind.
///
/// Power series; converges quickly for the argument range used by Kaiser
/// windows (|x| < 30).
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    for k in 1..32 {
        term *= (half / k as f64) * (half / k as f64);
        sum += term;
        if term < 1e-16 * sum {
            break;
        }
    }
    sum
}

/// Kaiser window shape parameter for a given stopband attenuation in dB.
pub fn kaiser_beta(atten_db: f64) -> f64 {
    if atten_db > 50.0 {
        0.1102 * (atten_db - 8.7)
    } else if atten_db > 21.0 {
        0.5842 * (atten_db - 21.0).powf(0.4) + 0.078_86 * (atten_db - 21.0)
    } else {
        0.0
    }
}

/// Kaiser window of `len` points.
pub fn kaiser_window(len: usize, beta: f64) -> Vec<f64> {
    let denom = bessel_i0(beta);
    let half = (len - 1) as f64 / 2.0;
    (0..len)
        .map(|n| {
            let r = (n as f64 - half) / half;
            bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / denom
        })
        .collect()
}

/// Normalized sinc, `sin(pi x) / (pi x)`.
fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-9 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Windowed-sinc lowpass prototype.
///
/// `cutoff` is in cycles/sample (0 < cutoff < 0.5). Taps are normalized to
/// unit DC gain.
pub fn lowpass(len: usize, cutoff: f64, atten_db: f64) -> Vec<f32> {
    debug_assert!(len >= 3);
    debug_assert!(cutoff > 0.0 && cutoff < 0.5);
    let window = kaiser_window(len, kaiser_beta(atten_db));
    let half = (len - 1) as f64 / 2.0;
    let mut taps: Vec<f64> = (0..len)
        .map(|n| 2.0 * cutoff * sinc(2.0 * cutoff * (n as f64 - half)) * window[n])
        .collect();
    let sum: f64 = taps.iter().sum();
    for t in &mut taps {
        *t /= sum;
    }
    taps.into_iter().map(|t| t as f32).collect()
}

/// Polyphase interpolation filter bank.
///
/// The prototype is a lowpass sampled at `phases` times the input rate;
/// phase `q` holds the taps for a fractional delay of `q / phases` samples.
/// Each phase is normalized to unit gain so interpolation does not modulate
/// the signal amplitude.
pub fn polyphase_bank(phases: usize, taps_per_phase: usize, cutoff: f64, atten_db: f64) -> Vec<Vec<f32>> {
    let len = phases * taps_per_phase;
    let window = kaiser_window(len, kaiser_beta(atten_db));
    let half = (len - 1) as f64 / 2.0;
    let proto: Vec<f64> = (0..len)
        .map(|n| 2.0 * cutoff * sinc(2.0 * cutoff * (n as f64 - half) / phases as f64) * window[n])
        .collect();
    let mut bank = Vec::with_capacity(phases);
    for q in 0..phases {
        let mut phase: Vec<f64> = (0..taps_per_phase).map(|i| proto[i * phases + q]).collect();
        let sum: f64 = phase.iter().sum();
        if sum.abs() > 1e-12 {
            for t in &mut phase {
                *t /= sum;
            }
        }
        bank.push(phase.into_iter().map(|t| t as f32).collect());
    }
    bank
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kaiser_beta_60db() {
        let beta = kaiser_beta(60.0);
        assert!((beta - 5.653).abs() < 0.01);
    }

    #[test]
    fn test_lowpass_dc_gain() {
        let taps = lowpass(31, 0.25, 60.0);
        let sum: f32 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_lowpass_symmetry() {
        let taps = lowpass(31, 0.25, 60.0);
        for i in 0..taps.len() / 2 {
            assert!((taps[i] - taps[taps.len() - 1 - i]).abs() < 1e-7);
        }
    }

    #[test]
    fn test_polyphase_bank_shape() {
        let bank = polyphase_bank(64, 8, 0.45, 60.0);
        assert_eq!(bank.len(), 64);
        assert!(bank.iter().all(|p| p.len() == 8));
        for phase in &bank {
            let sum: f32 = phase.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }
}
