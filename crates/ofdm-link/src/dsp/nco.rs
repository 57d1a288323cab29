//! Numerically controlled oscillator.
//!
//! Used to translate a baseband signal up or down by the configured
//! frequency offset before transmission or after reception.

use num_complex::Complex;
use std::f64::consts::TAU;

/// Complex oscillator with a 64-bit phase accumulator.
#[derive(Debug, Clone)]
pub struct Nco {
    phase: f64,
    frequency: f64,
}

impl Nco {
    /// Create an oscillator at phase 0 with the given frequency in
    /// radians/sample.
    pub fn new(frequency: f64) -> Self {
        Self {
            phase: 0.0,
            frequency,
        }
    }

    /// Set the oscillator phase in radians.
    pub fn set_phase(&mut self, phase: f64) {
        self.phase = phase;
    }

    /// Set the oscillator frequency in radians/sample.
    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
    }

    fn rotate(&mut self, samples: &mut [Complex<f32>], direction: f64) {
        for s in samples {
            let (sin, cos) = (self.phase * direction).sin_cos();
            *s *= Complex::new(cos as f32, sin as f32);
            self.phase += self.frequency;
            if self.phase > TAU {
                self.phase -= TAU;
            } else if self.phase < -TAU {
                self.phase += TAU;
            }
        }
    }

    /// Mix a block of samples up by the oscillator frequency.
    pub fn mix_up(&mut self, samples: &mut [Complex<f32>]) {
        self.rotate(samples, 1.0);
    }

    /// Mix a block of samples down by the oscillator frequency.
    pub fn mix_down(&mut self, samples: &mut [Complex<f32>]) {
        self.rotate(samples, -1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_up_then_down_is_identity() {
        let freq = TAU * 0.01;
        let mut up = Nco::new(freq);
        let mut down = Nco::new(freq);
        let original: Vec<Complex<f32>> = (0..256)
            .map(|i| Complex::new((i as f32 * 0.1).cos(), (i as f32 * 0.1).sin()))
            .collect();
        let mut samples = original.clone();
        up.mix_up(&mut samples);
        down.mix_down(&mut samples);
        for (a, b) in samples.iter().zip(&original) {
            assert!((a - b).norm() < 1e-4);
        }
    }

    #[test]
    fn test_mix_up_shifts_tone() {
        // A DC input mixed up must become a tone at the NCO frequency.
        let freq = TAU * 0.05;
        let mut nco = Nco::new(freq);
        let mut samples = vec![Complex::new(1.0f32, 0.0); 128];
        nco.mix_up(&mut samples);
        for (n, s) in samples.iter().enumerate() {
            let expected = Complex::new((freq * n as f64).cos() as f32, (freq * n as f64).sin() as f32);
            assert!((s - expected).norm() < 1e-4);
        }
    }
}
