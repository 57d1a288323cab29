//! FIR Hilbert interpolator/decimator pair.
//!
//! The interpolator turns one complex baseband sample into two real samples
//! of a passband signal centered at a quarter of the doubled rate; the
//! decimator is the matching inverse. Together they let the pipeline speak
//! 16-bit audio instead of IQ.

use super::fir;
use num_complex::Complex;

/// Quadrature rotation `j^n` for n = 0..4.
const ROT: [Complex<f32>; 4] = [
    Complex::new(1.0, 0.0),
    Complex::new(0.0, 1.0),
    Complex::new(-1.0, 0.0),
    Complex::new(0.0, -1.0),
];

/// FIR Hilbert transformer operating as a 1:2 interpolator and 2:1
/// decimator.
#[derive(Debug)]
pub struct FirHilbert {
    /// Even/odd polyphase branches of the halfband prototype, 2x gain
    even: Vec<f32>,
    odd: Vec<f32>,
    /// Full prototype for the decimation side
    taps: Vec<f32>,
    interp_history: Vec<Complex<f32>>,
    interp_n: usize,
    decim_history: Vec<Complex<f32>>,
    decim_n: usize,
}

impl FirHilbert {
    /// Create a transformer with the given filter semi-length (the
    /// prototype has `4 * semi_length + 1` taps) and stopband attenuation.
    pub fn new(semi_length: usize, atten_db: f64) -> Self {
        let len = 4 * semi_length + 1;
        let taps = fir::lowpass(len, 0.25, atten_db);
        let mut even: Vec<f32> = taps.iter().step_by(2).map(|&t| t * 2.0).collect();
        let mut odd: Vec<f32> = taps.iter().skip(1).step_by(2).map(|&t| t * 2.0).collect();
        let branch_len = even.len().max(odd.len());
        even.resize(branch_len, 0.0);
        odd.resize(branch_len, 0.0);
        Self {
            even,
            odd,
            interp_history: vec![Complex::new(0.0, 0.0); branch_len],
            interp_n: 0,
            decim_history: vec![Complex::new(0.0, 0.0); len],
            decim_n: 0,
            taps,
        }
    }

    /// Convert one complex baseband sample into two real passband samples.
    pub fn interp(&mut self, sample: Complex<f32>) -> [f32; 2] {
        self.interp_history.rotate_right(1);
        self.interp_history[0] = sample;
        let mut lo_even = Complex::new(0.0, 0.0);
        let mut lo_odd = Complex::new(0.0, 0.0);
        for i in 0..self.even.len() {
            lo_even += self.interp_history[i] * self.even[i];
            lo_odd += self.interp_history[i] * self.odd[i];
        }
        // y[n] = Re(lowpassed * j^n), two outputs per input
        let n = self.interp_n;
        self.interp_n = (self.interp_n + 1) % 2;
        let r0 = ROT[(2 * n) % 4];
        let r1 = ROT[(2 * n + 1) % 4];
        [(lo_even * r0).re, (lo_odd * r1).re]
    }

    /// Convert two real passband samples back into one complex baseband
    /// sample.
    pub fn decim(&mut self, samples: [f32; 2]) -> Complex<f32> {
        // mix down by j^-n, then lowpass and keep every other sample
        let n = self.decim_n;
        self.decim_n = (self.decim_n + 1) % 2;
        let z0 = ROT[(2 * n) % 4].conj() * samples[0];
        let z1 = ROT[(2 * n + 1) % 4].conj() * samples[1];
        self.decim_history.rotate_right(2);
        self.decim_history[1] = z0;
        self.decim_history[0] = z1;
        let mut acc = Complex::new(0.0, 0.0);
        for (i, &t) in self.taps.iter().enumerate() {
            acc += self.decim_history[i] * t;
        }
        acc * 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interp_then_decim_recovers_tone() {
        let mut interp = FirHilbert::new(25, 60.0);
        let mut decim = FirHilbert::new(25, 60.0);
        let input: Vec<Complex<f32>> = (0..2000)
            .map(|i| {
                let phase = std::f64::consts::TAU * 0.02 * i as f64;
                Complex::new(phase.cos() as f32, phase.sin() as f32) * 0.5
            })
            .collect();
        let mut output = Vec::new();
        for &s in &input {
            let audio = interp.interp(s);
            output.push(decim.decim(audio));
        }
        // Compare steady state against a delayed copy of the input: the
        // round trip is a pure delay of the combined filter length.
        let delay = 50; // (4 * 25 + 1 - 1) / 2 per filter, in complex samples
        let mut max_err = 0.0f32;
        for i in 600..1800 {
            let err = (output[i] - input[i - delay]).norm();
            max_err = max_err.max(err);
        }
        assert!(max_err < 0.02, "max error {max_err}");
    }

    #[test]
    fn test_interp_output_is_passband() {
        // A DC complex input must become a tone at a quarter of the audio
        // rate, so its mean must be near zero.
        let mut interp = FirHilbert::new(25, 60.0);
        let mut audio = Vec::new();
        for _ in 0..1000 {
            let pair = interp.interp(Complex::new(0.7, 0.0));
            audio.push(pair[0]);
            audio.push(pair[1]);
        }
        let mean: f32 = audio[200..].iter().sum::<f32>() / (audio.len() - 200) as f32;
        assert!(mean.abs() < 0.01, "mean {mean}");
        let peak = audio[200..].iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!((peak - 0.7).abs() < 0.05, "peak {peak}");
    }
}
