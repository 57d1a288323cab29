//! OFDM flex-frame modem: frame generator and frame synchronizer.
//!
//! The modem speaks a self-describing burst format. Each frame starts with
//! a detection preamble (three repetitions of a half-period training block),
//! followed by one full training symbol for timing and per-bin channel
//! estimation, a BPSK header carrying the user header plus the payload
//! parameters, and finally the payload symbols in the configured
//! constellation. Every data symbol carries PN pilots for common phase
//! tracking.

pub mod fec;
pub mod framegen;
pub mod framesync;
pub mod modulation;
pub mod packet;

pub use fec::FecScheme;
pub use framegen::{FrameGenerator, FrameProperties};
pub use framesync::{FrameEvent, FrameStats, FrameSynchronizer};
pub use modulation::{Constellation, SubcarrierModulation};
pub use packet::HEADER_SIZE;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Number of repeated preamble blocks ahead of the training symbol.
pub(crate) const S0_BLOCKS: usize = 3;

/// 16-bit Galois LFSR used for the PN training and pilot sequences.
struct Lfsr(u16);

impl Lfsr {
    fn next_bit(&mut self) -> bool {
        let bit = self.0 & 1 == 1;
        self.0 >>= 1;
        if bit {
            self.0 ^= 0xb400;
        }
        bit
    }

    fn next_qpsk(&mut self) -> Complex<f32> {
        let re = if self.next_bit() { 1.0 } else { -1.0 };
        let im = if self.next_bit() { 1.0 } else { -1.0 };
        Complex::new(re, im) * std::f32::consts::FRAC_1_SQRT_2
    }
}

/// OFDM dimensioning and derived training data shared by the generator and
/// the synchronizer.
#[derive(Clone)]
pub struct OfdmParams {
    subcarriers: usize,
    cyclic_prefix: usize,
    taper: usize,
    data_bins: Vec<usize>,
    pilot_bins: Vec<usize>,
    pilot_base: Vec<Complex<f32>>,
    s0_time: Vec<Complex<f32>>,
    s1_time: Vec<Complex<f32>>,
    s1_freq: Vec<Complex<f32>>,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for OfdmParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfdmParams")
            .field("subcarriers", &self.subcarriers)
            .field("cyclic_prefix", &self.cyclic_prefix)
            .field("taper", &self.taper)
            .field("data_bins", &self.data_bins.len())
            .field("pilot_bins", &self.pilot_bins.len())
            .finish()
    }
}

impl OfdmParams {
    /// Build the OFDM dimensioning.
    ///
    /// `subcarriers` must be an even number of at least 16, the cyclic
    /// prefix at most `subcarriers`, and the taper at most the cyclic
    /// prefix; the transfer constructor validates this before calling.
    pub fn new(subcarriers: usize, cyclic_prefix: usize, taper: usize) -> Self {
        assert!(subcarriers >= 16 && subcarriers % 2 == 0);
        assert!(cyclic_prefix <= subcarriers);
        assert!(taper <= cyclic_prefix);
        let m = subcarriers;
        let (data_bins, pilot_bins) = allocate_bins(m);

        let mut pilot_lfsr = Lfsr(0x2c9f);
        let pilot_base: Vec<Complex<f32>> = pilot_bins
            .iter()
            .map(|_| {
                if pilot_lfsr.next_bit() {
                    Complex::new(1.0, 0.0)
                } else {
                    Complex::new(-1.0, 0.0)
                }
            })
            .collect();

        let mut planner = FftPlanner::new();
        let fft_forward = planner.plan_fft_forward(m);
        let fft_inverse = planner.plan_fft_inverse(m);

        // S0: energy on even used bins only, giving a time signal with
        // period m/2 for the repetition detector
        let mut s0_lfsr = Lfsr(0xace1);
        let mut s0_freq = vec![Complex::new(0.0, 0.0); m];
        for &k in data_bins.iter().chain(&pilot_bins) {
            let value = s0_lfsr.next_qpsk();
            if k % 2 == 0 {
                s0_freq[k] = value * std::f32::consts::SQRT_2;
            }
        }
        let mut s0_time = s0_freq;
        fft_inverse.process(&mut s0_time);
        let norm = 1.0 / (m as f32).sqrt();
        for s in &mut s0_time {
            *s *= norm;
        }

        // S1: PN QPSK on every used bin, the channel estimation reference
        let mut s1_lfsr = Lfsr(0x1ce5);
        let mut s1_freq = vec![Complex::new(0.0, 0.0); m];
        let mut used: Vec<usize> = data_bins.iter().chain(&pilot_bins).copied().collect();
        used.sort_unstable();
        for &k in &used {
            s1_freq[k] = s1_lfsr.next_qpsk();
        }
        let mut s1_time = s1_freq.clone();
        fft_inverse.process(&mut s1_time);
        for s in &mut s1_time {
            *s *= norm;
        }

        Self {
            subcarriers: m,
            cyclic_prefix,
            taper,
            data_bins,
            pilot_bins,
            pilot_base,
            s0_time,
            s1_time,
            s1_freq,
            fft_forward,
            fft_inverse,
        }
    }

    /// Number of subcarriers (FFT size).
    pub fn subcarriers(&self) -> usize {
        self.subcarriers
    }

    /// Cyclic prefix length in samples.
    pub fn cyclic_prefix(&self) -> usize {
        self.cyclic_prefix
    }

    /// Taper length in samples.
    pub fn taper(&self) -> usize {
        self.taper
    }

    /// FFT bin indices carrying data.
    pub fn data_bins(&self) -> &[usize] {
        &self.data_bins
    }

    /// FFT bin indices carrying pilots.
    pub fn pilot_bins(&self) -> &[usize] {
        &self.pilot_bins
    }

    /// One OFDM symbol including its cyclic prefix.
    pub fn symbol_len(&self) -> usize {
        self.subcarriers + self.cyclic_prefix
    }

    /// Pilot reference for pilot `index` of data symbol `symbol`.
    pub(crate) fn pilot_value(&self, index: usize, symbol: usize) -> Complex<f32> {
        // per-symbol PN sign decorrelates the pilots between symbols
        let hash = (symbol as u32).wrapping_mul(0x9e37_79b9);
        let sign = if (hash >> 16) & 1 == 0 { 1.0 } else { -1.0 };
        self.pilot_base[index] * sign
    }

    /// FFT window offset into the cyclic prefix, backing off from the
    /// symbol boundary to tolerate small timing errors.
    pub(crate) fn body_backoff(&self) -> usize {
        (self.cyclic_prefix - self.taper) / 2
    }

    pub(crate) fn s0_time(&self) -> &[Complex<f32>] {
        &self.s0_time
    }

    pub(crate) fn s1_time(&self) -> &[Complex<f32>] {
        &self.s1_time
    }

    pub(crate) fn s1_freq(&self) -> &[Complex<f32>] {
        &self.s1_freq
    }

    /// Forward FFT with 1/sqrt(m) scaling.
    pub(crate) fn fft(&self, buffer: &mut [Complex<f32>]) {
        self.fft_forward.process(buffer);
        let norm = 1.0 / (self.subcarriers as f32).sqrt();
        for s in buffer {
            *s *= norm;
        }
    }

    /// Inverse FFT with 1/sqrt(m) scaling.
    pub(crate) fn ifft(&self, buffer: &mut [Complex<f32>]) {
        self.fft_inverse.process(buffer);
        let norm = 1.0 / (self.subcarriers as f32).sqrt();
        for s in buffer {
            *s *= norm;
        }
    }
}

/// Deterministic subcarrier allocation: a null at DC, guard nulls around
/// the Nyquist edge, evenly spread pilots, data everywhere else.
fn allocate_bins(m: usize) -> (Vec<usize>, Vec<usize>) {
    let guard = (m / 16).max(2);
    let lo = m / 2 - guard;
    let hi = m / 2 + guard;
    let used: Vec<usize> = (1..m).filter(|&k| k < lo || k > hi).collect();
    let num_pilots = (used.len() / 9).max(2);
    let pilot_bins: Vec<usize> = (0..num_pilots)
        .map(|i| used[(2 * i + 1) * used.len() / (2 * num_pilots)])
        .collect();
    let data_bins: Vec<usize> = used
        .iter()
        .copied()
        .filter(|k| !pilot_bins.contains(k))
        .collect();
    (data_bins, pilot_bins)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_deterministic() {
        let a = OfdmParams::new(64, 16, 4);
        let b = OfdmParams::new(64, 16, 4);
        assert_eq!(a.data_bins(), b.data_bins());
        assert_eq!(a.pilot_bins(), b.pilot_bins());
    }

    #[test]
    fn test_allocation_64() {
        let p = OfdmParams::new(64, 16, 4);
        // DC and the Nyquist guard band stay empty
        assert!(!p.data_bins().contains(&0));
        assert!(!p.pilot_bins().contains(&0));
        for k in 28..=36 {
            assert!(!p.data_bins().contains(&k));
            assert!(!p.pilot_bins().contains(&k));
        }
        assert!(p.pilot_bins().len() >= 2);
        assert!(p.data_bins().len() > p.pilot_bins().len());
        assert_eq!(p.data_bins().len() + p.pilot_bins().len(), 54);
    }

    #[test]
    fn test_s0_has_half_period() {
        let p = OfdmParams::new(64, 16, 4);
        let s0 = p.s0_time();
        for i in 0..32 {
            assert!((s0[i] - s0[i + 32]).norm() < 1e-5);
        }
    }

    #[test]
    fn test_training_sequences_reproducible() {
        let a = OfdmParams::new(64, 16, 4);
        let b = OfdmParams::new(64, 16, 4);
        for (x, y) in a.s1_time().iter().zip(b.s1_time()) {
            assert_eq!(x, y);
        }
    }

    #[test]
    fn test_small_subcarrier_count() {
        let p = OfdmParams::new(16, 4, 1);
        assert!(p.pilot_bins().len() >= 2);
        assert!(!p.data_bins().is_empty());
    }
}
