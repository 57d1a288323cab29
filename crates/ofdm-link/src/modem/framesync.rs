//! OFDM flex-frame synchronizer.
//!
//! Streaming state machine: detect the repeated preamble with a
//! Schmidl-Cox correlator (which also yields the coarse carrier frequency
//! offset), align on the training symbol by cross-correlation, estimate the
//! per-bin channel from it, then walk the header and payload symbols with
//! pilot-based common phase correction. Every completed frame is handed to
//! the caller's callback, valid or not.

use super::modulation::{Constellation, SubcarrierModulation};
use super::packet::{self, FrameInfo, HEADER_SIZE};
use super::{OfdmParams, S0_BLOCKS};
use num_complex::Complex;
use std::f64::consts::TAU;

/// Detection threshold for the normalized preamble correlation.
const DETECT_THRESHOLD: f32 = 0.5;

/// Acceptance threshold for the normalized training correlation.
const ALIGN_THRESHOLD: f32 = 0.5;

/// Signal quality figures for a received frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    /// Mean signal power over the training symbol, in dB full scale.
    pub rssi: f32,
    /// Estimated carrier frequency offset in radians/sample.
    pub cfo: f32,
}

/// A demodulated frame delivered to the receive callback.
#[derive(Debug)]
pub struct FrameEvent<'a> {
    /// The 8 header bytes; garbage when `header_valid` is false.
    pub header: [u8; HEADER_SIZE],
    /// Whether the header passed its CRC.
    pub header_valid: bool,
    /// Payload bytes; empty when the header was unusable.
    pub payload: &'a [u8],
    /// Whether the payload passed its CRC.
    pub payload_valid: bool,
    /// Signal quality figures.
    pub stats: FrameStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Seek,
    Align,
    Symbols,
}

#[derive(Debug)]
enum DecodePhase {
    Header,
    Payload {
        info: FrameInfo,
        constellation: Constellation,
        total_bits: usize,
    },
}

/// Streaming OFDM frame synchronizer.
#[derive(Debug)]
pub struct FrameSynchronizer {
    params: OfdmParams,
    header_constellation: Constellation,
    buf: Vec<Complex<f32>>,
    state: State,
    // carrier correction, applied from the detection point on
    cfo: f64,
    phase0: f64,
    // per-frame context
    chan: Vec<Complex<f32>>,
    bits: Vec<bool>,
    symbol_index: usize,
    decode_phase: DecodePhase,
    header_bytes: [u8; HEADER_SIZE],
    stats: FrameStats,
    payload: Vec<u8>,
}

impl FrameSynchronizer {
    /// Create a synchronizer for the given dimensioning.
    pub fn new(params: OfdmParams) -> Self {
        let m = params.subcarriers();
        Self {
            header_constellation: Constellation::new(SubcarrierModulation::Bpsk),
            params,
            buf: Vec::new(),
            state: State::Seek,
            cfo: 0.0,
            phase0: 0.0,
            chan: vec![Complex::new(1.0, 0.0); m],
            bits: Vec::new(),
            symbol_index: 0,
            decode_phase: DecodePhase::Header,
            header_bytes: [0; HEADER_SIZE],
            stats: FrameStats::default(),
            payload: Vec::new(),
        }
    }

    /// Whether a frame is currently being detected or decoded.
    pub fn is_frame_open(&self) -> bool {
        self.state != State::Seek
    }

    /// Process a block of samples, invoking `callback` for each completed
    /// frame.
    pub fn execute<F: FnMut(FrameEvent<'_>)>(&mut self, samples: &[Complex<f32>], callback: &mut F) {
        self.buf.extend_from_slice(samples);
        loop {
            let progressed = match self.state {
                State::Seek => self.seek_step(),
                State::Align => self.align_step(),
                State::Symbols => self.symbols_step(callback),
            };
            if !progressed {
                break;
            }
        }
    }

    fn consume(&mut self, count: usize) {
        self.buf.drain(..count);
        self.phase0 = (self.phase0 + self.cfo * count as f64).rem_euclid(TAU);
    }

    /// CFO-corrected sample at buffer offset `index`.
    fn corrected(&self, index: usize) -> Complex<f32> {
        let phase = -(self.phase0 + self.cfo * index as f64);
        let (sin, cos) = phase.sin_cos();
        self.buf[index] * Complex::new(cos as f32, sin as f32)
    }

    /// Look for the half-period repetition of the S0 preamble at the head
    /// of the buffer.
    fn seek_step(&mut self) -> bool {
        let m = self.params.subcarriers();
        let half = m / 2;
        if self.buf.len() < m {
            return false;
        }
        let mut corr = Complex::new(0.0f32, 0.0);
        let mut energy_a = 0.0f32;
        let mut energy_b = 0.0f32;
        for i in 0..half {
            corr += self.buf[i] * self.buf[i + half].conj();
            energy_a += self.buf[i].norm_sqr();
            energy_b += self.buf[i + half].norm_sqr();
        }
        let denom = energy_a * energy_b;
        let metric = if denom > 1e-12 { corr.norm_sqr() / denom } else { 0.0 };
        if metric > DETECT_THRESHOLD * DETECT_THRESHOLD {
            // repeated halves rotate by cfo * half between them
            self.cfo = -f64::from(corr.arg()) / half as f64;
            self.phase0 = 0.0;
            self.state = State::Align;
        } else {
            self.consume(1);
        }
        true
    }

    /// Locate the S1 training symbol by cross-correlation and estimate the
    /// channel from it.
    fn align_step(&mut self) -> bool {
        let m = self.params.subcarriers();
        let cp = self.params.cyclic_prefix();
        // the detector can fire up to half a block early
        let search = S0_BLOCKS * m + cp + m / 2 + 4;
        if self.buf.len() < search + m + 1 {
            return false;
        }
        let s1 = self.params.s1_time().to_vec();
        let s1_energy: f32 = s1.iter().map(|s| s.norm_sqr()).sum();
        let mut best_tau = 0;
        let mut best_norm = 0.0f32;
        for tau in 0..=search {
            let mut corr = Complex::new(0.0f32, 0.0);
            let mut energy = 0.0f32;
            for (i, &reference) in s1.iter().enumerate() {
                let sample = self.corrected(tau + i);
                corr += sample * reference.conj();
                energy += sample.norm_sqr();
            }
            let denom = energy * s1_energy;
            if denom > 1e-12 {
                let norm = corr.norm_sqr() / denom;
                if norm > best_norm {
                    best_norm = norm;
                    best_tau = tau;
                }
            }
        }
        let backoff = self.params.body_backoff();
        if best_norm < ALIGN_THRESHOLD * ALIGN_THRESHOLD || best_tau < backoff {
            // false detection; skip ahead and resume scanning
            self.consume(m);
            self.reset();
            return true;
        }
        let start = best_tau - backoff;
        let mut window: Vec<Complex<f32>> = (0..m).map(|i| self.corrected(start + i)).collect();
        self.params.fft(&mut window);
        let s1_freq = self.params.s1_freq();
        for k in self.params.data_bins().iter().chain(self.params.pilot_bins()) {
            self.chan[*k] = window[*k] / s1_freq[*k];
        }
        let power: f32 = (0..m).map(|i| self.buf[best_tau + i].norm_sqr()).sum::<f32>() / m as f32;
        self.stats = FrameStats {
            rssi: 10.0 * power.max(1e-12).log10(),
            cfo: self.cfo as f32,
        };
        self.consume(start + m);
        self.bits.clear();
        self.symbol_index = 0;
        self.decode_phase = DecodePhase::Header;
        self.state = State::Symbols;
        true
    }

    /// Demodulate data symbols until the header or payload completes.
    fn symbols_step<F: FnMut(FrameEvent<'_>)>(&mut self, callback: &mut F) -> bool {
        let m = self.params.subcarriers();
        let cp = self.params.cyclic_prefix();
        loop {
            if self.buf.len() < cp + m {
                return false;
            }
            let mut window: Vec<Complex<f32>> = (0..m).map(|i| self.corrected(cp + i)).collect();
            self.params.fft(&mut window);

            // pilot common phase
            let mut reference = Complex::new(0.0f32, 0.0);
            for (i, &k) in self.params.pilot_bins().iter().enumerate() {
                let expected = self.chan[k] * self.params.pilot_value(i, self.symbol_index);
                reference += window[k] * expected.conj();
            }
            let rotation = if reference.norm() > 1e-9 {
                reference.conj() / reference.norm()
            } else {
                Complex::new(1.0, 0.0)
            };

            let decoding_header = matches!(self.decode_phase, DecodePhase::Header);
            let symbol_bits = {
                let constellation = match &self.decode_phase {
                    DecodePhase::Header => &self.header_constellation,
                    DecodePhase::Payload { constellation, .. } => constellation,
                };
                let bits = constellation.bits_per_symbol();
                let mut collected =
                    Vec::with_capacity(self.params.data_bins().len() * bits as usize);
                for &k in self.params.data_bins() {
                    let gain = self.chan[k];
                    let equalized = if gain.norm_sqr() > 1e-12 {
                        window[k] / gain * rotation
                    } else {
                        window[k] * rotation
                    };
                    let index = constellation.demap(equalized);
                    for b in (0..bits).rev() {
                        collected.push((index >> b) & 1 == 1);
                    }
                }
                collected
            };
            self.bits.extend_from_slice(&symbol_bits);
            self.consume(cp + m);
            self.symbol_index += 1;

            if decoding_header {
                let needed = packet::header_coded_len() * 8;
                if self.bits.len() < needed {
                    continue;
                }
                self.bits.truncate(needed);
                let coded = packet::pack_bits(&self.bits);
                let (header, info) = packet::decode_header(&coded);
                self.header_bytes = header;
                match info {
                    Some(info) => {
                        let total_bits = packet::payload_coded_len(
                            info.payload_len,
                            info.inner_fec,
                            info.outer_fec,
                        ) * 8;
                        self.decode_phase = DecodePhase::Payload {
                            constellation: Constellation::new(info.modulation),
                            info,
                            total_bits,
                        };
                        self.bits.clear();
                    }
                    None => {
                        callback(FrameEvent {
                            header: self.header_bytes,
                            header_valid: false,
                            payload: &[],
                            payload_valid: false,
                            stats: self.stats,
                        });
                        self.reset();
                        return true;
                    }
                }
            } else {
                let (info, total_bits) = match &self.decode_phase {
                    DecodePhase::Payload { info, total_bits, .. } => (*info, *total_bits),
                    DecodePhase::Header => unreachable!(),
                };
                if self.bits.len() < total_bits {
                    continue;
                }
                self.bits.truncate(total_bits);
                let coded = packet::pack_bits(&self.bits);
                let (payload, payload_valid) = packet::decode_payload(
                    &coded,
                    info.payload_len,
                    info.inner_fec,
                    info.outer_fec,
                );
                self.payload = payload;
                callback(FrameEvent {
                    header: self.header_bytes,
                    header_valid: true,
                    payload: &self.payload,
                    payload_valid,
                    stats: self.stats,
                });
                self.reset();
                return true;
            }
        }
    }

    fn reset(&mut self) {
        self.state = State::Seek;
        self.cfo = 0.0;
        self.phase0 = 0.0;
        self.bits.clear();
        self.symbol_index = 0;
        self.decode_phase = DecodePhase::Header;
    }
}
