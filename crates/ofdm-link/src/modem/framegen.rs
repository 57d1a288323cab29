//! OFDM flex-frame generator.
//!
//! `assemble` modulates a complete frame into an internal sample queue;
//! `write` then drains it in caller-sized chunks, zero-padding the final
//! chunk and reporting completion, so the transmit pipeline can stream a
//! frame in fixed blocks.

use super::fec::BitReader;
use super::modulation::{Constellation, SubcarrierModulation};
use super::packet::{self, FrameInfo, HEADER_SIZE};
use super::{FecScheme, OfdmParams, S0_BLOCKS};
use num_complex::Complex;

/// Per-frame coding and modulation properties.
#[derive(Debug, Clone, Copy)]
pub struct FrameProperties {
    pub modulation: SubcarrierModulation,
    pub inner_fec: FecScheme,
    pub outer_fec: FecScheme,
}

/// Frame generator producing complex baseband samples at the modem rate.
#[derive(Debug)]
pub struct FrameGenerator {
    params: OfdmParams,
    props: FrameProperties,
    constellation: Constellation,
    header_constellation: Constellation,
    queue: Vec<Complex<f32>>,
    position: usize,
}

impl FrameGenerator {
    /// Create a generator for the given dimensioning and properties.
    pub fn new(params: OfdmParams, props: FrameProperties) -> Self {
        Self {
            constellation: Constellation::new(props.modulation),
            header_constellation: Constellation::new(SubcarrierModulation::Bpsk),
            params,
            props,
            queue: Vec::new(),
            position: 0,
        }
    }

    /// Number of samples in the currently assembled frame.
    pub fn frame_len(&self) -> usize {
        self.queue.len()
    }

    /// Modulate a frame from an 8-byte header and a payload.
    ///
    /// Replaces any previously assembled frame.
    pub fn assemble(&mut self, header: &[u8; HEADER_SIZE], payload: &[u8]) {
        let info = FrameInfo {
            payload_len: payload.len(),
            modulation: self.props.modulation,
            inner_fec: self.props.inner_fec,
            outer_fec: self.props.outer_fec,
        };
        let header_coded = packet::encode_header(header, &info);
        let payload_coded =
            packet::encode_payload(payload, self.props.inner_fec, self.props.outer_fec);
        self.queue = self.modulate(&header_coded, &payload_coded);
        self.position = 0;
    }

    /// Fill `buffer` with frame samples.
    ///
    /// Returns `true` when the frame is complete; the unused tail of the
    /// final buffer is zero-padded.
    pub fn write(&mut self, buffer: &mut [Complex<f32>]) -> bool {
        let available = self.queue.len() - self.position;
        let n = available.min(buffer.len());
        buffer[..n].copy_from_slice(&self.queue[self.position..self.position + n]);
        self.position += n;
        if self.position == self.queue.len() {
            for s in &mut buffer[n..] {
                *s = Complex::new(0.0, 0.0);
            }
            true
        } else {
            false
        }
    }

    /// Modulate coded header and payload bytes into the time-domain burst.
    fn modulate(&self, header_coded: &[u8], payload_coded: &[u8]) -> Vec<Complex<f32>> {
        let m = self.params.subcarriers();
        let cp = self.params.cyclic_prefix();
        let taper = self.params.taper();
        let data_bins = self.params.data_bins();
        let d = data_bins.len();

        let header_bits = header_coded.len() * 8;
        let header_symbols = header_bits.div_ceil(d);
        let bits_per_symbol = self.constellation.bits_per_symbol() as usize;
        let payload_bits = payload_coded.len() * 8;
        let payload_symbols = payload_bits.div_ceil(d * bits_per_symbol);
        let total_symbols = header_symbols + payload_symbols;

        let s0_len = S0_BLOCKS * m;
        let total = s0_len + (1 + total_symbols) * (m + cp) + taper;
        let mut out = vec![Complex::new(0.0, 0.0); total];

        // S0 detection preamble: repeated blocks, tapered as one region
        let mut s0_region = Vec::with_capacity(s0_len + taper);
        for _ in 0..S0_BLOCKS {
            s0_region.extend_from_slice(self.params.s0_time());
        }
        s0_region.extend_from_slice(&self.params.s0_time()[..taper]);
        overlap_add(&mut out, 0, &s0_region, taper, s0_len);

        // S1 channel estimation symbol
        let mut s1_body = self.params.s1_freq().to_vec();
        self.params.ifft(&mut s1_body);
        self.place_symbol(&mut out, s0_len, &s1_body);

        // header and payload symbols
        let mut header_reader = BitReader::new(header_coded);
        let mut payload_reader = BitReader::new(payload_coded);
        for symbol in 0..total_symbols {
            let mut freq = vec![Complex::new(0.0, 0.0); m];
            for (i, &k) in self.params.pilot_bins().iter().enumerate() {
                freq[k] = self.params.pilot_value(i, symbol);
            }
            let (constellation, reader) = if symbol < header_symbols {
                (&self.header_constellation, &mut header_reader)
            } else {
                (&self.constellation, &mut payload_reader)
            };
            let bits = constellation.bits_per_symbol();
            for &k in data_bins {
                let mut index = 0u32;
                for _ in 0..bits {
                    let bit = if reader.remaining() > 0 { reader.read() } else { false };
                    index = (index << 1) | u32::from(bit);
                }
                freq[k] = constellation.map(index as usize);
            }
            self.params.ifft(&mut freq);
            self.place_symbol(&mut out, s0_len + (1 + symbol) * (m + cp), &freq);
        }
        out
    }

    /// Overlap-add one CP-prefixed, taper-extended symbol at `offset`.
    fn place_symbol(&self, out: &mut [Complex<f32>], offset: usize, body: &[Complex<f32>]) {
        let m = self.params.subcarriers();
        let cp = self.params.cyclic_prefix();
        let taper = self.params.taper();
        let mut extended = Vec::with_capacity(cp + m + taper);
        extended.extend_from_slice(&body[m - cp..]);
        extended.extend_from_slice(body);
        extended.extend_from_slice(&body[..taper]);
        overlap_add(out, offset, &extended, taper, cp + m);
    }
}

/// Add a block into `out` at `offset`, applying a raised-cosine ramp over
/// the first `taper` samples and the samples beyond `flat_len`.
fn overlap_add(out: &mut [Complex<f32>], offset: usize, block: &[Complex<f32>], taper: usize, flat_len: usize) {
    for (i, &s) in block.iter().enumerate() {
        let w = if i < taper {
            ramp(i, taper)
        } else if i >= flat_len {
            ramp(block.len() - 1 - i, taper)
        } else {
            1.0
        };
        out[offset + i] += s * w;
    }
}

/// Raised-cosine ramp value for position `i` of `taper` samples.
fn ramp(i: usize, taper: usize) -> f32 {
    let x = std::f32::consts::PI * (i as f32 + 0.5) / (2.0 * taper as f32);
    x.sin() * x.sin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_generator() -> FrameGenerator {
        FrameGenerator::new(
            OfdmParams::new(64, 16, 4),
            FrameProperties {
                modulation: SubcarrierModulation::Qpsk,
                inner_fec: FecScheme::Hamming128,
                outer_fec: FecScheme::None,
            },
        )
    }

    #[test]
    fn test_write_reports_completion() {
        let mut gen = test_generator();
        gen.assemble(b"TEST\x00\x00\x00\x00", b"hello");
        let total = gen.frame_len();
        let mut buffer = vec![Complex::new(0.0, 0.0); 100];
        let mut produced = 0;
        let mut complete = false;
        while !complete {
            complete = gen.write(&mut buffer);
            produced += buffer.len();
        }
        assert!(produced >= total);
        assert!(produced - total < buffer.len());
    }

    #[test]
    fn test_frame_length_grows_with_payload() {
        let mut gen = test_generator();
        gen.assemble(b"\x00\x00\x00\x00\x00\x00\x00\x00", &[0u8; 16]);
        let short = gen.frame_len();
        gen.assemble(b"\x00\x00\x00\x00\x00\x00\x00\x00", &[0u8; 400]);
        let long = gen.frame_len();
        assert!(long > short);
    }

    #[test]
    fn test_preamble_repeats() {
        let mut gen = test_generator();
        gen.assemble(b"\x00\x00\x00\x00\x00\x00\x00\x00", b"payload");
        // after the initial taper ramp, S0 blocks repeat with period m/2
        let frame = &gen.queue;
        for i in 8..(3 * 64 - 32) {
            assert!((frame[i] - frame[i + 32]).norm() < 1e-4, "sample {i}");
        }
    }

    #[test]
    fn test_amplitude_bounded() {
        let mut gen = test_generator();
        gen.assemble(b"\x00\x00\x00\x00\x00\x00\x00\x00", &vec![0x35u8; 392]);
        let peak = gen.queue.iter().fold(0.0f32, |a, s| a.max(s.norm()));
        // raw OFDM peaks stay within a small factor of the RMS; the
        // transmit pipeline rescales to 0.75 afterwards
        assert!(peak > 0.1 && peak < 8.0, "peak {peak}");
    }
}
