//! Audio sample adapter.
//!
//! Maps between complex baseband samples and a 16-bit little-endian stereo
//! PCM stream at twice the IQ rate via a FIR Hilbert transformer pair, so
//! a single-sideband transceiver can feed its audio straight into the
//! pipeline.

use crate::dsp::FirHilbert;
use num_complex::Complex;
use std::io::{Read, Write};

/// Hilbert filter semi-length; the prototype has `4 * 25 + 1` taps.
const FILTER_SEMI_LENGTH: usize = 25;

/// Converter between complex samples and stereo PCM.
#[derive(Debug)]
pub(crate) struct AudioConverter {
    hilbert: FirHilbert,
}

impl AudioConverter {
    pub fn new() -> Self {
        Self {
            hilbert: FirHilbert::new(FILTER_SEMI_LENGTH, 60.0),
        }
    }

    /// Convert samples to audio and write them out.
    pub fn write<W: Write>(&mut self, writer: &mut W, samples: &[Complex<f32>]) -> std::io::Result<()> {
        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for &s in samples {
            let pair = self.hilbert.interp(s);
            for value in pair {
                let pcm = (value * 32767.0).clamp(-32768.0, 32767.0) as i16;
                bytes.extend_from_slice(&pcm.to_le_bytes());
            }
        }
        writer.write_all(&bytes)
    }

    /// Read audio and convert it to samples; stops early at EOF.
    pub fn read<R: Read>(&mut self, reader: &mut R, buffer: &mut [Complex<f32>]) -> std::io::Result<usize> {
        let mut frame = [0u8; 4];
        let mut count = 0;
        while count < buffer.len() {
            if !read_frame(reader, &mut frame)? {
                break;
            }
            let left = i16::from_le_bytes([frame[0], frame[1]]) as f32 / 32768.0;
            let right = i16::from_le_bytes([frame[2], frame[3]]) as f32 / 32768.0;
            buffer[count] = self.hilbert.decim([left, right]);
            count += 1;
        }
        Ok(count)
    }
}

/// Read one full stereo frame; false on clean EOF.
fn read_frame<R: Read>(reader: &mut R, frame: &mut [u8; 4]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < 4 {
        match reader.read(&mut frame[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_round_trip_preserves_signal() {
        let mut tx = AudioConverter::new();
        let mut rx = AudioConverter::new();
        let input: Vec<Complex<f32>> = (0..3000)
            .map(|i| {
                let phase = std::f64::consts::TAU * 0.01 * i as f64;
                Complex::new(phase.cos() as f32, phase.sin() as f32) * 0.5
            })
            .collect();
        let mut audio = Vec::new();
        tx.write(&mut audio, &input).unwrap();
        assert_eq!(audio.len(), input.len() * 4);
        let mut output = vec![Complex::new(0.0, 0.0); input.len()];
        let n = rx.read(&mut audio.as_slice(), &mut output).unwrap();
        assert_eq!(n, input.len());
        // steady state matches a delayed copy of the input
        let delay = 2 * FILTER_SEMI_LENGTH;
        let mut max_err = 0.0f32;
        for i in 500..2500 {
            max_err = max_err.max((output[i] - input[i - delay]).norm());
        }
        assert!(max_err < 0.03, "max error {max_err}");
    }

    #[test]
    fn test_read_handles_partial_frame() {
        let mut rx = AudioConverter::new();
        let bytes = [0u8; 10]; // 2.5 stereo frames
        let mut buffer = vec![Complex::new(0.0, 0.0); 8];
        let n = rx.read(&mut bytes.as_slice(), &mut buffer).unwrap();
        assert_eq!(n, 2);
    }
}
