//! Sample sink/source backends.
//!
//! A transfer talks to exactly one of three radio ports: the process
//! standard streams, a raw sample file, or a SoapySDR device. The port
//! hides the device's burst and MTU semantics from the pipelines: writes
//! loop until accepted, the final burst is padded and flagged, and reads
//! report a timeout as zero samples without ending the transfer.

#[cfg(feature = "hardware")]
pub mod soapy;

use crate::audio::AudioConverter;
use crate::config::Direction;
use crate::error::Error;
use num_complex::Complex;
use std::io::{Read, Write};
use std::sync::atomic::AtomicBool;

/// One of the three sample transports.
#[derive(Debug)]
pub(crate) enum RadioPort {
    Stdio {
        audio: Option<AudioConverter>,
    },
    File {
        file: std::fs::File,
        audio: Option<AudioConverter>,
    },
    #[cfg(feature = "hardware")]
    Soapy(soapy::SoapyLink),
}

/// Resolved parameters a SoapySDR port needs at open time.
#[derive(Debug, Clone)]
#[cfg_attr(
    not(feature = "hardware"),
    allow(dead_code, reason = "only read by the SDR backend")
)]
pub(crate) struct RadioSettings {
    pub sample_rate: f64,
    /// Tuning frequency: signal frequency minus the frequency offset.
    pub center_frequency: f64,
    pub gain: String,
}

impl RadioPort {
    /// Open the port described by the radio driver string.
    pub fn open(
        radio: &str,
        direction: Direction,
        settings: &RadioSettings,
        audio: Option<AudioConverter>,
    ) -> Result<Self, Error> {
        if radio.eq_ignore_ascii_case("io") || radio.is_empty() {
            return Ok(Self::Stdio { audio });
        }
        if radio.len() >= 5 && radio[..5].eq_ignore_ascii_case("file=") {
            let path = std::path::PathBuf::from(&radio[5..]);
            let file = match direction {
                Direction::Transmit => std::fs::File::create(&path),
                Direction::Receive => std::fs::File::open(&path),
            }
            .map_err(|source| Error::FileOpen { path, source })?;
            return Ok(Self::File { file, audio });
        }
        Self::open_sdr(radio, direction, settings)
    }

    #[cfg(feature = "hardware")]
    fn open_sdr(radio: &str, direction: Direction, settings: &RadioSettings) -> Result<Self, Error> {
        Ok(Self::Soapy(soapy::SoapyLink::open(radio, direction, settings)?))
    }

    #[cfg(not(feature = "hardware"))]
    fn open_sdr(_radio: &str, _direction: Direction, _settings: &RadioSettings) -> Result<Self, Error> {
        Err(Error::Radio(
            "SDR support not compiled (enable the 'hardware' feature)".to_string(),
        ))
    }

    /// Whether a zero-sample read means "no samples yet" rather than end of
    /// stream.
    pub fn is_streamed(&self) -> bool {
        match self {
            Self::Stdio { .. } | Self::File { .. } => false,
            #[cfg(feature = "hardware")]
            Self::Soapy(_) => true,
        }
    }

    /// Activate the SDR stream; a no-op for the file backends.
    pub fn activate(&mut self) -> Result<(), Error> {
        match self {
            Self::Stdio { .. } => {
                log::debug!("using IO pseudo-radio");
                Ok(())
            }
            Self::File { .. } => {
                log::debug!("using FILENAME pseudo-radio");
                Ok(())
            }
            #[cfg(feature = "hardware")]
            Self::Soapy(link) => link.activate(),
        }
    }

    /// Send a block of samples.
    ///
    /// `last` marks the end of the transmission: the SDR backend pads the
    /// burst to the device MTU, flags end-of-burst, and waits for the
    /// hardware to drain.
    pub fn transmit(
        &mut self,
        samples: &[Complex<f32>],
        last: bool,
        stop: &AtomicBool,
    ) -> std::io::Result<()> {
        match self {
            Self::Stdio { audio } => {
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                match audio {
                    Some(converter) => converter.write(&mut handle, samples)?,
                    None => write_iq(&mut handle, samples)?,
                }
                handle.flush()
            }
            Self::File { file, audio } => match audio {
                Some(converter) => converter.write(file, samples),
                None => write_iq(file, samples),
            },
            #[cfg(feature = "hardware")]
            Self::Soapy(link) => {
                link.write(samples, last, stop);
                Ok(())
            }
        }
    }

    /// Receive up to `buffer.len()` samples, returning how many were read.
    ///
    /// Zero means end of stream on the file backends and merely "nothing
    /// within the timeout" on an SDR.
    pub fn receive(
        &mut self,
        buffer: &mut [Complex<f32>],
        _stop: &AtomicBool,
    ) -> std::io::Result<usize> {
        match self {
            Self::Stdio { audio } => {
                let stdin = std::io::stdin();
                let mut handle = stdin.lock();
                match audio {
                    Some(converter) => converter.read(&mut handle, buffer),
                    None => read_iq(&mut handle, buffer),
                }
            }
            Self::File { file, audio } => match audio {
                Some(converter) => converter.read(file, buffer),
                None => read_iq(file, buffer),
            },
            #[cfg(feature = "hardware")]
            Self::Soapy(link) => Ok(link.read(buffer)),
        }
    }

    /// Deactivate and close the SDR stream; a no-op for the file backends.
    pub fn shutdown(&mut self) {
        #[cfg(feature = "hardware")]
        if let Self::Soapy(link) = self {
            link.shutdown();
        }
    }
}

/// Write samples as little-endian complex float pairs.
pub(crate) fn write_iq<W: Write>(writer: &mut W, samples: &[Complex<f32>]) -> std::io::Result<()> {
    let mut bytes = Vec::with_capacity(samples.len() * 8);
    for s in samples {
        bytes.extend_from_slice(&s.re.to_le_bytes());
        bytes.extend_from_slice(&s.im.to_le_bytes());
    }
    writer.write_all(&bytes)
}

/// Read samples as little-endian complex float pairs, stopping at EOF.
fn read_iq<R: Read>(reader: &mut R, buffer: &mut [Complex<f32>]) -> std::io::Result<usize> {
    let mut bytes = vec![0u8; buffer.len() * 8];
    let mut filled = 0;
    while filled < bytes.len() {
        match reader.read(&mut bytes[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    let count = filled / 8;
    for (i, sample) in buffer[..count].iter_mut().enumerate() {
        let re = f32::from_le_bytes(bytes[i * 8..i * 8 + 4].try_into().unwrap());
        let im = f32::from_le_bytes(bytes[i * 8 + 4..i * 8 + 8].try_into().unwrap());
        *sample = Complex::new(re, im);
    }
    Ok(count)
}

/// Print the radios SoapySDR can see, mirroring the `-h` output.
pub fn print_available_radios() {
    #[cfg(feature = "hardware")]
    soapy::print_available_radios();
    #[cfg(not(feature = "hardware"))]
    {
        log::warn!("SDR support not compiled (enable the 'hardware' feature)");
        println!("  No radio detected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iq_round_trip() {
        let samples: Vec<Complex<f32>> = (0..100)
            .map(|i| Complex::new(i as f32 * 0.01, -(i as f32) * 0.02))
            .collect();
        let mut bytes = Vec::new();
        write_iq(&mut bytes, &samples).unwrap();
        assert_eq!(bytes.len(), 800);
        let mut recovered = vec![Complex::new(0.0, 0.0); 100];
        let n = read_iq(&mut bytes.as_slice(), &mut recovered).unwrap();
        assert_eq!(n, 100);
        assert_eq!(recovered, samples);
    }

    #[test]
    fn test_read_iq_partial() {
        let bytes = [0u8; 20]; // 2.5 samples
        let mut buffer = vec![Complex::new(1.0f32, 1.0); 8];
        let n = read_iq(&mut bytes.as_slice(), &mut buffer).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let settings = RadioSettings {
            sample_rate: 2e6,
            center_frequency: 434e6,
            gain: "0".to_string(),
        };
        let result = RadioPort::open(
            "file=/nonexistent/path/samples.cf32",
            Direction::Receive,
            &settings,
            None,
        );
        assert!(matches!(result, Err(Error::FileOpen { .. })));
    }
}
