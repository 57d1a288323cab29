//! SoapySDR device backend.
//!
//! Compiled only with the `hardware` feature so the default build carries
//! no native library dependency.

use super::RadioSettings;
use crate::config::Direction;
use crate::error::Error;
use num_complex::Complex;
use soapysdr::Direction as SoapyDirection;
use std::sync::atomic::AtomicBool;

/// Stream read/write timeout in microseconds.
const STREAM_TIMEOUT_US: i64 = 10_000;

enum StreamHalf {
    Rx(soapysdr::RxStream<Complex<f32>>),
    Tx(soapysdr::TxStream<Complex<f32>>),
}

/// An opened SoapySDR device with one configured CF32 stream.
pub(crate) struct SoapyLink {
    _device: soapysdr::Device,
    stream: StreamHalf,
    sample_rate: f64,
}

impl std::fmt::Debug for SoapyLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let direction = match self.stream {
            StreamHalf::Rx(_) => "rx",
            StreamHalf::Tx(_) => "tx",
        };
        f.debug_struct("SoapyLink")
            .field("direction", &direction)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

fn radio_error(e: soapysdr::Error) -> Error {
    Error::Radio(e.to_string())
}

impl SoapyLink {
    /// Open and configure a device from a SoapySDR args string.
    pub fn open(args: &str, direction: Direction, settings: &RadioSettings) -> Result<Self, Error> {
        let soapy_direction = match direction {
            Direction::Transmit => SoapyDirection::Tx,
            Direction::Receive => SoapyDirection::Rx,
        };
        let device = soapysdr::Device::new(args).map_err(radio_error)?;
        device
            .set_sample_rate(soapy_direction, 0, settings.sample_rate)
            .map_err(radio_error)?;
        device
            .set_frequency(soapy_direction, 0, settings.center_frequency, "")
            .map_err(radio_error)?;
        apply_gain(&device, soapy_direction, &settings.gain)?;
        let stream = match direction {
            Direction::Transmit => StreamHalf::Tx(device.tx_stream(&[0]).map_err(radio_error)?),
            Direction::Receive => StreamHalf::Rx(device.rx_stream(&[0]).map_err(radio_error)?),
        };
        Ok(Self {
            _device: device,
            stream,
            sample_rate: settings.sample_rate,
        })
    }

    /// Activate the stream.
    pub fn activate(&mut self) -> Result<(), Error> {
        match &mut self.stream {
            StreamHalf::Rx(rx) => rx.activate(None).map_err(radio_error),
            StreamHalf::Tx(tx) => tx.activate(None).map_err(radio_error),
        }
    }

    /// Read up to `buffer.len()` samples. A timeout or transient error
    /// reads as zero samples.
    pub fn read(&mut self, buffer: &mut [Complex<f32>]) -> usize {
        let StreamHalf::Rx(rx) = &mut self.stream else {
            return 0;
        };
        match rx.read(&mut [buffer], STREAM_TIMEOUT_US) {
            Ok(n) => n,
            Err(e) => {
                log::trace!("SDR read returned no samples: {e}");
                0
            }
        }
    }

    /// Write a block, retrying transient failures, honoring the stop flags.
    ///
    /// When `last` is set the remaining buffer is padded with zeros up to
    /// the device MTU and flagged end-of-burst so the hardware processes
    /// it, then the call lingers long enough for the buffer to drain (the
    /// binding exposes no stream status queries).
    pub fn write(&mut self, samples: &[Complex<f32>], last: bool, stop: &AtomicBool) {
        let StreamHalf::Tx(tx) = &mut self.stream else {
            return;
        };
        let mut sent = 0;
        while sent < samples.len() && !crate::stop_requested(stop) {
            match tx.write(&[&samples[sent..]], None, false, STREAM_TIMEOUT_US) {
                Ok(n) => sent += n,
                Err(e) => log::trace!("SDR write retrying: {e}"),
            }
        }
        if last {
            let mtu = tx.mtu().unwrap_or(4096);
            let zeros = vec![Complex::new(0.0f32, 0.0); mtu];
            let mut remaining = mtu;
            while remaining > 0 && !crate::stop_requested(stop) {
                match tx.write(&[&zeros[..remaining]], None, true, STREAM_TIMEOUT_US) {
                    Ok(n) => remaining -= n.min(remaining),
                    Err(e) => log::trace!("SDR write retrying: {e}"),
                }
            }
            let drain = std::time::Duration::from_secs_f64(mtu as f64 / self.sample_rate);
            std::thread::sleep(drain);
        }
    }

    /// Deactivate the stream.
    pub fn shutdown(&mut self) {
        let result = match &mut self.stream {
            StreamHalf::Rx(rx) => rx.deactivate(None),
            StreamHalf::Tx(tx) => tx.deactivate(None),
        };
        if let Err(e) = result {
            log::debug!("SDR stream deactivation failed: {e}");
        }
    }
}

/// Apply a gain setting: either a plain number or a comma-separated list
/// of `element=value` pairs.
fn apply_gain(device: &soapysdr::Device, direction: SoapyDirection, gain: &str) -> Result<(), Error> {
    if gain.contains('=') {
        for part in gain.split(',') {
            let (name, value) = part
                .split_once('=')
                .ok_or_else(|| Error::invalid("gain", format!("malformed element '{part}'")))?;
            let value: f64 = value
                .parse()
                .map_err(|_| Error::invalid("gain", format!("malformed value '{part}'")))?;
            device
                .set_gain_element(direction, 0, name, value)
                .map_err(radio_error)?;
        }
        Ok(())
    } else {
        let value: f64 = gain
            .parse()
            .map_err(|_| Error::invalid("gain", format!("'{gain}' is not a number")))?;
        device.set_gain(direction, 0, value).map_err(radio_error)
    }
}

/// Print the devices SoapySDR can enumerate.
pub(crate) fn print_available_radios() {
    match soapysdr::enumerate("") {
        Ok(devices) if devices.is_empty() => println!("  No radio detected"),
        Ok(devices) => {
            for args in devices {
                let driver = args.get("driver").unwrap_or("unknown");
                let serial = args.get("serial").unwrap_or("");
                // keep serial output short like other SDR tools do
                let tail = if serial.len() > 8 {
                    &serial[serial.len() - 8..]
                } else {
                    serial
                };
                println!("  - driver={driver},serial={tail}");
            }
        }
        Err(e) => {
            log::warn!("SDR enumeration failed: {e}");
            println!("  No radio detected");
        }
    }
}
