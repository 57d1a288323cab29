// Copyright 2026 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The transfer object: configuration validation, the byte source/sink
//! model, and the transmit and receive pipelines.

use crate::audio::AudioConverter;
use crate::config::{Direction, TransferConfig};
use crate::dsp::{MultistageResampler, Nco};
use crate::error::Error;
use crate::modem::{
    FecScheme, FrameEvent, FrameGenerator, FrameProperties, FrameSynchronizer, OfdmParams,
    SubcarrierModulation, HEADER_SIZE,
};
use crate::radio::{write_iq, RadioPort, RadioSettings};
use crate::{clear_stop_all, is_verbose, stop_requested};
use num_complex::Complex;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of pulling bytes from a [`ByteSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    /// `n` bytes were written into the buffer.
    Data(usize),
    /// Nothing available right now; the pipeline keeps the radio fed and
    /// asks again.
    Pending,
    /// End of stream; the pipeline flushes and stops.
    End,
}

/// Supplies payload bytes to a transmitting transfer.
pub trait ByteSource: Send {
    /// Fill up to `buffer.len()` bytes.
    fn pull(&mut self, buffer: &mut [u8]) -> Pull;
}

/// Receives payload bytes from a receiving transfer.
pub trait ByteSink: Send {
    /// Accept a decoded payload. The return value is reserved; the core
    /// currently ignores it.
    fn push(&mut self, payload: &[u8]) -> std::io::Result<usize>;
}

/// The data end of a transfer: a source when transmitting, a sink when
/// receiving.
pub enum DataEndpoint {
    Source(Box<dyn ByteSource>),
    Sink(Box<dyn ByteSink>),
}

impl std::fmt::Debug for DataEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source(_) => f.write_str("DataEndpoint::Source"),
            Self::Sink(_) => f.write_str("DataEndpoint::Sink"),
        }
    }
}

/// Default byte source reading from a file or standard input.
struct ReaderSource<R: Read + Send>(R);

impl<R: Read + Send> ByteSource for ReaderSource<R> {
    fn pull(&mut self, buffer: &mut [u8]) -> Pull {
        match self.0.read(buffer) {
            Ok(0) => Pull::End,
            Ok(n) => Pull::Data(n),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Pull::Pending,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Pull::Pending,
            Err(e) => {
                log::error!("data source read failed: {e}");
                Pull::End
            }
        }
    }
}

/// Default byte sink writing to a file or standard output.
struct WriterSink<W: Write + Send> {
    writer: W,
    flush: bool,
}

impl<W: Write + Send> ByteSink for WriterSink<W> {
    fn push(&mut self, payload: &[u8]) -> std::io::Result<usize> {
        self.writer.write_all(payload)?;
        if self.flush {
            self.writer.flush()?;
        }
        Ok(payload.len())
    }
}

/// Cloneable handle that stops one transfer; safe to use from a signal
/// handler thread.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Request the transfer to stop at the next block boundary.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// A configured transfer, ready to be started.
#[derive(Debug)]
pub struct Transfer {
    direction: Direction,
    radio: RadioPort,
    endpoint: DataEndpoint,
    dump: Option<BufWriter<File>>,
    stop: Arc<AtomicBool>,
    sample_rate: u64,
    bit_rate: u32,
    frequency: u64,
    frequency_offset: i64,
    subcarrier_modulation: SubcarrierModulation,
    subcarriers: u32,
    cyclic_prefix_length: u32,
    taper_length: u32,
    inner_fec: FecScheme,
    outer_fec: FecScheme,
    id: [u8; 4],
    timeout: u32,
    last_frame_time: Instant,
}

impl Transfer {
    /// Create a transfer with the default data callbacks bound to
    /// `config.file` (or the standard streams).
    pub fn new(config: TransferConfig) -> Result<Self, Error> {
        let endpoint = match config.direction {
            Direction::Transmit => {
                let reader: Box<dyn ByteSource> = match &config.file {
                    Some(path) => Box::new(ReaderSource(File::open(path).map_err(|source| {
                        Error::FileOpen {
                            path: path.clone(),
                            source,
                        }
                    })?)),
                    None => Box::new(ReaderSource(std::io::stdin())),
                };
                DataEndpoint::Source(reader)
            }
            Direction::Receive => {
                let writer: Box<dyn ByteSink> = match &config.file {
                    Some(path) => Box::new(WriterSink {
                        writer: File::create(path).map_err(|source| Error::FileOpen {
                            path: path.clone(),
                            source,
                        })?,
                        flush: false,
                    }),
                    None => Box::new(WriterSink {
                        writer: std::io::stdout(),
                        flush: true,
                    }),
                };
                DataEndpoint::Sink(writer)
            }
        };
        Self::with_data(config, endpoint)
    }

    /// Create a transfer with a caller-supplied data source or sink.
    pub fn with_data(config: TransferConfig, endpoint: DataEndpoint) -> Result<Self, Error> {
        match (config.direction, &endpoint) {
            (Direction::Transmit, DataEndpoint::Source(_))
            | (Direction::Receive, DataEndpoint::Sink(_)) => {}
            _ => {
                return Err(Error::invalid(
                    "data endpoint",
                    "endpoint kind does not match the transfer direction",
                ))
            }
        }

        if config.sample_rate == 0 {
            return Err(Error::invalid("sample rate", "must not be zero"));
        }
        let ppm_scale = (1e6 - f64::from(config.ppm)) / 1e6;
        let mut sample_rate = (config.sample_rate as f64 * ppm_scale).round() as u64;

        if config.frequency == 0 {
            return Err(Error::invalid("frequency", "must not be zero"));
        }
        let mut frequency = (config.frequency as f64 * ppm_scale).round() as u64;
        let mut frequency_offset = config.frequency_offset;

        let is_file_backed = config.radio.is_empty()
            || config.radio.eq_ignore_ascii_case("io")
            || (config.radio.len() >= 5 && config.radio[..5].eq_ignore_ascii_case("file="));
        let audio = if config.audio {
            if !is_file_backed {
                return Err(Error::invalid(
                    "audio",
                    "this radio type only supports IQ samples",
                ));
            }
            // audio samples run at twice the IQ rate, and 0 Hz audio
            // corresponds to -sample_rate/2 in baseband
            sample_rate /= 2;
            frequency_offset = frequency as i64 - (sample_rate / 2) as i64;
            frequency = 0;
            Some(AudioConverter::new())
        } else {
            None
        };

        if config.bit_rate == 0 {
            return Err(Error::invalid("bit rate", "must not be zero"));
        }

        let subcarrier_modulation = SubcarrierModulation::from_name(&config.subcarrier_modulation)
            .ok_or_else(|| {
                Error::invalid(
                    "subcarrier modulation",
                    format!("unknown scheme '{}'", config.subcarrier_modulation),
                )
            })?;

        if config.subcarriers == 0 {
            return Err(Error::invalid("subcarriers", "must not be zero"));
        }
        if config.subcarriers < 16 || config.subcarriers % 2 != 0 {
            return Err(Error::invalid(
                "subcarriers",
                "must be an even number of at least 16",
            ));
        }
        if config.cyclic_prefix_length > config.subcarriers {
            return Err(Error::invalid(
                "cyclic prefix length",
                "must not exceed the subcarrier count",
            ));
        }
        if config.taper_length > config.cyclic_prefix_length {
            return Err(Error::invalid(
                "taper length",
                "must not exceed the cyclic prefix length",
            ));
        }

        let inner_fec = FecScheme::from_name(&config.inner_fec).ok_or_else(|| {
            Error::invalid("inner FEC", format!("unknown scheme '{}'", config.inner_fec))
        })?;
        let outer_fec = FecScheme::from_name(&config.outer_fec).ok_or_else(|| {
            Error::invalid("outer FEC", format!("unknown scheme '{}'", config.outer_fec))
        })?;

        if config.id.len() > 4 {
            return Err(Error::invalid("id", "must be at most 4 bytes long"));
        }
        let mut id = [0u8; 4];
        id[..config.id.len()].copy_from_slice(config.id.as_bytes());

        let dump = match &config.dump {
            Some(path) => Some(BufWriter::new(File::create(path).map_err(|source| {
                Error::FileOpen {
                    path: path.clone(),
                    source,
                }
            })?)),
            None => None,
        };

        let settings = RadioSettings {
            sample_rate: sample_rate as f64,
            center_frequency: frequency as f64 - frequency_offset as f64,
            gain: config.gain.clone(),
        };
        let radio = RadioPort::open(&config.radio, config.direction, &settings, audio)?;

        Ok(Self {
            direction: config.direction,
            radio,
            endpoint,
            dump,
            stop: Arc::new(AtomicBool::new(false)),
            sample_rate,
            bit_rate: config.bit_rate,
            frequency,
            frequency_offset,
            subcarrier_modulation,
            subcarriers: config.subcarriers,
            cyclic_prefix_length: config.cyclic_prefix_length,
            taper_length: config.taper_length,
            inner_fec,
            outer_fec,
            id,
            timeout: config.timeout,
            last_frame_time: Instant::now(),
        })
    }

    /// Effective sample rate after ppm correction (and audio halving).
    pub fn sample_rate(&self) -> u64 {
        self.sample_rate
    }

    /// Effective frequency after ppm correction.
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Effective frequency offset.
    pub fn frequency_offset(&self) -> i64 {
        self.frequency_offset
    }

    /// Transfer direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Run the transfer until the data ends, the timeout fires, or a stop
    /// flag is raised. May be called again after it returns.
    pub fn start(&mut self) -> Result<(), Error> {
        clear_stop_all();
        self.stop.store(false, Ordering::Relaxed);
        self.radio.activate()?;
        self.last_frame_time = Instant::now();
        match self.direction {
            Direction::Transmit => self.send_frames(),
            Direction::Receive => self.receive_frames(),
        }
    }

    /// Request this transfer to stop at the next block boundary.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// A handle other threads (or signal handlers) can use to stop this
    /// transfer.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    fn stopped(&self) -> bool {
        stop_requested(&self.stop)
    }

    fn ofdm_params(&self) -> OfdmParams {
        OfdmParams::new(
            self.subcarriers as usize,
            self.cyclic_prefix_length as usize,
            self.taper_length as usize,
        )
    }

    fn send_to_radio(&mut self, samples: &[Complex<f32>], last: bool) -> Result<(), Error> {
        if let Some(dump) = &mut self.dump {
            write_iq(dump, samples)?;
        }
        self.radio.transmit(samples, last, &self.stop)?;
        Ok(())
    }

    /// Push zeros through the resampler and mixer to drain their delay,
    /// keeping the radio fed during underruns and at the end of the
    /// transmission.
    fn send_dummy_samples(
        &mut self,
        resampler: &mut MultistageResampler,
        oscillator: &mut Nco,
        delay: usize,
        last: bool,
    ) -> Result<(), Error> {
        let zero = [Complex::new(0.0f32, 0.0)];
        let mut samples = Vec::new();
        for i in 0..delay {
            if self.stopped() {
                break;
            }
            samples.clear();
            resampler.execute(&zero, &mut samples);
            if self.frequency_offset != 0 {
                oscillator.mix_up(&mut samples);
            }
            self.send_to_radio(&samples, last && i + 1 == delay)?;
        }
        Ok(())
    }

    /// The transmit pipeline.
    fn send_frames(&mut self) -> Result<(), Error> {
        let bits_per_symbol = self.subcarrier_modulation.bits_per_symbol();
        let samples_per_bit = 2.0 / f64::from(bits_per_symbol);
        let resampling_ratio =
            self.sample_rate as f64 / (f64::from(self.bit_rate) * samples_per_bit);
        let mut resampler = MultistageResampler::new(resampling_ratio, 60.0);
        let delay = resampler.delay().ceil() as usize;
        let byte_rate = f64::from(self.bit_rate)
            * f64::from(self.inner_fec.rate())
            * f64::from(self.outer_fec.rate())
            / 8.0;
        // Aim for frames of about 500 ms carrying at least 8 payload bytes;
        // the header length field caps the payload at 16 bits
        let payload_size = if byte_rate / 2.0 > (HEADER_SIZE + 8) as f64 {
            ((byte_rate / 2.0) as usize - HEADER_SIZE).min(usize::from(u16::MAX))
        } else {
            8
        };
        // Process data by blocks of 50 ms
        let frame_samples_size =
            ((f64::from(self.bit_rate) * samples_per_bit) / 20.0).ceil() as usize;
        let mut oscillator = Nco::new(
            std::f64::consts::TAU * self.frequency_offset as f64 / self.sample_rate as f64,
        );
        let mut generator = FrameGenerator::new(
            self.ofdm_params(),
            FrameProperties {
                modulation: self.subcarrier_modulation,
                inner_fec: self.inner_fec,
                outer_fec: self.outer_fec,
            },
        );
        let mut header = [0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&self.id);
        let mut counter: u32 = 0;
        set_counter(&mut header, counter);

        let mut payload = vec![0u8; payload_size];
        let mut frame_samples = vec![Complex::new(0.0f32, 0.0); frame_samples_size];
        let mut samples =
            Vec::with_capacity(((frame_samples_size + delay) as f64 * resampling_ratio).ceil() as usize);

        while !self.stopped() {
            let pulled = match &mut self.endpoint {
                DataEndpoint::Source(source) => source.pull(&mut payload),
                DataEndpoint::Sink(_) => unreachable!("validated at construction"),
            };
            match pulled {
                Pull::End => break,
                Pull::Pending | Pull::Data(0) => {
                    // Underrun: drain the filters so the radio keeps
                    // getting samples while the source catches up
                    self.send_dummy_samples(&mut resampler, &mut oscillator, delay, false)?;
                }
                Pull::Data(n) => {
                    let n = n.min(payload.len());
                    generator.assemble(&header, &payload[..n]);
                    let mut complete = false;
                    while !complete && !self.stopped() {
                        complete = generator.write(&mut frame_samples);
                        // don't send the trailing padding
                        let mut len = frame_samples.len();
                        while len > 0 && frame_samples[len - 1] == Complex::new(0.0, 0.0) {
                            len -= 1;
                        }
                        // Scale down so that the frame generator and the
                        // resampler cannot push the amplitude above full
                        // scale
                        let mut maximum_amplitude = 1.0f32;
                        for s in &frame_samples[..len] {
                            maximum_amplitude = maximum_amplitude.max(s.norm());
                        }
                        let scale = 0.75 / maximum_amplitude;
                        for s in &mut frame_samples[..len] {
                            *s *= scale;
                        }
                        samples.clear();
                        resampler.execute(&frame_samples[..len], &mut samples);
                        if self.frequency_offset != 0 {
                            oscillator.mix_up(&mut samples);
                        }
                        self.send_to_radio(&samples, false)?;
                    }
                    counter = counter.wrapping_add(1);
                    set_counter(&mut header, counter);
                }
            }
        }

        // Drain the remaining output samples caused by the filter delays
        self.send_dummy_samples(&mut resampler, &mut oscillator, delay, true)
    }

    /// The receive pipeline.
    fn receive_frames(&mut self) -> Result<(), Error> {
        let bits_per_symbol = self.subcarrier_modulation.bits_per_symbol();
        let samples_per_bit = 2.0 / f64::from(bits_per_symbol);
        let resampling_ratio =
            (f64::from(self.bit_rate) * samples_per_bit) / self.sample_rate as f64;
        let mut resampler = MultistageResampler::new(resampling_ratio, 60.0);
        let delay = resampler.delay().ceil() as usize;
        // Process data by blocks of 50 ms
        let frame_samples_size =
            ((f64::from(self.bit_rate) * samples_per_bit) / 20.0).ceil() as usize;
        let samples_size = (frame_samples_size as f64 / resampling_ratio).floor() as usize;
        let mut oscillator = Nco::new(
            std::f64::consts::TAU * self.frequency_offset as f64 / self.sample_rate as f64,
        );
        let mut synchronizer = FrameSynchronizer::new(self.ofdm_params());

        let mut samples = vec![Complex::new(0.0f32, 0.0); samples_size];
        let mut frame_samples: Vec<Complex<f32>> = Vec::with_capacity(frame_samples_size + delay);

        while !self.stopped() {
            let n = self.radio.receive(&mut samples, &self.stop)?;
            if n == 0 && !self.radio.is_streamed() {
                break;
            }
            if self.timeout > 0
                && self.last_frame_time.elapsed() > Duration::from_secs(u64::from(self.timeout))
            {
                if is_verbose() {
                    log::debug!("Timeout: {} s without frames", self.timeout);
                }
                break;
            }
            if let Some(dump) = &mut self.dump {
                write_iq(dump, &samples[..n])?;
            }
            if self.frequency_offset != 0 {
                oscillator.mix_down(&mut samples[..n]);
            }
            frame_samples.clear();
            resampler.execute(&samples[..n], &mut frame_samples);
            let id = self.id;
            let last_frame_time = &mut self.last_frame_time;
            let endpoint = &mut self.endpoint;
            synchronizer.execute(&frame_samples, &mut |event| {
                *last_frame_time = Instant::now();
                deliver_frame(&id, endpoint, &event);
            });
        }

        // Flush the resampler delay, then close any frame the synchronizer
        // still has open
        let zeros = vec![Complex::new(0.0f32, 0.0); delay];
        frame_samples.clear();
        resampler.execute(&zeros, &mut frame_samples);
        let id = self.id;
        let last_frame_time = &mut self.last_frame_time;
        let endpoint = &mut self.endpoint;
        synchronizer.execute(&frame_samples, &mut |event| {
            *last_frame_time = Instant::now();
            deliver_frame(&id, endpoint, &event);
        });
        let zero = [Complex::new(0.0f32, 0.0)];
        while synchronizer.is_frame_open() {
            synchronizer.execute(&zero, &mut |event| {
                *last_frame_time = Instant::now();
                deliver_frame(&id, endpoint, &event);
            });
        }
        Ok(())
    }
}

impl Drop for Transfer {
    fn drop(&mut self) {
        self.radio.shutdown();
    }
}

/// Store the frame counter in header bytes 4..8, big-endian.
fn set_counter(header: &mut [u8; HEADER_SIZE], counter: u32) {
    header[4..8].copy_from_slice(&counter.to_be_bytes());
}

/// Read the frame counter from header bytes 4..8.
fn get_counter(header: &[u8; HEADER_SIZE]) -> u32 {
    u32::from_be_bytes(header[4..8].try_into().unwrap())
}

/// Validate a received frame and forward its payload to the sink.
fn deliver_frame(id: &[u8; 4], endpoint: &mut DataEndpoint, event: &FrameEvent<'_>) {
    let counter = get_counter(&event.header);
    let frame_id: [u8; 4] = event.header[..4].try_into().unwrap();
    if !event.header_valid || !event.payload_valid {
        if is_verbose() {
            if !event.header_valid {
                log::debug!(
                    "Frame {counter} for '{}': corrupted header",
                    id_display(&frame_id)
                );
            }
            if !event.payload_valid {
                log::debug!(
                    "Frame {counter} for '{}': corrupted payload",
                    id_display(&frame_id)
                );
            }
        }
        return;
    }
    if frame_id != *id {
        if is_verbose() {
            log::debug!("Frame {counter} for '{}': ignored", id_display(&frame_id));
        }
        return;
    }
    if let DataEndpoint::Sink(sink) = endpoint {
        if let Err(e) = sink.push(event.payload) {
            log::error!("data sink write failed: {e}");
        }
    }
}

/// Printable form of a frame id, NUL padding stripped.
fn id_display(id: &[u8; 4]) -> String {
    let end = id.iter().position(|&b| b == 0).unwrap_or(4);
    String::from_utf8_lossy(&id[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TransferConfig {
        TransferConfig {
            radio: "io".to_string(),
            ..TransferConfig::default()
        }
    }

    #[test]
    fn test_rejects_zero_sample_rate() {
        let cfg = TransferConfig {
            sample_rate: 0,
            ..config()
        };
        assert!(matches!(
            Transfer::new(cfg),
            Err(Error::InvalidParameter { parameter: "sample rate", .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_modulation() {
        let cfg = TransferConfig {
            subcarrier_modulation: "qam1024".to_string(),
            ..config()
        };
        assert!(Transfer::new(cfg).is_err());
    }

    #[test]
    fn test_rejects_unknown_fec() {
        let cfg = TransferConfig {
            inner_fec: "turbo".to_string(),
            ..config()
        };
        assert!(Transfer::new(cfg).is_err());
    }

    #[test]
    fn test_rejects_long_id() {
        let cfg = TransferConfig {
            id: "TOOLONG".to_string(),
            ..config()
        };
        assert!(matches!(
            Transfer::new(cfg),
            Err(Error::InvalidParameter { parameter: "id", .. })
        ));
    }

    #[test]
    fn test_rejects_audio_on_sdr() {
        let cfg = TransferConfig {
            radio: "driver=hackrf".to_string(),
            audio: true,
            ..config()
        };
        assert!(matches!(
            Transfer::new(cfg),
            Err(Error::InvalidParameter { parameter: "audio", .. })
        ));
    }

    #[test]
    fn test_ppm_correction() {
        let cfg = TransferConfig {
            ppm: 10.0,
            ..config()
        };
        let transfer = Transfer::new(cfg).unwrap();
        assert_eq!(transfer.sample_rate(), 1_999_980);
        assert_eq!(transfer.frequency(), 433_995_660);
    }

    #[test]
    fn test_negative_ppm_correction() {
        let cfg = TransferConfig {
            ppm: -5.0,
            ..config()
        };
        let transfer = Transfer::new(cfg).unwrap();
        assert_eq!(transfer.sample_rate(), 2_000_010);
    }

    #[test]
    fn test_audio_halves_sample_rate_and_shifts() {
        let cfg = TransferConfig {
            audio: true,
            frequency: 1500,
            sample_rate: 48_000,
            bit_rate: 9600,
            ..config()
        };
        let transfer = Transfer::new(cfg).unwrap();
        assert_eq!(transfer.sample_rate(), 24_000);
        assert_eq!(transfer.frequency(), 0);
        assert_eq!(transfer.frequency_offset(), 1500 - 12_000);
    }

    #[test]
    fn test_counter_header_bytes() {
        let mut header = [0u8; HEADER_SIZE];
        set_counter(&mut header, 0x0102_0304);
        assert_eq!(&header[4..8], &[1, 2, 3, 4]);
        assert_eq!(get_counter(&header), 0x0102_0304);
    }

    #[test]
    fn test_id_display_strips_padding() {
        assert_eq!(id_display(b"AB\x00\x00"), "AB");
        assert_eq!(id_display(b"ABCD"), "ABCD");
        assert_eq!(id_display(&[0; 4]), "");
    }

    #[test]
    fn test_endpoint_direction_mismatch() {
        struct NullSink;
        impl ByteSink for NullSink {
            fn push(&mut self, payload: &[u8]) -> std::io::Result<usize> {
                Ok(payload.len())
            }
        }
        let cfg = TransferConfig {
            direction: Direction::Transmit,
            ..config()
        };
        let result = Transfer::with_data(cfg, DataEndpoint::Sink(Box::new(NullSink)));
        assert!(result.is_err());
    }
}
