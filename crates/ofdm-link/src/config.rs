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

//! Transfer configuration.

use std::path::PathBuf;

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read payload bytes, modulate, and send samples to the radio.
    Transmit,
    /// Receive samples from the radio, demodulate, and write payload bytes.
    Receive,
}

/// Configuration for a [`crate::Transfer`].
///
/// Defaults match the command line defaults: 2 MS/s, 38400 b/s, 434 MHz,
/// QPSK on 64 subcarriers with a 16-sample cyclic prefix and 4-sample taper,
/// Hamming(12,8) inner FEC and no outer FEC.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Radio to use: `"io"` for stdin/stdout samples, `"file=PATH"` for a
    /// raw sample file, anything else is passed verbatim to SoapySDR
    /// (e.g. `"driver=hackrf"`).
    pub radio: String,
    /// Transmit or receive.
    pub direction: Direction,
    /// Payload file for the default data callbacks. `None` reads from
    /// standard input (transmit) or writes to standard output (receive).
    pub file: Option<PathBuf>,
    /// Radio sample rate in samples/second.
    pub sample_rate: u64,
    /// Bit rate of the transmission in bits/second.
    pub bit_rate: u32,
    /// Center frequency of the transmission in Hz.
    pub frequency: u64,
    /// Offset between the radio tuning frequency and the signal frequency in
    /// Hz. The radio is tuned `frequency_offset` Hz below the signal, so the
    /// signal appears at a positive offset in baseband.
    pub frequency_offset: i64,
    /// Radio gain: either a plain number or a `name=value[,name=value...]`
    /// list of gain elements.
    pub gain: String,
    /// Clock correction in parts per million. Applied to the sample rate and
    /// frequency as `x * (1e6 - ppm) / 1e6` at construction time.
    pub ppm: f32,
    /// Subcarrier modulation name: one of `bpsk`, `qpsk`, `psk8`, `apsk16`,
    /// `apsk32`, `apsk64`, `apsk128`, `apsk256`.
    pub subcarrier_modulation: String,
    /// Number of OFDM subcarriers.
    pub subcarriers: u32,
    /// Cyclic prefix length in samples.
    pub cyclic_prefix_length: u32,
    /// Taper (inter-symbol window) length in samples.
    pub taper_length: u32,
    /// Inner forward error correction name.
    pub inner_fec: String,
    /// Outer forward error correction name.
    pub outer_fec: String,
    /// Transfer id, at most 4 bytes. Received frames with a different id are
    /// ignored.
    pub id: String,
    /// Optional path receiving a verbatim copy of the IQ sample stream.
    pub dump: Option<PathBuf>,
    /// Number of seconds of reception without any frame after which the
    /// receiver stops. 0 disables the timeout. Ignored on transmit.
    pub timeout: u32,
    /// Use 16-bit stereo audio samples instead of IQ samples. Only valid
    /// with the `io` and `file=` radio types.
    pub audio: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            radio: String::new(),
            direction: Direction::Receive,
            file: None,
            sample_rate: 2_000_000,
            bit_rate: 38_400,
            frequency: 434_000_000,
            frequency_offset: 0,
            gain: "0".to_string(),
            ppm: 0.0,
            subcarrier_modulation: "qpsk".to_string(),
            subcarriers: 64,
            cyclic_prefix_length: 16,
            taper_length: 4,
            inner_fec: "h128".to_string(),
            outer_fec: "none".to_string(),
            id: String::new(),
            dump: None,
            timeout: 0,
            audio: false,
        }
    }
}
