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

//! Library for sending and receiving data streams by software defined
//! radio using OFDM modulation.
//!
//! A byte stream is packaged into framed OFDM bursts with forward error
//! correction and a CRC, modulated into complex baseband samples, and fed
//! to an SDR device (or a file, or the standard streams); the receive
//! direction synchronizes on the bursts and emits the recovered bytes.
//! The layers can be used independently:
//!
//! - **Transfer layer**: [`Transfer`] bundles a radio port, the DSP chain,
//!   and a data callback into one lifecycle (create, start, stop).
//! - **Modem layer**: [`modem`] holds the OFDM flex-frame generator and
//!   synchronizer for callers that bring their own sample transport.
//! - **DSP layer**: [`dsp`] has the resampler, oscillator, and Hilbert
//!   transformer primitives.
//!
//! # Quick start
//!
//! ```no_run
//! use ofdm_link::{Direction, Transfer, TransferConfig};
//!
//! let mut transfer = Transfer::new(TransferConfig {
//!     radio: "driver=hackrf".to_string(),
//!     direction: Direction::Transmit,
//!     file: Some("message.txt".into()),
//!     bit_rate: 9600,
//!     frequency: 434_000_000,
//!     ..TransferConfig::default()
//! })
//! .expect("failed to initialize transfer");
//!
//! // Runs until the file is exhausted or a stop flag is raised.
//! transfer.start().expect("transfer failed");
//! ```
//!
//! Transfers block the calling thread; run several in parallel threads and
//! cancel them all with [`stop_all`], or one at a time through
//! [`Transfer::stop_handle`].

mod audio;
pub mod config;
pub mod dsp;
mod error;
pub mod modem;
mod radio;
mod transfer;

pub use config::{Direction, TransferConfig};
pub use error::Error;
pub use transfer::{ByteSink, ByteSource, DataEndpoint, Pull, StopHandle, Transfer};

use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide stop flag observed by every running transfer.
static STOP_ALL: AtomicBool = AtomicBool::new(false);

/// Diagnostic verbosity for the per-frame hot path.
static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Stop every active transfer. Safe to call from a signal handler thread.
pub fn stop_all() {
    STOP_ALL.store(true, Ordering::Relaxed);
}

/// Clear the process-wide stop flag; called when a transfer starts.
pub(crate) fn clear_stop_all() {
    STOP_ALL.store(false, Ordering::Relaxed);
}

/// Whether the process-wide or the given per-transfer stop flag is raised.
pub(crate) fn stop_requested(local: &AtomicBool) -> bool {
    STOP_ALL.load(Ordering::Relaxed) || local.load(Ordering::Relaxed)
}

/// Enable or disable verbose per-frame diagnostics.
pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

/// Whether verbose per-frame diagnostics are enabled.
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Print the radios SoapySDR can see.
pub fn print_available_radios() {
    radio::print_available_radios();
}

/// Print the supported subcarrier modulation names.
pub fn print_available_subcarrier_modulations() {
    for scheme in modem::SubcarrierModulation::ALL {
        println!("  - {}", scheme.name());
    }
}

/// Print the supported forward error correction names.
pub fn print_available_forward_error_codes() {
    for scheme in modem::FecScheme::ALL {
        println!("  - {}", scheme.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_flag() {
        set_verbose(true);
        assert!(is_verbose());
        set_verbose(false);
        assert!(!is_verbose());
    }

    #[test]
    fn test_stop_all_flag() {
        let local = AtomicBool::new(false);
        clear_stop_all();
        assert!(!stop_requested(&local));
        stop_all();
        assert!(stop_requested(&local));
        clear_stop_all();
        local.store(true, Ordering::Relaxed);
        assert!(stop_requested(&local));
    }
}
