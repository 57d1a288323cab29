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

//! Error types for transfer construction and runtime failures.

use std::path::PathBuf;

/// Errors reported by [`crate::Transfer`] construction and `start`.
///
/// Construction never leaves partial state behind: on error no file is kept
/// open and no radio stream is set up.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration parameter failed validation.
    #[error("invalid {parameter}: {reason}")]
    InvalidParameter {
        /// Name of the offending parameter
        parameter: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// A file could not be opened or created.
    #[error("failed to open '{path}': {source}")]
    FileOpen {
        /// Path that failed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The SDR device could not be opened, configured, or streamed.
    #[error("radio error: {0}")]
    Radio(String),

    /// An I/O failure on the sample or payload path during `start`.
    #[error("transfer I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter,
            reason: reason.into(),
        }
    }
}
