// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for STEP reading

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading an ISO 10303-21 exchange file
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Missing ISO-10303-21 header")]
    MissingHeader,

    #[error("No parseable DATA section")]
    EmptyData,

    #[error("Unresolved reference #{0}")]
    UnresolvedReference(u32),
}

impl Error {
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }
}
