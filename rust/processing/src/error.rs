// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Run-level and per-part error types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for fatal, run-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a whole conversion run
#[derive(Error, Debug)]
pub enum Error {
    #[error("Source file error: {0}")]
    Core(#[from] ifc_bridge_core::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Rule file error: {0}")]
    RuleFile(String),

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::RuleFile(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::RuleFile(err.to_string())
    }
}

/// Why one part did not make it into the output model.
///
/// Carried as the error half of per-part results and reported in QC; never
/// escalated to a run failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    /// Loading, healing or meshing the solid failed
    Geometry(String),
    /// Rule evaluation failed
    Mapping(String),
    /// Building the output element failed
    Element(String),
    /// Folded into an earlier part with the same normalized name
    Merged(String),
}

impl FailureReason {
    pub fn stage(&self) -> &'static str {
        match self {
            FailureReason::Geometry(_) => "geometry",
            FailureReason::Mapping(_) => "mapping",
            FailureReason::Element(_) => "element",
            FailureReason::Merged(_) => "merged",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Geometry(msg) => write!(f, "geometry: {}", msg),
            FailureReason::Mapping(msg) => write!(f, "mapping: {}", msg),
            FailureReason::Element(msg) => write!(f, "element: {}", msg),
            FailureReason::Merged(msg) => write!(f, "merged by name into {}", msg),
        }
    }
}

impl From<ifc_bridge_geometry::Error> for FailureReason {
    fn from(err: ifc_bridge_geometry::Error) -> Self {
        FailureReason::Geometry(err.to_string())
    }
}
