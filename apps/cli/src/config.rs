// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CLI settings loaded from environment variables.

/// Process-wide settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// `tracing` filter directives.
    pub log_filter: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
    /// External IFC schema checker, run as `<cmd> <file.ifc>`.
    pub validator: Option<String>,
    /// Number of worker threads for geometry processing.
    pub worker_threads: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            log_filter: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
            log_json: std::env::var("IFC_BRIDGE_LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            validator: std::env::var("IFC_BRIDGE_VALIDATOR")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            worker_threads: std::env::var("WORKER_THREADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or_else(num_cpus::get),
        }
    }
}
