// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Append-only JSON-lines event log, mirrored to `tracing`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Run identifier derived from the output path and the run timestamp
pub fn run_id(output: &Path, started: &DateTime<Utc>) -> String {
    let key = format!(
        "{}|{}",
        output.to_string_lossy(),
        started.to_rfc3339_opts(SecondsFormat::Nanos, true)
    );
    let digest = Sha256::digest(key.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(32);
    id
}

#[derive(Serialize)]
struct EventRecord<'a> {
    timestamp: String,
    run_id: &'a str,
    event: &'a str,
    fields: &'a Value,
}

/// One run's event log
pub struct EventLog {
    path: PathBuf,
    run_id: String,
    out: BufWriter<File>,
    events: usize,
}

impl EventLog {
    /// Open `path` for appending, creating parent directories
    pub fn open(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            path,
            run_id: run_id.into(),
            out: BufWriter::new(file),
            events: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Events recorded through this handle
    pub fn len(&self) -> usize {
        self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events == 0
    }

    /// Append one event. A failed write is logged and otherwise ignored.
    pub fn emit(&mut self, event: &str, fields: Value) {
        info!(run_id = %self.run_id, event, fields = %fields, "event");
        let record = EventRecord {
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            run_id: &self.run_id,
            event,
            fields: &fields,
        };
        let written = serde_json::to_writer(&mut self.out, &record)
            .map_err(std::io::Error::from)
            .and_then(|_| self.out.write_all(b"\n"))
            .and_then(|_| self.out.flush());
        match written {
            Ok(()) => self.events += 1,
            Err(e) => warn!(path = %self.path.display(), error = %e, "event log write failed"),
        }
    }
}
