// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conformance checks on a written IFC file.
//!
//! [`check_integrity`] is built in and always available. [`run_external`]
//! shells out to a configured schema checker; when the checker cannot be
//! started the result is `None` and the QC report omits the section.

use std::path::Path;
use std::process::Command;

use ifc_bridge_core::EntityScanner;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Reference checks over the DATA section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub entities: usize,
    /// Ids defined more than once
    pub duplicate_ids: Vec<u32>,
    /// `(record, missing target)` pairs
    pub dangling_references: Vec<(u32, u32)>,
    pub passed: bool,
}

/// Outcome of the external checker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalReport {
    pub command: String,
    pub exit_code: Option<i32>,
    pub passed: bool,
    /// Combined stdout and stderr, trimmed
    pub output: String,
}

/// `#n` references in a record, skipping quoted strings
fn references(record: &str) -> Vec<u32> {
    let bytes = record.as_bytes();
    let mut refs = Vec::new();
    let mut i = 0;
    let mut in_string = false;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if b == b'\'' {
                if bytes.get(i + 1) == Some(&b'\'') {
                    i += 1;
                } else {
                    in_string = false;
                }
            }
        } else if b == b'\'' {
            in_string = true;
        } else if b == b'#' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if let Ok(id) = record[start..end].parse::<u32>() {
                refs.push(id);
            }
            i = end;
            continue;
        }
        i += 1;
    }
    refs
}

/// Check that ids are unique and every reference resolves
pub fn check_integrity(content: &str) -> IntegrityReport {
    let mut scanner = EntityScanner::new(content);
    let mut ids = FxHashSet::default();
    let mut duplicate_ids = Vec::new();
    let mut records = Vec::new();

    while let Some((id, _, start, end)) = scanner.next_entity() {
        if !ids.insert(id) {
            duplicate_ids.push(id);
        }
        // Body after `#id=`
        let record = &content[start..end];
        let body = record.find('=').map_or(record, |eq| &record[eq + 1..]);
        records.push((id, body));
    }

    let mut dangling_references = Vec::new();
    for (id, body) in &records {
        for target in references(body) {
            if !ids.contains(&target) {
                dangling_references.push((*id, target));
            }
        }
    }

    let passed = duplicate_ids.is_empty() && dangling_references.is_empty() && !records.is_empty();
    debug!(
        entities = records.len(),
        duplicates = duplicate_ids.len(),
        dangling = dangling_references.len(),
        "integrity check"
    );
    IntegrityReport {
        entities: records.len(),
        duplicate_ids,
        dangling_references,
        passed,
    }
}

/// Run `command <ifc>`; `None` when it cannot be started
pub fn run_external(command: &str, ifc: &Path) -> Option<ExternalReport> {
    let mut words = command.split_whitespace();
    let program = words.next()?;
    let output = match Command::new(program).args(words).arg(ifc).output() {
        Ok(output) => output,
        Err(e) => {
            warn!(command, error = %e, "schema checker unavailable; skipping");
            return None;
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    let report = ExternalReport {
        command: command.to_string(),
        exit_code: output.status.code(),
        passed: output.status.success(),
        output: text.trim().to_string(),
    };
    if !report.passed {
        warn!(command, exit_code = ?report.exit_code, "schema checker reported problems");
    }
    Some(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(data: &str) -> String {
        format!("ISO-10303-21;\nHEADER;\nFILE_SCHEMA(('IFC4'));\nENDSEC;\nDATA;\n{}ENDSEC;\nEND-ISO-10303-21;\n", data)
    }

    #[test]
    fn test_references_skip_strings() {
        assert_eq!(references("IFCFOO(#1,'#2 isn''t #3',(#4,#5))"), vec![1, 4, 5]);
    }

    #[test]
    fn test_clean_file_passes() {
        let report = check_integrity(&file("#1=IFCCARTESIANPOINT((0.,0.,0.));\n#2=IFCLOCALPLACEMENT($,#1);\n"));
        assert!(report.passed);
        assert_eq!(report.entities, 2);
    }

    #[test]
    fn test_dangling_and_duplicates() {
        let report = check_integrity(&file("#1=IFCFOO(#9);\n#1=IFCBAR($);\n"));
        assert!(!report.passed);
        assert_eq!(report.duplicate_ids, vec![1]);
        assert_eq!(report.dangling_references, vec![(1, 9)]);
    }

    #[test]
    fn test_missing_checker_is_omitted() {
        assert!(run_external("ifc-bridge-no-such-checker --strict", Path::new("x.ifc")).is_none());
        assert!(run_external("   ", Path::new("x.ifc")).is_none());
    }
}
