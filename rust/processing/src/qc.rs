// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! QC report: per-part outcomes, geometry statistics and checks on the
//! written model, saved as JSON and as a plain-text summary.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use ifc_bridge_core::{EntityScanner, LengthUnit};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Schema;
use crate::conformance::{ExternalReport, IntegrityReport};
use crate::error::{Error, FailureReason, Result};
use crate::heuristics::Candidate;
use crate::writer::RepresentationKind;

/// Outcome of one part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcPart {
    pub name: String,
    pub assembly_path: String,
    pub converted: bool,
    pub reason: Option<FailureReason>,
    pub target_class: Option<String>,
    pub global_id: Option<String>,
    pub representation: Option<RepresentationKind>,
    pub bbox: Option<[f64; 6]>,
    pub volume: Option<f64>,
    pub repaired: bool,
    pub repair_note: Option<String>,
    /// Best classifier candidates (auto runs)
    pub candidates: Vec<Candidate>,
    pub notes: Vec<String>,
}

impl QcPart {
    /// A part that has not been through any stage yet
    pub fn new(name: impl Into<String>, assembly_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assembly_path: assembly_path.into(),
            converted: false,
            reason: None,
            target_class: None,
            global_id: None,
            representation: None,
            bbox: None,
            volume: None,
            repaired: false,
            repair_note: None,
            candidates: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn fail(&mut self, reason: FailureReason) {
        self.converted = false;
        self.reason = Some(reason);
    }
}

/// Presence of the spatial levels and of any body geometry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicChecks {
    pub project: bool,
    pub site: bool,
    pub building: bool,
    pub storey: bool,
    pub has_geometry: bool,
}

impl BasicChecks {
    pub fn all_passed(&self) -> bool {
        self.project && self.site && self.building && self.storey && self.has_geometry
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub basic: BasicChecks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<IntegrityReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalReport>,
}

/// Something the run took for granted, with how sure it was
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assumption {
    pub assumption: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rationale: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshSettings {
    pub deflection: f64,
    pub angle: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcReport {
    pub schema: Schema,
    pub unit: LengthUnit,
    pub source_fingerprint: String,
    pub total_parts: usize,
    pub converted_parts: usize,
    pub failed_parts: usize,
    pub bounding_boxes: Vec<[f64; 6]>,
    pub volumes: Vec<f64>,
    /// Parts with no computable volume
    pub invalid_solids: usize,
    pub repaired_solids: usize,
    pub parts: Vec<QcPart>,
    pub validation: Validation,
    pub assumptions: Vec<Assumption>,
    pub mesh_settings: MeshSettings,
    pub created_at: String,
}

/// Fixed facts of a run the report is built around
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub schema: Schema,
    pub unit: LengthUnit,
    pub source_fingerprint: String,
    pub assumptions: Vec<Assumption>,
    pub mesh_settings: MeshSettings,
    pub created_at: String,
}

/// Aggregate part outcomes; validation is filled in afterwards
pub fn build_report(context: ReportContext, parts: Vec<QcPart>) -> QcReport {
    let converted_parts = parts.iter().filter(|p| p.converted).count();
    QcReport {
        schema: context.schema,
        unit: context.unit,
        source_fingerprint: context.source_fingerprint,
        total_parts: parts.len(),
        converted_parts,
        failed_parts: parts.len() - converted_parts,
        bounding_boxes: parts.iter().filter_map(|p| p.bbox).collect(),
        volumes: parts.iter().filter_map(|p| p.volume).collect(),
        invalid_solids: parts.iter().filter(|p| p.volume.is_none()).count(),
        repaired_solids: parts.iter().filter(|p| p.repaired).count(),
        parts,
        validation: Validation::default(),
        assumptions: context.assumptions,
        mesh_settings: context.mesh_settings,
        created_at: context.created_at,
    }
}

/// Structural checks by entity type over an IFC file's DATA section
pub fn basic_checks(content: &str) -> BasicChecks {
    let counts = EntityScanner::new(content).count_by_type();
    let has = |name: &str| counts.get(name).is_some_and(|n| *n > 0);
    BasicChecks {
        project: has("IFCPROJECT"),
        site: has("IFCSITE"),
        building: has("IFCBUILDING"),
        storey: has("IFCBUILDINGSTOREY"),
        has_geometry: has("IFCSHAPEREPRESENTATION"),
    }
}

/// `<output>.qc.json` and `<output>.qc.txt`
pub fn report_paths(output: &Path) -> (PathBuf, PathBuf) {
    (output.with_extension("qc.json"), output.with_extension("qc.txt"))
}

impl QcReport {
    pub fn failures(&self) -> impl Iterator<Item = (&QcPart, &FailureReason)> {
        self.parts
            .iter()
            .filter_map(|p| p.reason.as_ref().map(|reason| (p, reason)))
    }

    /// Plain-text summary
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "QC Report - {}", self.created_at);
        let _ = writeln!(out, "Schema: {}", self.schema);
        let _ = writeln!(out, "Units: {}", self.unit);
        let _ = writeln!(out, "Source hash: {}", self.source_fingerprint);
        let _ = writeln!(out, "Total parts: {}", self.total_parts);
        let _ = writeln!(out, "Converted: {}", self.converted_parts);
        let _ = writeln!(out, "Failures: {}", self.failed_parts);
        let _ = writeln!(out, "Invalid solids: {}", self.invalid_solids);
        let _ = writeln!(out, "Repaired solids: {}", self.repaired_solids);

        if !self.volumes.is_empty() {
            let mut top = self.volumes.clone();
            top.sort_by(|a, b| b.total_cmp(a));
            top.truncate(10);
            let list: Vec<String> = top.iter().map(|v| format!("{:.6}", v)).collect();
            let _ = writeln!(out, "Top volumes: [{}]", list.join(", "));
        }

        let basic = &self.validation.basic;
        let mark = |ok: bool| if ok { "ok" } else { "MISSING" };
        let _ = writeln!(
            out,
            "Checks: project={} site={} building={} storey={} geometry={}",
            mark(basic.project),
            mark(basic.site),
            mark(basic.building),
            mark(basic.storey),
            mark(basic.has_geometry)
        );
        if let Some(integrity) = &self.validation.integrity {
            let _ = writeln!(
                out,
                "Integrity: {} ({} entities, {} duplicate ids, {} dangling references)",
                if integrity.passed { "passed" } else { "FAILED" },
                integrity.entities,
                integrity.duplicate_ids.len(),
                integrity.dangling_references.len()
            );
        }
        if let Some(external) = &self.validation.external {
            let _ = writeln!(
                out,
                "Schema check ({}): {}",
                external.command,
                if external.passed { "passed" } else { "FAILED" }
            );
        }

        if self.failed_parts > 0 {
            out.push_str("Failed parts:\n");
            for (part, reason) in self.failures() {
                let _ = writeln!(out, "  - {}: {}", part.assembly_path, reason);
            }
        }
        out
    }

    /// Write both report files next to `output`
    pub fn save(&self, output: &Path) -> Result<(PathBuf, PathBuf)> {
        let (json_path, text_path) = report_paths(output);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&json_path, json).map_err(|e| Error::io(&json_path, e))?;
        std::fs::write(&text_path, self.to_text()).map_err(|e| Error::io(&text_path, e))?;
        info!(json = %json_path.display(), text = %text_path.display(), "QC report written");
        Ok((json_path, text_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ReportContext {
        ReportContext {
            schema: Schema::Ifc4,
            unit: LengthUnit::Millimeter,
            source_fingerprint: "abc".to_string(),
            assumptions: Vec::new(),
            mesh_settings: MeshSettings {
                deflection: 0.5,
                angle: 0.5,
            },
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    fn converted(path: &str, volume: Option<f64>) -> QcPart {
        let mut part = QcPart::new(path, path);
        part.converted = true;
        part.bbox = Some([0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        part.volume = volume;
        part
    }

    #[test]
    fn test_accounting() {
        let mut failed = QcPart::new("Bolt", "Skid/Bolt");
        failed.fail(FailureReason::Geometry("no faces".to_string()));
        let mut repaired = converted("Skid/Plate", Some(2.0));
        repaired.repaired = true;
        let parts = vec![converted("Skid/Valve", Some(1.0)), repaired, converted("Skid/Sheet", None), failed];

        let report = build_report(context(), parts);
        assert_eq!(report.total_parts, 4);
        assert_eq!(report.converted_parts, 3);
        assert_eq!(report.failed_parts, 1);
        assert_eq!(report.volumes, vec![1.0, 2.0]);
        assert_eq!(report.bounding_boxes.len(), 3);
        assert_eq!(report.invalid_solids, 2);
        assert_eq!(report.repaired_solids, 1);
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_text_summary() {
        let mut failed = QcPart::new("Bolt", "Skid/Bolt");
        failed.fail(FailureReason::Merged("Skid/Bolt:1".to_string()));
        let volumes: Vec<QcPart> = (1..=12).map(|i| converted(&format!("P{}", i), Some(i as f64))).collect();
        let mut parts = volumes;
        parts.push(failed);

        let text = build_report(context(), parts).to_text();
        assert!(text.starts_with("QC Report - 2024-01-01T00:00:00Z\n"));
        assert!(text.contains("Total parts: 13\n"));
        assert!(text.contains("Top volumes: [12.000000, 11.000000,"));
        assert!(text.contains(", 3.000000]\n"));
        assert!(text.contains("  - Skid/Bolt: merged by name into Skid/Bolt:1\n"));
        assert!(text.contains("storey=MISSING"));
    }

    #[test]
    fn test_basic_checks() {
        let content = "ISO-10303-21;\nHEADER;\nENDSEC;\nDATA;\n#1=IFCPROJECT('x',$,'P',$,$,$,$,$,$);\n#2=IFCSITE('y',$,'S',$,$,$,$,$,.ELEMENT.,$,$,$,$,$);\nENDSEC;\n";
        let checks = basic_checks(content);
        assert!(checks.project && checks.site);
        assert!(!checks.building && !checks.storey && !checks.has_geometry);
        assert!(!checks.all_passed());
    }

    #[test]
    fn test_report_paths() {
        let (json, text) = report_paths(Path::new("out/skid.ifc"));
        assert_eq!(json, Path::new("out/skid.qc.json"));
        assert_eq!(text, Path::new("out/skid.qc.txt"));
    }
}
