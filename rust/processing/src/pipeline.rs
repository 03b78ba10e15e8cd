// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conversion runs.
//!
//! [`auto_convert`] infers classes and units, persists the synthesized rule
//! file and converts with it. [`convert`] converts with a supplied rule file
//! and explicit settings. Both share reading, geometry, mapping, writing and
//! QC, and are pure functions of (source, rules, config) apart from
//! timestamps and the run id.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use ifc_bridge_core::{detect_length_unit, read_assembly, LengthUnit, Part, ShapeHandle, StepFile};
use ifc_bridge_geometry::{GeometryProcessor, ProcessedShape};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::ConversionConfig;
use crate::conformance::{check_integrity, run_external};
use crate::error::{Error, FailureReason, Result};
use crate::events::{run_id, EventLog};
use crate::heuristics::{Archetype, HeuristicClassifier, Inference};
use crate::mapping::{MappingEngine, PartContext};
use crate::qc::{basic_checks, build_report, Assumption, MeshSettings, QcPart, QcReport, ReportContext};
use crate::rules::{DefaultRule, RuleFile};
use crate::synthesis::RuleSynthesizer;
use crate::units::{infer_units, UnitInference};
use crate::writer::{ElementInput, IfcWriter, WriterSettings};

/// What a run produced
#[derive(Debug, Clone, Serialize)]
pub struct ConversionSummary {
    pub run_id: String,
    pub output: PathBuf,
    /// Synthesized rule file (auto) or the one supplied (convert)
    pub rules: Option<PathBuf>,
    pub qc_json: PathBuf,
    pub qc_text: PathBuf,
    pub log: PathBuf,
    pub unit: LengthUnit,
    pub report: QcReport,
}

impl ConversionSummary {
    pub fn total_parts(&self) -> usize {
        self.report.total_parts
    }

    pub fn converted_parts(&self) -> usize {
        self.report.converted_parts
    }

    pub fn failed_parts(&self) -> usize {
        self.report.failed_parts
    }
}

/// `<output>.classmap.toml`
pub fn rule_file_path(output: &Path) -> PathBuf {
    output.with_extension("classmap.toml")
}

/// `<output>.log.jsonl`
pub fn log_path(output: &Path) -> PathBuf {
    output.with_extension("log.jsonl")
}

/// Hex SHA-256 of the source bytes
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// State shared by both modes for one run
struct Run<'a> {
    input: &'a Path,
    output: &'a Path,
    config: &'a ConversionConfig,
    timestamp: DateTime<Utc>,
    log: EventLog,
}

/// The source after reading and geometry processing
struct Source {
    parts: Vec<Part>,
    fingerprint: String,
    hint: Option<LengthUnit>,
    geometry: Vec<std::result::Result<ProcessedShape, FailureReason>>,
}

impl Source {
    /// Diagonals of every part that was measured
    fn diagonals(&self) -> Vec<f64> {
        self.geometry
            .iter()
            .filter_map(|g| g.as_ref().ok())
            .map(|g| g.metrics.diagonal())
            .collect()
    }
}

/// Per-part classifier output
struct Classified {
    archetype: Archetype,
    signature: String,
    inference: Inference,
}

impl<'a> Run<'a> {
    /// Read the assembly and process every part's geometry in parallel, then
    /// open the event log. An unreadable source leaves nothing on disk.
    fn start(
        input: &'a Path,
        output: &'a Path,
        config: &'a ConversionConfig,
        mode: &str,
    ) -> Result<(Self, Source)> {
        let step = StepFile::open(input)?;
        let fingerprint = fingerprint(step.as_bytes());
        let parts = read_assembly(&step)?;
        let hint = detect_length_unit(step.content(), &mut step.decoder()).map(|h| h.unit);

        let handles: Vec<&ShapeHandle> = parts.iter().map(|p| &p.shape).collect();
        let geometry = GeometryProcessor::default()
            .process_all(&step, &handles, config.mesh_deflection, config.mesh_angle)
            .into_iter()
            .map(|r| r.map_err(FailureReason::from))
            .collect::<Vec<_>>();
        info!(
            parts = parts.len(),
            failed = geometry.iter().filter(|g| g.is_err()).count(),
            "geometry processed"
        );

        let timestamp = config.timestamp.unwrap_or_else(Utc::now);
        let path = config.log_path.clone().unwrap_or_else(|| log_path(output));
        let mut log = EventLog::open(path, run_id(output, &timestamp))?;
        log.emit(
            "conversion_start",
            json!({
                "mode": mode,
                "input": input.display().to_string(),
                "output": output.display().to_string(),
                "schema": config.schema,
            }),
        );
        log.emit(
            "read_complete",
            json!({
                "parts": parts.len(),
                "entities": step.entity_count(),
                "source_fingerprint": fingerprint,
                "unit_hint": hint,
            }),
        );

        let run = Self {
            input,
            output,
            config,
            timestamp,
            log,
        };
        let source = Source {
            parts,
            fingerprint,
            hint,
            geometry,
        };
        Ok((run, source))
    }

    fn created_at(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Map and write every part, then write the model and its QC report
    #[allow(clippy::too_many_arguments)]
    fn build(
        mut self,
        source: &Source,
        rules: &RuleFile,
        rules_path: Option<PathBuf>,
        settings: WriterSettings,
        archetypes: &[Archetype],
        classified: &[Option<Classified>],
        assumptions: Vec<Assumption>,
    ) -> Result<ConversionSummary> {
        let config = self.config;
        let unit = settings.unit;
        let engine = MappingEngine::new(rules, &settings.default_class)?;
        let mut writer = IfcWriter::new(settings);
        let mut seen: FxHashMap<String, String> = FxHashMap::default();
        let mut outcomes = Vec::with_capacity(source.parts.len());

        for (i, part) in source.parts.iter().enumerate() {
            let mut qc = QcPart::new(&part.name, &part.assembly_path);
            if let Some(Some(c)) = classified.get(i) {
                qc.candidates = c.inference.candidates.clone();
            }

            match self.write_part(&engine, &mut writer, &mut seen, source, i, archetypes[i], &mut qc) {
                Ok(()) => self.log.emit(
                    "part_converted",
                    json!({
                        "name": part.name,
                        "assembly_path": part.assembly_path,
                        "target_class": qc.target_class,
                        "global_id": qc.global_id,
                        "representation": qc.representation,
                    }),
                ),
                Err(reason) => {
                    let event = match reason {
                        FailureReason::Merged(_) => "part_merged",
                        _ => "part_failed",
                    };
                    warn!(part = %part.assembly_path, reason = %reason, "part not converted");
                    self.log.emit(
                        event,
                        json!({
                            "name": part.name,
                            "assembly_path": part.assembly_path,
                            "reason": reason,
                        }),
                    );
                    qc.fail(reason);
                }
            }
            outcomes.push(qc);
        }

        let elements = writer.element_count();
        let model = writer.finish();
        model.write(self.output)?;
        self.log.emit(
            "write_complete",
            json!({
                "output": self.output.display().to_string(),
                "entities": model.len(),
                "elements": elements,
            }),
        );

        let content = std::fs::read_to_string(self.output).map_err(|e| Error::io(self.output, e))?;
        let mut report = build_report(
            ReportContext {
                schema: config.schema,
                unit,
                source_fingerprint: source.fingerprint.clone(),
                assumptions,
                mesh_settings: MeshSettings {
                    deflection: config.mesh_deflection,
                    angle: config.mesh_angle,
                },
                created_at: self.created_at(),
            },
            outcomes,
        );
        report.validation.basic = basic_checks(&content);
        report.validation.integrity = Some(check_integrity(&content));
        report.validation.external = config
            .validator
            .as_deref()
            .and_then(|command| run_external(command, self.output));
        let (qc_json, qc_text) = report.save(self.output)?;

        self.log.emit(
            "conversion_complete",
            json!({
                "total_parts": report.total_parts,
                "converted_parts": report.converted_parts,
                "failed_parts": report.failed_parts,
                "invalid_solids": report.invalid_solids,
                "qc_report": qc_json.display().to_string(),
            }),
        );
        info!(
            total = report.total_parts,
            converted = report.converted_parts,
            failed = report.failed_parts,
            output = %self.output.display(),
            "conversion complete"
        );

        Ok(ConversionSummary {
            run_id: self.log.run_id().to_string(),
            output: self.output.to_path_buf(),
            rules: rules_path,
            qc_json,
            qc_text,
            log: self.log.path().to_path_buf(),
            unit,
            report,
        })
    }

    /// One part through merge check, geometry, mapping and the writer
    #[allow(clippy::too_many_arguments)]
    fn write_part(
        &self,
        engine: &MappingEngine,
        writer: &mut IfcWriter,
        seen: &mut FxHashMap<String, String>,
        source: &Source,
        index: usize,
        archetype: Archetype,
        qc: &mut QcPart,
    ) -> std::result::Result<(), FailureReason> {
        let part = &source.parts[index];
        let geometry = source.geometry[index].as_ref();
        if let Ok(geometry) = geometry {
            qc.bbox = Some(geometry.metrics.bbox);
            qc.volume = geometry.metrics.volume;
            qc.repaired = geometry.metrics.repaired;
            qc.repair_note = geometry.metrics.repair_note.clone();
        }

        if self.config.merge_by_name {
            let name = engine.normalize_name(&part.name);
            if let Some(first) = seen.get(&name) {
                return Err(FailureReason::Merged(first.clone()));
            }
            seen.insert(name, part.assembly_path.clone());
        }

        let geometry = geometry.map_err(Clone::clone)?;

        let mapping = engine.map_part(&PartContext {
            part,
            fingerprint: &source.fingerprint,
            project_key: &self.config.project,
            archetype,
        })?;
        qc.target_class = Some(mapping.target_class.clone());

        let written = writer.add_element(ElementInput {
            part,
            mapping: &mapping,
            geometry: Some(geometry),
        })?;
        qc.converted = true;
        qc.global_id = Some(written.global_id);
        qc.representation = Some(written.representation);
        qc.notes = written.notes;
        Ok(())
    }

    fn writer_settings(&self, source: &Source, unit: LengthUnit, scale: f64, default_class: String) -> WriterSettings {
        let config = self.config;
        WriterSettings {
            schema: config.schema,
            unit,
            project: config.project.clone(),
            site: config.site.clone(),
            building: config.building.clone(),
            storey: config.storey.clone(),
            geom: config.geom,
            split_by_assembly: config.split_by_assembly,
            scale,
            fingerprint: source.fingerprint.clone(),
            source_file: self.input.display().to_string(),
            file_name: self
                .output
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            timestamp: self.timestamp,
            default_class,
        }
    }
}

fn coordinate_assumption() -> Assumption {
    Assumption {
        assumption: "Right-handed coordinate system; no axis transforms applied".to_string(),
        confidence: 0.8,
        rationale: Vec::new(),
    }
}

/// Unattended conversion: infer classes and units, synthesize and persist a
/// rule file, then convert with it.
///
/// `config.unit` is replaced by the inferred unit; the other settings apply
/// as given.
pub fn auto_convert(input: &Path, output: &Path, config: &ConversionConfig) -> Result<ConversionSummary> {
    let (mut run, source) = Run::start(input, output, config, "auto")?;

    let inference: UnitInference = infer_units(source.hint, &source.diagonals(), &config.unit_bands);
    if inference.confidence < config.unit_bands.hint_confidence {
        warn!(unit = %inference.unit, confidence = inference.confidence, "unit inferred without a header hint");
    }
    run.log.emit(
        "unit_inferred",
        json!({
            "unit": inference.unit,
            "confidence": inference.confidence,
            "rationale": inference.rationale,
        }),
    );

    let classifier = HeuristicClassifier::new(config.vocabulary.clone());
    let classified: Vec<Option<Classified>> = source
        .parts
        .par_iter()
        .zip(source.geometry.par_iter())
        .map(|(part, geometry)| {
            let geometry = geometry.as_ref().ok()?;
            let tokens = classifier.normalize_tokens(&part.name, &part.assembly_path);
            let archetype = classifier.geometry_archetype(&geometry.metrics.bbox);
            Some(Classified {
                archetype,
                signature: classifier.token_signature(&tokens),
                inference: classifier.infer_class(&tokens, archetype),
            })
        })
        .collect();

    let mut synthesizer = RuleSynthesizer::new();
    for (part, c) in source.parts.iter().zip(&classified) {
        if let Some(c) = c {
            let color = part.color.map(|rgb| rgb.to_string());
            synthesizer.observe(&c.signature, part.layer.as_deref(), color.as_deref(), &c.inference);
        }
    }
    let synthesized = synthesizer.synthesize();
    for rule in &synthesized {
        run.log.emit(
            "class_inferred",
            json!({
                "cluster": rule.cluster,
                "target_class": rule.rule.assign.target_class,
                "confidence": rule.rule.confidence,
                "members": rule.members,
            }),
        );
    }

    let default_class = config
        .default_class
        .clone()
        .unwrap_or_else(|| DefaultRule::default().target_class);
    let rule_file = RuleFile {
        generated_at: Some(run.created_at()),
        source_fingerprint: Some(source.fingerprint.clone()),
        schema: Some(config.schema),
        unit_inference: Some(inference.clone()),
        default_rule: DefaultRule {
            target_class: default_class.clone(),
        },
        rules: synthesized.into_iter().map(|s| s.rule).collect(),
        ..RuleFile::default()
    };
    let rules_path = rule_file_path(output);
    rule_file.save(&rules_path)?;

    let archetypes: Vec<Archetype> = classified
        .iter()
        .map(|c| c.as_ref().map_or(Archetype::Unknown, |c| c.archetype))
        .collect();
    let assumptions = vec![
        Assumption {
            assumption: "Units inferred automatically".to_string(),
            confidence: inference.confidence,
            rationale: inference.rationale.clone(),
        },
        coordinate_assumption(),
    ];
    let settings = run.writer_settings(&source, inference.unit, 1.0, default_class);
    run.build(
        &source,
        &rule_file,
        Some(rules_path),
        settings,
        &archetypes,
        &classified,
        assumptions,
    )
}

/// Conversion driven by `config.rules` (or the default class alone) and the
/// explicit settings of `config`
pub fn convert(input: &Path, output: &Path, config: &ConversionConfig) -> Result<ConversionSummary> {
    let rule_file = match &config.rules {
        Some(path) => RuleFile::load(path)?,
        None => RuleFile::default(),
    };
    let (run, source) = Run::start(input, output, config, "convert")?;

    let unit = config.unit;
    let scale = source.hint.map_or(1.0, |hint| hint.to_metres() / unit.to_metres());
    let mut rationale = vec![format!("Output length unit {} as configured", unit)];
    match source.hint {
        Some(hint) if hint != unit => {
            rationale.push(format!("Source declares {}; coordinates scaled by {}", hint, scale))
        }
        Some(hint) => rationale.push(format!("Source declares {}", hint)),
        None => {
            warn!(unit = %unit, "source has no unit hint; coordinates taken as output units");
            rationale.push("No unit hint in source; coordinates used as-is".to_string());
        }
    }
    if let Some(schema) = rule_file.schema.filter(|s| *s != config.schema) {
        info!(rules = %schema, output = %config.schema, "rule file was generated for another schema");
    }

    let classifier = HeuristicClassifier::new(config.vocabulary.clone());
    let archetypes: Vec<Archetype> = source
        .geometry
        .par_iter()
        .map(|g| {
            g.as_ref()
                .map_or(Archetype::Unknown, |g| classifier.geometry_archetype(&g.metrics.bbox))
        })
        .collect();

    let default_class = config
        .default_class
        .clone()
        .unwrap_or_else(|| rule_file.default_rule.target_class.clone());
    let assumptions = vec![
        Assumption {
            assumption: "Units set by configuration".to_string(),
            confidence: if source.hint.is_some() { 1.0 } else { 0.9 },
            rationale,
        },
        coordinate_assumption(),
    ];
    let settings = run.writer_settings(&source, unit, scale, default_class);
    run.build(
        &source,
        &rule_file,
        config.rules.clone(),
        settings,
        &archetypes,
        &[],
        assumptions,
    )
}
