// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end conversions of generated assemblies: auto and convert runs,
//! determinism, accounting and the files each run leaves behind.

use std::fs;
use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use chrono::{TimeZone, Utc};
use ifc_bridge_core::LengthUnit;
use ifc_bridge_processing::mapping::{guid_seed, short_tag};
use ifc_bridge_processing::pipeline::fingerprint;
use ifc_bridge_processing::writer::encode::global_id;
use ifc_bridge_processing::{
    auto_convert, convert, ConversionConfig, FailureReason, RepresentationKind, RuleFile, Schema,
};

const COMMON: &str = "#1=PRODUCT_CONTEXT('',#2,'mechanical');
#2=PRODUCT_DEFINITION_CONTEXT('part definition',#4,'design');
#3=GEOMETRIC_REPRESENTATION_CONTEXT(3);
#4=APPLICATION_CONTEXT('automotive design');
#9=AXIS2_PLACEMENT_3D('',#10,$,$);
#10=CARTESIAN_POINT('',(0.,0.,0.));
";

/// Corner indices of each box face, outward winding
const FACES: [[usize; 4]; 6] = [
    [0, 3, 2, 1],
    [4, 5, 6, 7],
    [0, 1, 5, 4],
    [3, 7, 6, 2],
    [0, 4, 7, 3],
    [1, 2, 6, 5],
];

enum Body {
    None,
    Closed([f64; 3]),
    /// Box with its last face missing
    Open([f64; 3]),
}

/// Product `base` with definition `base + 2`; a box body of the given size
/// at the origin
fn product(base: u32, name: &str, body: Body) -> String {
    let mut s = format!(
        "#{p}=PRODUCT('{name}','{name}','',(#1));
#{f}=PRODUCT_DEFINITION_FORMATION('','',#{p});
#{d}=PRODUCT_DEFINITION('design','',#{f},#2);
#{s}=PRODUCT_DEFINITION_SHAPE('','',#{d});
#{r}=SHAPE_DEFINITION_REPRESENTATION(#{s},#{rep});
",
        p = base,
        f = base + 1,
        d = base + 2,
        s = base + 3,
        r = base + 4,
        rep = base + 5,
        name = name,
    );

    let (size, faces) = match body {
        Body::None => {
            s.push_str(&format!("#{}=SHAPE_REPRESENTATION('',(#9),#3);\n", base + 5));
            return s;
        }
        Body::Closed(size) => (size, 6),
        Body::Open(size) => (size, 5),
    };

    s.push_str(&format!(
        "#{}=ADVANCED_BREP_SHAPE_REPRESENTATION('',(#{},#9),#3);\n",
        base + 5,
        base + 6
    ));
    s.push_str(&format!("#{}=FACETED_BREP('{}',#{});\n", base + 6, name, base + 7));
    let face_refs: Vec<String> = (0..faces).map(|k| format!("#{}", base + 30 + k)).collect();
    s.push_str(&format!("#{}=CLOSED_SHELL('',({}));\n", base + 7, face_refs.join(",")));

    let [x, y, z] = size;
    let corners = [
        [0.0, 0.0, 0.0],
        [x, 0.0, 0.0],
        [x, y, 0.0],
        [0.0, y, 0.0],
        [0.0, 0.0, z],
        [x, 0.0, z],
        [x, y, z],
        [0.0, y, z],
    ];
    for (k, c) in corners.iter().enumerate() {
        s.push_str(&format!(
            "#{}=CARTESIAN_POINT('',({:?},{:?},{:?}));\n",
            base + 20 + k as u32,
            c[0],
            c[1],
            c[2]
        ));
    }
    for (k, face) in FACES.iter().enumerate() {
        let k = k as u32;
        let points: Vec<String> = face.iter().map(|i| format!("#{}", base + 20 + *i as u32)).collect();
        s.push_str(&format!("#{}=FACE('',(#{}));\n", base + 30 + k, base + 40 + k));
        s.push_str(&format!("#{}=FACE_OUTER_BOUND('',#{},.T.);\n", base + 40 + k, base + 50 + k));
        s.push_str(&format!("#{}=POLY_LOOP('',({}));\n", base + 50 + k, points.join(",")));
    }
    s
}

fn nauo(id: u32, parent_base: u32, child_base: u32) -> String {
    format!(
        "#{}=NEXT_ASSEMBLY_USAGE_OCCURRENCE('{}','','',#{},#{},$);\n",
        id,
        id,
        parent_base + 2,
        child_base + 2
    )
}

fn wrap(data: &str) -> String {
    format!(
        "ISO-10303-21;\nHEADER;\nFILE_DESCRIPTION((''),'2;1');\n\
         FILE_NAME('fixture.stp','2024-01-01T00:00:00',(''),(''),'','','');\n\
         FILE_SCHEMA(('AUTOMOTIVE_DESIGN'));\nENDSEC;\nDATA;\n{}ENDSEC;\nEND-ISO-10303-21;\n",
        data
    )
}

/// A single cubic valve, 0.17 units on a side
fn valve_file() -> String {
    wrap(&format!("{}{}", COMMON, product(100, "VALVE-200mm", Body::Closed([0.17; 3]))))
}

/// Skid with a valve, a plate, a pipe, an open cover and two bolts
fn skid_file() -> String {
    wrap(&format!(
        "{}{}{}{}{}{}{}{}{}{}{}{}{}",
        COMMON,
        product(100, "Skid", Body::None),
        product(200, "Valve", Body::Closed([170.0, 170.0, 170.0])),
        product(300, "Plate", Body::Closed([1000.0, 500.0, 5.0])),
        product(400, "Pipe", Body::Closed([2000.0, 100.0, 100.0])),
        product(500, "Cover", Body::Open([300.0, 300.0, 40.0])),
        product(600, "Bolt", Body::Closed([12.0, 12.0, 36.0])),
        nauo(1000, 100, 200),
        nauo(1001, 100, 300),
        nauo(1002, 100, 400),
        nauo(1003, 100, 500),
        nauo(1004, 100, 600),
        nauo(1005, 100, 600),
    ))
}

/// Fresh working directory holding `source` as `input.stp`
fn workspace(name: &str, source: &str) -> (PathBuf, PathBuf) {
    let dir = std::env::temp_dir().join(format!("ifc_bridge_it_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    let input = dir.join("input.stp");
    fs::write(&input, source).unwrap();
    (dir, input)
}

fn fixed_config(schema: Schema) -> ConversionConfig {
    let mut config = ConversionConfig::auto(schema);
    config.timestamp = Some(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap());
    config
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn test_valve_scenario() {
    let source = valve_file();
    let (dir, input) = workspace("valve", &source);
    let output = dir.join("valve.ifc");

    let summary = auto_convert(&input, &output, &fixed_config(Schema::Ifc4)).unwrap();
    assert_eq!(summary.unit, LengthUnit::Meter);
    assert_eq!(summary.total_parts(), 1);
    assert_eq!(summary.converted_parts(), 1);
    assert_eq!(summary.failed_parts(), 0);
    assert_relative_eq!(summary.report.assumptions[0].confidence, 0.7);

    let rules = RuleFile::load(summary.rules.as_deref().unwrap()).unwrap();
    assert_eq!(rules.rules.len(), 1);
    let rule = &rules.rules[0];
    assert_eq!(rule.matcher.name_pattern.as_deref(), Some("(?i).*(VALVE).*"));
    assert_eq!(rule.assign.target_class, "IfcValve");
    assert_eq!(rule.confidence, Some(0.9));
    let inferred = rules.unit_inference.unwrap();
    assert_eq!(inferred.unit, LengthUnit::Meter);
    assert_eq!(rules.source_fingerprint.as_deref(), Some(fingerprint(source.as_bytes()).as_str()));

    let fp = fingerprint(source.as_bytes());
    let part = &summary.report.parts[0];
    assert_eq!(part.target_class.as_deref(), Some("IfcValve"));
    assert_eq!(part.representation, Some(RepresentationKind::Brep));
    assert_eq!(
        part.global_id.as_deref(),
        Some(global_id(&guid_seed(&fp, "VALVE-200mm", "VALVE-200mm")).as_str())
    );
    assert_eq!(part.candidates[0].target_class, "IfcValve");

    let ifc = read(&output);
    assert_eq!(ifc.matches("=IFCVALVE(").count(), 1);
    assert!(ifc.contains(&format!("'{}'", short_tag(&fp, "VALVE-200mm", "VALVE-200mm"))));
    assert!(ifc.contains("IFCSIUNIT(*,.LENGTHUNIT.,$,.METRE.)"));
    assert!(summary.report.validation.basic.all_passed());
    assert!(summary.report.validation.integrity.as_ref().unwrap().passed);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_skid_accounting_and_invalid_solid() {
    let (dir, input) = workspace("skid", &skid_file());
    let output = dir.join("skid.ifc");

    let summary = auto_convert(&input, &output, &fixed_config(Schema::Ifc4)).unwrap();
    let report = &summary.report;
    assert_eq!(summary.unit, LengthUnit::Millimeter);
    assert_eq!(report.total_parts, 6);
    assert_eq!(report.parts.len(), 6);
    assert_eq!(report.converted_parts + report.failed_parts, report.total_parts);
    assert_eq!(report.failed_parts, 0);

    let paths: Vec<&str> = report.parts.iter().map(|p| p.assembly_path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["Skid/Bolt", "Skid/Bolt:2", "Skid/Cover", "Skid/Pipe", "Skid/Plate", "Skid/Valve"]
    );

    let class_of = |path: &str| {
        report
            .parts
            .iter()
            .find(|p| p.assembly_path == path)
            .and_then(|p| p.target_class.clone())
            .unwrap()
    };
    assert_eq!(class_of("Skid/Valve"), "IfcValve");
    assert_eq!(class_of("Skid/Plate"), "IfcPlate");
    assert_eq!(class_of("Skid/Pipe"), "IfcPipeSegment");
    assert_eq!(class_of("Skid/Bolt"), "IfcMechanicalFastener");

    // The open cover has no volume but is still written, as a mesh
    let cover = report.parts.iter().find(|p| p.assembly_path == "Skid/Cover").unwrap();
    assert!(cover.converted);
    assert!(cover.volume.is_none());
    assert_eq!(cover.representation, Some(RepresentationKind::Tessellation));
    assert_eq!(report.invalid_solids, 1);
    assert_eq!(report.volumes.len(), 5);

    let ifc = read(&output);
    assert_eq!(ifc.matches("=IFCTRIANGULATEDFACESET(").count(), 1);
    assert_eq!(ifc.matches("=IFCFACETEDBREP(").count(), 5);

    let text = read(&summary.qc_text);
    assert!(text.contains("Total parts: 6\n"));
    assert!(text.contains("Invalid solids: 1\n"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_auto_is_deterministic() {
    let (dir, input) = workspace("determinism", &skid_file());
    let output = dir.join("skid.ifc");
    let config = fixed_config(Schema::Ifc4);

    let first = auto_convert(&input, &output, &config).unwrap();
    let ifc = read(&output);
    let rules = read(first.rules.as_deref().unwrap());
    let qc = read(&first.qc_json);

    let second = auto_convert(&input, &output, &config).unwrap();
    assert_eq!(read(&output), ifc);
    assert_eq!(read(second.rules.as_deref().unwrap()), rules);
    assert_eq!(read(&second.qc_json), qc);
    assert_eq!(first.run_id, second.run_id);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_reconversion_with_generated_rules() {
    let (dir, input) = workspace("reconvert", &skid_file());
    let auto_out = dir.join("auto.ifc");
    let auto = auto_convert(&input, &auto_out, &fixed_config(Schema::Ifc4)).unwrap();

    let mut config = fixed_config(Schema::Ifc4);
    config.rules = auto.rules.clone();
    config.unit = auto.unit;
    let converted = convert(&input, &dir.join("convert.ifc"), &config).unwrap();

    let outcome = |parts: &[ifc_bridge_processing::QcPart]| -> Vec<(String, Option<String>, Option<String>)> {
        parts
            .iter()
            .map(|p| (p.assembly_path.clone(), p.target_class.clone(), p.global_id.clone()))
            .collect()
    };
    assert_eq!(outcome(&converted.report.parts), outcome(&auto.report.parts));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_convert_merge_by_name() {
    let (dir, input) = workspace("merge", &skid_file());
    let output = dir.join("merged.ifc");
    let mut config = fixed_config(Schema::Ifc4);
    config.merge_by_name = true;

    let summary = convert(&input, &output, &config).unwrap();
    let report = &summary.report;
    assert_eq!(report.total_parts, 6);
    assert_eq!(report.converted_parts, 5);
    let merged = report.parts.iter().find(|p| p.assembly_path == "Skid/Bolt:2").unwrap();
    assert_eq!(merged.reason, Some(FailureReason::Merged("Skid/Bolt".to_string())));
    // The duplicate keeps its measurements; only the open Cover lacks a volume
    assert!(merged.volume.is_some() && merged.bbox.is_some());
    assert_eq!(report.invalid_solids, 1);
    assert_eq!(report.volumes.len(), 5);
    // No rules: everything is a proxy
    assert_eq!(read(&output).matches("=IFCBUILDINGELEMENTPROXY(").count(), 5);

    let events: Vec<serde_json::Value> = read(&summary.log)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let count = |name: &str| events.iter().filter(|e| e["event"] == name).count();
    assert_eq!(count("conversion_start"), 1);
    assert_eq!(count("part_converted"), 5);
    assert_eq!(count("part_merged"), 1);
    assert_eq!(count("conversion_complete"), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_convert_ifc2x3_with_rules_and_assemblies() {
    let (dir, input) = workspace("ifc2x3", &skid_file());
    let rules_path = dir.join("rules.toml");
    fs::write(
        &rules_path,
        r#"
[default_rule]
target_class = "IfcBuildingElementProxy"

[[rules]]
[rules.match]
name_pattern = "valve"
[rules.assign]
target_class = "IfcValve"
object_type = "Valve"
[rules.assign.classification]
system = "Uniclass"
code = "Pr_65_54_95"
[[rules.assign.properties]]
name = "Project"
value = "${ProjectKey}"
"#,
    )
    .unwrap();

    let output = dir.join("skid.ifc");
    let mut config = fixed_config(Schema::Ifc2x3);
    config.rules = Some(rules_path);
    config.split_by_assembly = true;
    config.project = "Plant 7".to_string();
    config.geom = ifc_bridge_processing::GeometryMode::Mesh;

    let summary = convert(&input, &output, &config).unwrap();
    assert_eq!(summary.converted_parts(), 6);

    let ifc = read(&output);
    assert!(ifc.contains("FILE_SCHEMA(('IFC2X3'));"));
    assert_eq!(ifc.matches("=IFCFLOWCONTROLLER(").count(), 1);
    assert_eq!(ifc.matches("=IFCELEMENTASSEMBLY(").count(), 1);
    assert_eq!(ifc.matches("=IFCSHELLBASEDSURFACEMODEL(").count(), 6);
    assert!(ifc.contains("IFCLABEL('Plant 7')"));
    assert!(ifc.contains("IFCCLASSIFICATIONREFERENCE($,'Pr_65_54_95','Pr_65_54_95',"));
    assert!(summary.report.validation.integrity.as_ref().unwrap().passed);

    let _ = fs::remove_dir_all(&dir);
}
