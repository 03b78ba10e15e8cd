// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end geometry tests over generated exchange files: assembly read,
//! B-rep loading, healing, measurement and triangulation.

use approx::assert_relative_eq;
use ifc_bridge_core::{read_assembly, StepFile};
use ifc_bridge_geometry::{GeometryProcessor, ProcessedShape};
use std::f64::consts::PI;

fn wrap(data: &str) -> String {
    format!(
        "ISO-10303-21;\nHEADER;\n\
         FILE_DESCRIPTION((''),'2;1');\n\
         FILE_NAME('fixture.stp','2024-01-01T00:00:00',(''),(''),'','','');\n\
         FILE_SCHEMA(('AUTOMOTIVE_DESIGN'));\n\
         ENDSEC;\nDATA;\n{}ENDSEC;\nEND-ISO-10303-21;\n",
        data
    )
}

fn box_data(left_face: &str) -> String {
    format!(
        "#1=FACETED_BREP('block',#2);
#2=CLOSED_SHELL('',(#11,#12,#13,#14,#15,#16));
#101=CARTESIAN_POINT('',(0.,0.,0.));
#102=CARTESIAN_POINT('',(10.,0.,0.));
#103=CARTESIAN_POINT('',(10.,20.,0.));
#104=CARTESIAN_POINT('',(0.,20.,0.));
#105=CARTESIAN_POINT('',(0.,0.,5.));
#106=CARTESIAN_POINT('',(10.,0.,5.));
#107=CARTESIAN_POINT('',(10.,20.,5.));
#108=CARTESIAN_POINT('',(0.,20.,5.));
#11=FACE('',(#21));
#21=FACE_OUTER_BOUND('',#31,.T.);
#31=POLY_LOOP('',(#101,#104,#103,#102));
#12=FACE('',(#22));
#22=FACE_OUTER_BOUND('',#32,.T.);
#32=POLY_LOOP('',(#105,#106,#107,#108));
#13=FACE('',(#23));
#23=FACE_OUTER_BOUND('',#33,.T.);
#33=POLY_LOOP('',(#101,#102,#106,#105));
#14=FACE('',(#24));
#24=FACE_OUTER_BOUND('',#34,.T.);
#34=POLY_LOOP('',(#104,#108,#107,#103));
#15=FACE('',(#25));
#25=FACE_OUTER_BOUND('',#35,.T.);
#35=POLY_LOOP('',({}));
#16=FACE('',(#26));
#26=FACE_OUTER_BOUND('',#36,.T.);
#36=POLY_LOOP('',(#102,#103,#107,#106));
",
        left_face
    )
}

const CYLINDER: &str = "#1=MANIFOLD_SOLID_BREP('rod',#2);
#2=CLOSED_SHELL('',(#10,#20,#30));
#3=CARTESIAN_POINT('',(0.,0.,0.));
#4=CARTESIAN_POINT('',(0.,0.,2.));
#5=DIRECTION('',(0.,0.,1.));
#6=DIRECTION('',(1.,0.,0.));
#7=AXIS2_PLACEMENT_3D('',#3,#5,#6);
#8=AXIS2_PLACEMENT_3D('',#4,#5,#6);
#40=CARTESIAN_POINT('',(1.,0.,0.));
#41=CARTESIAN_POINT('',(1.,0.,2.));
#42=VERTEX_POINT('',#40);
#43=VERTEX_POINT('',#41);
#44=CIRCLE('',#7,1.);
#45=CIRCLE('',#8,1.);
#46=VECTOR('',#5,1.);
#47=LINE('',#40,#46);
#50=EDGE_CURVE('',#42,#42,#44,.T.);
#51=EDGE_CURVE('',#43,#43,#45,.T.);
#52=EDGE_CURVE('',#42,#43,#47,.T.);
#10=ADVANCED_FACE('',(#11),#13,.F.);
#11=FACE_OUTER_BOUND('',#12,.T.);
#12=EDGE_LOOP('',(#14));
#14=ORIENTED_EDGE('',*,*,#50,.F.);
#13=PLANE('',#7);
#20=ADVANCED_FACE('',(#21),#23,.T.);
#21=FACE_OUTER_BOUND('',#22,.T.);
#22=EDGE_LOOP('',(#24));
#24=ORIENTED_EDGE('',*,*,#51,.T.);
#23=PLANE('',#8);
#30=ADVANCED_FACE('',(#31),#33,.T.);
#31=FACE_OUTER_BOUND('',#32,.T.);
#32=EDGE_LOOP('',(#34,#35,#36,#37));
#34=ORIENTED_EDGE('',*,*,#50,.T.);
#35=ORIENTED_EDGE('',*,*,#52,.T.);
#36=ORIENTED_EDGE('',*,*,#51,.F.);
#37=ORIENTED_EDGE('',*,*,#52,.F.);
#33=CYLINDRICAL_SURFACE('',#7,1.);
";

fn process(data: &str, deflection: f64, angle: f64) -> ProcessedShape {
    let step = StepFile::from_content(wrap(data), "fixture").unwrap();
    let parts = read_assembly(&step).unwrap();
    assert_eq!(parts.len(), 1, "fallback yields one part");
    let handles: Vec<_> = parts.iter().map(|p| &p.shape).collect();
    let processor: GeometryProcessor = GeometryProcessor::default();
    processor
        .process_all(&step, &handles, deflection, angle)
        .pop()
        .unwrap()
        .unwrap()
}

#[test]
fn test_faceted_box() {
    let processed = process(&box_data("#101,#105,#108,#104"), 0.5, 0.5);
    let m = &processed.metrics;
    assert!(m.valid);
    assert!(!m.repaired);
    assert_relative_eq!(m.volume.unwrap(), 1000.0, epsilon = 1e-6);
    let c = m.centroid.unwrap();
    assert_relative_eq!(c[0], 5.0, epsilon = 1e-9);
    assert_relative_eq!(c[1], 10.0, epsilon = 1e-9);
    assert_relative_eq!(c[2], 2.5, epsilon = 1e-9);
    assert_eq!(m.bbox, [0.0, 0.0, 0.0, 10.0, 20.0, 5.0]);
    assert!(processed.is_planar_solid());
    assert_eq!(processed.mesh.triangle_count(), 12);
}

#[test]
fn test_faceted_box_with_flipped_face_is_healed() {
    let processed = process(&box_data("#101,#104,#108,#105"), 0.5, 0.5);
    let m = &processed.metrics;
    assert!(m.valid);
    assert!(m.repaired);
    assert!(m.repair_note.as_deref().unwrap().contains("re-oriented"));
    assert_relative_eq!(m.volume.unwrap(), 1000.0, epsilon = 1e-6);
}

#[test]
fn test_open_box_is_invalid_without_volume() {
    let data = box_data("#101,#105,#108,#104").replace("#15,#16", "#16");
    let processed = process(&data, 0.5, 0.5);
    let m = &processed.metrics;
    assert!(!m.valid);
    assert!(m.volume.is_none());
    assert_eq!(m.bbox, [0.0, 0.0, 0.0, 10.0, 20.0, 5.0]);
    // Still triangulated for a tessellated fallback
    assert_eq!(processed.mesh.triangle_count(), 10);
}

#[test]
fn test_cylinder_with_circular_edges() {
    let processed = process(CYLINDER, 0.01, 0.1);
    let m = &processed.metrics;
    assert!(m.valid, "{:?}", m.repair_note);
    let volume = m.volume.unwrap();
    assert!(volume > 0.99 * 2.0 * PI && volume < 2.0 * PI, "volume {}", volume);
    let c = m.centroid.unwrap();
    assert_relative_eq!(c[2], 1.0, epsilon = 1e-6);
    assert_relative_eq!(m.bbox[5], 2.0);
    assert_relative_eq!(m.bbox[3], 1.0);
    assert!(m.bbox[0] < -0.99);
    assert!(!processed.is_planar_solid());
}

#[test]
fn test_coarser_tessellation_has_fewer_triangles() {
    let fine = process(CYLINDER, 0.01, 0.1);
    let coarse = process(CYLINDER, 0.5, 0.5);
    assert!(coarse.mesh.triangle_count() < fine.mesh.triangle_count());
    assert!(coarse.metrics.valid);
}
