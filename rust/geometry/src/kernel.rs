// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shape kernel capability interface and the polyhedral implementation.
//!
//! Everything downstream of loading talks to [`ShapeKernel`]; the
//! [`PolyhedralKernel`] works on discretised B-reps with nalgebra points.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::mesh::{Mesh, PointWelder};
use crate::shape::{PolyFace, PolyShell, Polyhedron, Shape};
use crate::triangulation::{face_area, triangulate_face};
use crate::{Error, Result};

/// Kernel tolerances. `weld` and `min_area` are relative to the shape's
/// bounding-box diagonal (and its square); the mesh values are in model units
/// and radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelTolerances {
    pub weld: f64,
    pub min_area: f64,
    pub deflection: f64,
    pub angle: f64,
}

impl Default for KernelTolerances {
    fn default() -> Self {
        Self {
            weld: 1e-6,
            min_area: 1e-12,
            deflection: 0.5,
            angle: 0.5,
        }
    }
}

/// Result of [`ShapeKernel::validate`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validation {
    pub valid: bool,
    /// Every undirected edge is used by exactly two face sides
    pub closed: bool,
    /// Every directed edge is used at most once
    pub oriented: bool,
    pub issues: Vec<String>,
}

/// Result of [`ShapeKernel::heal`]
#[derive(Debug, Clone)]
pub struct Healed {
    pub shape: Polyhedron,
    /// One-line summary of the repairs applied
    pub note: String,
}

/// Result of [`ShapeKernel::measure`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    pub bbox: Option<[f64; 6]>,
    pub volume: Option<f64>,
    pub centroid: Option<[f64; 3]>,
}

/// Geometry kernel operations the conversion pipeline relies on
pub trait ShapeKernel: Send + Sync {
    fn tolerances(&self) -> &KernelTolerances;

    /// Polygonal model of a loaded shape; arcs sampled with the given chord
    /// deflection and maximum angle
    fn mesh(&self, shape: &Shape, deflection: f64, angle: f64) -> Polyhedron;

    fn validate(&self, shape: &Polyhedron) -> Validation;

    fn heal(&self, shape: &Polyhedron) -> Result<Healed>;

    /// Bounding box always; volume and centroid when the enclosed volume is
    /// non-zero
    fn measure(&self, shape: &Polyhedron) -> Measurement;

    /// Best-effort triangulation; faces that fail are skipped
    fn triangulate(&self, shape: &Polyhedron) -> Mesh;
}

/// Planar-face B-rep kernel
#[derive(Debug, Clone, Default)]
pub struct PolyhedralKernel {
    tolerances: KernelTolerances,
}

impl PolyhedralKernel {
    pub fn new(tolerances: KernelTolerances) -> Self {
        Self { tolerances }
    }

    fn weld_tolerance(&self, shape: &Polyhedron) -> f64 {
        (self.tolerances.weld * shape.extent()).max(1e-9)
    }

    fn min_area(&self, shape: &Polyhedron) -> f64 {
        self.tolerances.min_area * shape.extent().powi(2)
    }
}

/// Welded vertex ids of every loop of a face
type FaceLoops = Vec<Vec<u32>>;

/// Directed edges of a face's loops, skipping repeated points
fn directed_edges(loops: &FaceLoops) -> impl Iterator<Item = (u32, u32)> + '_ {
    loops.iter().flat_map(|lp| {
        let n = lp.len();
        (0..n)
            .map(move |i| (lp[i], lp[(i + 1) % n]))
            .filter(|(a, b)| a != b)
    })
}

fn weld_face(welder: &mut PointWelder, face: &PolyFace) -> FaceLoops {
    face.loops()
        .map(|lp| lp.iter().map(|p| welder.insert(*p)).collect())
        .collect()
}

/// Remove consecutive repeats (including across the closing edge)
fn dedup_loop(lp: &mut Vec<u32>) {
    lp.dedup();
    while lp.len() > 1 && lp.first() == lp.last() {
        lp.pop();
    }
}

/// Edge usage counts of one shell
#[derive(Default)]
struct EdgeCounts {
    undirected: FxHashMap<(u32, u32), u32>,
    directed: FxHashMap<(u32, u32), u32>,
}

impl EdgeCounts {
    fn of(faces: &[FaceLoops]) -> Self {
        let mut counts = Self::default();
        for loops in faces {
            for (a, b) in directed_edges(loops) {
                *counts.undirected.entry((a.min(b), a.max(b))).or_default() += 1;
                *counts.directed.entry((a, b)).or_default() += 1;
            }
        }
        counts
    }

    fn open_edges(&self) -> usize {
        self.undirected.values().filter(|&&c| c != 2).count()
    }

    fn repeated_directed(&self) -> usize {
        self.directed.values().filter(|&&c| c > 1).count()
    }
}

impl ShapeKernel for PolyhedralKernel {
    fn tolerances(&self) -> &KernelTolerances {
        &self.tolerances
    }

    fn mesh(&self, shape: &Shape, deflection: f64, angle: f64) -> Polyhedron {
        shape.discretize(deflection, angle)
    }

    fn validate(&self, shape: &Polyhedron) -> Validation {
        let mut issues = Vec::new();
        if shape.is_empty() {
            return Validation {
                issues: vec!["no faces".to_string()],
                ..Default::default()
            };
        }

        if shape.points().any(|p| !p.iter().all(|c| c.is_finite())) {
            issues.push("non-finite coordinates".to_string());
        }

        let mut welder = PointWelder::new(self.weld_tolerance(shape));
        let min_area = self.min_area(shape);
        let mut short_loops = 0;
        let mut repeated_points = 0;
        let mut degenerate = 0;
        let mut closed = true;
        let mut oriented = true;

        for shell in &shape.shells {
            let mut welded = Vec::with_capacity(shell.faces.len());
            for face in &shell.faces {
                let loops = weld_face(&mut welder, face);
                for lp in &loops {
                    let mut distinct = lp.clone();
                    dedup_loop(&mut distinct);
                    if distinct.len() != lp.len() {
                        repeated_points += 1;
                    }
                    if distinct.len() < 3 {
                        short_loops += 1;
                    }
                }
                if face_area(face) <= min_area {
                    degenerate += 1;
                }
                welded.push(loops);
            }
            let counts = EdgeCounts::of(&welded);
            let open = counts.open_edges();
            let repeated = counts.repeated_directed();
            if open > 0 {
                closed = false;
                issues.push(format!("{} open or non-manifold edges", open));
            }
            if repeated > 0 {
                oriented = false;
                issues.push(format!("{} inconsistently oriented edges", repeated));
            }
        }

        if short_loops > 0 {
            issues.push(format!("{} loops with fewer than 3 distinct points", short_loops));
        }
        if repeated_points > 0 {
            issues.push(format!("{} loops with repeated points", repeated_points));
        }
        if degenerate > 0 {
            issues.push(format!("{} faces with zero area", degenerate));
        }

        Validation {
            valid: issues.is_empty(),
            closed,
            oriented,
            issues,
        }
    }

    fn heal(&self, shape: &Polyhedron) -> Result<Healed> {
        let tolerance = self.weld_tolerance(shape);
        let min_area = self.min_area(shape);
        let mut welder = PointWelder::new(tolerance);
        let mut moved_points = 0usize;

        let mut dropped_faces = 0usize;
        let mut flipped_faces = 0usize;
        let mut flipped_shells = 0usize;
        let mut shells = Vec::with_capacity(shape.shells.len());

        for shell in &shape.shells {
            // Weld and clean loops
            let mut faces: Vec<(FaceLoops, PolyFace)> = Vec::with_capacity(shell.faces.len());
            for face in &shell.faces {
                if !face.loops().flatten().all(|p| p.iter().all(|c| c.is_finite())) {
                    dropped_faces += 1;
                    continue;
                }
                let mut loops: FaceLoops = face
                    .loops()
                    .map(|lp| {
                        lp.iter()
                            .map(|p| {
                                let id = welder.insert(*p);
                                if welder.point(id) != *p {
                                    moved_points += 1;
                                }
                                id
                            })
                            .collect()
                    })
                    .collect();
                for lp in loops.iter_mut() {
                    dedup_loop(lp);
                }
                if loops[0].len() < 3 {
                    dropped_faces += 1;
                    continue;
                }
                let mut kept: FaceLoops = vec![loops[0].clone()];
                kept.extend(loops.into_iter().skip(1).filter(|lp| lp.len() >= 3));
                let to_points = |lp: &Vec<u32>| lp.iter().map(|&i| welder.point(i)).collect();
                let cleaned = PolyFace {
                    outer: to_points(&kept[0]),
                    inner: kept[1..].iter().map(to_points).collect(),
                    surface: face.surface.clone(),
                };
                if face_area(&cleaned) <= min_area {
                    dropped_faces += 1;
                    continue;
                }
                faces.push((kept, cleaned));
            }

            flipped_faces += orient_faces(&mut faces);

            let mut healed = PolyShell {
                faces: faces.into_iter().map(|(_, face)| face).collect(),
                void: shell.void,
            };
            let volume = shell_mesh(&healed).volume_and_centroid().0;
            if (volume < 0.0 && !shell.void) || (volume > 0.0 && shell.void) {
                for face in &mut healed.faces {
                    face.flip();
                }
                flipped_shells += 1;
            }
            if !healed.faces.is_empty() {
                shells.push(healed);
            }
        }

        let healed = Polyhedron { shells };
        if healed.is_empty() {
            return Err(Error::EmptyShape(
                "no faces left after removing degenerate geometry".to_string(),
            ));
        }

        let mut notes = Vec::new();
        if moved_points > 0 {
            notes.push(format!(
                "welded {} vertices within {:.3e}",
                moved_points, tolerance
            ));
        }
        if dropped_faces > 0 {
            notes.push(format!("removed {} degenerate faces", dropped_faces));
        }
        if flipped_faces > 0 {
            notes.push(format!("re-oriented {} faces", flipped_faces));
        }
        if flipped_shells > 0 {
            notes.push(format!("inverted {} shells", flipped_shells));
        }
        let note = if notes.is_empty() {
            "no repair applied".to_string()
        } else {
            notes.join("; ")
        };
        debug!(%note, "healed shape");
        Ok(Healed {
            shape: healed,
            note,
        })
    }

    fn measure(&self, shape: &Polyhedron) -> Measurement {
        let bbox = shape.bounding_box();
        let (volume, centroid) = self.triangulate(shape).volume_and_centroid();
        let scale = shape.extent().powi(3);
        if volume.abs() <= 1e-12 * scale || !volume.is_finite() {
            return Measurement {
                bbox,
                ..Default::default()
            };
        }
        Measurement {
            bbox,
            volume: Some(volume),
            centroid: Some([centroid.x, centroid.y, centroid.z]),
        }
    }

    fn triangulate(&self, shape: &Polyhedron) -> Mesh {
        let mut mesh = Mesh::new();
        for shell in &shape.shells {
            mesh.merge(&shell_mesh(shell));
        }
        mesh.weld(self.weld_tolerance(shape))
    }
}

/// Triangles of every face of a shell; failing faces are skipped
fn shell_mesh(shell: &PolyShell) -> Mesh {
    let mut mesh = Mesh::new();
    let mut failed = 0usize;
    for face in &shell.faces {
        match triangulate_face(face) {
            Ok(face_mesh) => mesh.merge(&face_mesh),
            Err(_) => failed += 1,
        }
    }
    if failed > 0 {
        debug!(failed, "faces skipped during triangulation");
    }
    mesh
}

/// Make neighbouring faces traverse shared edges in opposite directions,
/// propagating breadth-first from the first face of every connected group.
/// Returns the number of faces flipped.
fn orient_faces(faces: &mut [(FaceLoops, PolyFace)]) -> usize {
    let mut edge_faces: FxHashMap<(u32, u32), Vec<usize>> = FxHashMap::default();
    for (index, (loops, _)) in faces.iter().enumerate() {
        for (a, b) in directed_edges(loops) {
            edge_faces.entry((a.min(b), a.max(b))).or_default().push(index);
        }
    }

    let uses_directed = |loops: &FaceLoops, edge: (u32, u32)| {
        directed_edges(loops).any(|e| e == edge)
    };

    let mut visited = vec![false; faces.len()];
    let mut flipped = 0;
    for seed in 0..faces.len() {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        let mut queue = VecDeque::from([seed]);
        while let Some(current) = queue.pop_front() {
            let edges: Vec<(u32, u32)> = directed_edges(&faces[current].0).collect();
            for (a, b) in edges {
                let Some(neighbours) = edge_faces.get(&(a.min(b), a.max(b))) else {
                    continue;
                };
                // Only manifold edges say anything about orientation
                if neighbours.len() != 2 {
                    continue;
                }
                for &next in neighbours {
                    if next == current || visited[next] {
                        continue;
                    }
                    visited[next] = true;
                    if uses_directed(&faces[next].0, (a, b)) {
                        let (loops, face) = &mut faces[next];
                        for lp in loops.iter_mut() {
                            lp.reverse();
                        }
                        face.flip();
                        flipped += 1;
                    }
                    queue.push_back(next);
                }
            }
        }
    }
    flipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::box_polyhedron;
    use approx::assert_relative_eq;
    use crate::Point3;

    fn kernel() -> PolyhedralKernel {
        PolyhedralKernel::default()
    }

    #[test]
    fn test_box_is_valid() {
        let cube = box_polyhedron([0.0, 0.0, 0.0], [2.0, 3.0, 4.0]);
        let validation = kernel().validate(&cube);
        assert!(validation.valid, "{:?}", validation.issues);
        assert!(validation.closed && validation.oriented);

        let m = kernel().measure(&cube);
        assert_relative_eq!(m.volume.unwrap(), 24.0, epsilon = 1e-9);
        let c = m.centroid.unwrap();
        assert_relative_eq!(c[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(c[2], 2.0, epsilon = 1e-9);
        assert_eq!(m.bbox, Some([0.0, 0.0, 0.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_open_box_is_not_closed() {
        let mut cube = box_polyhedron([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        cube.shells[0].faces.pop();
        let validation = kernel().validate(&cube);
        assert!(!validation.valid);
        assert!(!validation.closed);
        assert!(validation.oriented);
    }

    #[test]
    fn test_heal_flipped_face() {
        let mut cube = box_polyhedron([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        cube.shells[0].faces[3].flip();
        let kernel = kernel();
        assert!(!kernel.validate(&cube).oriented);

        let healed = kernel.heal(&cube).unwrap();
        assert!(healed.note.contains("re-oriented 1 faces"), "{}", healed.note);
        assert!(kernel.validate(&healed.shape).valid);
        assert_relative_eq!(kernel.measure(&healed.shape).volume.unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_heal_inside_out_box() {
        let mut cube = box_polyhedron([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        for face in &mut cube.shells[0].faces {
            face.flip();
        }
        let kernel = kernel();
        assert!(kernel.measure(&cube).volume.unwrap() < 0.0);
        let healed = kernel.heal(&cube).unwrap();
        assert!(healed.note.contains("inverted 1 shells"));
        assert_relative_eq!(kernel.measure(&healed.shape).volume.unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_heal_drops_degenerate_face_and_repeats() {
        let mut cube = box_polyhedron([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let first = cube.shells[0].faces[0].outer[0];
        cube.shells[0].faces[0].outer.insert(1, first);
        cube.shells[0]
            .faces
            .push(PolyFace::new(vec![first, first, Point3::new(1.0, 0.0, 0.0)]));
        let kernel = kernel();
        assert!(!kernel.validate(&cube).valid);

        let healed = kernel.heal(&cube).unwrap();
        assert_eq!(healed.shape.face_count(), 6);
        assert!(healed.note.contains("removed 1 degenerate faces"));
        assert!(kernel.validate(&healed.shape).valid);
    }

    #[test]
    fn test_heal_nothing_left() {
        let p = Point3::new(0.0, 0.0, 0.0);
        let sliver = Polyhedron::from_faces(vec![PolyFace::new(vec![p, p, p])]);
        assert!(matches!(kernel().heal(&sliver), Err(Error::EmptyShape(_))));
    }

    #[test]
    fn test_void_reduces_volume() {
        let mut solid = box_polyhedron([0.0, 0.0, 0.0], [4.0, 4.0, 4.0]);
        let mut void = box_polyhedron([1.0, 1.0, 1.0], [2.0, 2.0, 2.0]).shells.remove(0);
        void.void = true;
        for face in &mut void.faces {
            face.flip();
        }
        solid.shells.push(void);
        let kernel = kernel();
        assert!(kernel.validate(&solid).valid);
        assert_relative_eq!(kernel.measure(&solid).volume.unwrap(), 63.0, epsilon = 1e-9);
    }

    #[test]
    fn test_triangulate_welds_shared_corners() {
        let cube = box_polyhedron([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let mesh = kernel().triangulate(&cube);
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.triangle_count(), 12);
    }
}
