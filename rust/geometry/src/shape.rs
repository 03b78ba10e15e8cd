// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boundary representation types
//!
//! [`Shape`] is the curve-aware B-rep loaded from the exchange file; arcs are
//! kept exact until [`Shape::discretize`] turns it into a [`Polyhedron`],
//! the polygonal model every kernel operation works on.

use nalgebra::{Matrix4, Point3, Rotation3, Unit, Vector3};
use smallvec::SmallVec;

/// Underlying surface of a face
#[derive(Debug, Clone, PartialEq)]
pub enum Surface {
    Plane,
    /// Right circular cylinder; `ref_dir` marks angle zero
    Cylinder {
        origin: Point3<f64>,
        axis: Vector3<f64>,
        ref_dir: Vector3<f64>,
        radius: f64,
    },
    /// Any other surface; handled by projection only
    Other,
}

impl Surface {
    pub fn is_plane(&self) -> bool {
        matches!(self, Surface::Plane)
    }

    fn transform(&self, m: &Matrix4<f64>) -> Surface {
        match self {
            Surface::Cylinder {
                origin,
                axis,
                ref_dir,
                radius,
            } => Surface::Cylinder {
                origin: m.transform_point(origin),
                axis: m.transform_vector(axis).normalize(),
                ref_dir: m.transform_vector(ref_dir).normalize(),
                radius: *radius,
            },
            other => other.clone(),
        }
    }
}

/// Boundary segment, from its start point to the next segment's start
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Line {
        start: Point3<f64>,
    },
    /// Circular arc swept counter-clockwise about `normal`
    Arc {
        start: Point3<f64>,
        center: Point3<f64>,
        normal: Vector3<f64>,
        sweep: f64,
    },
}

impl Segment {
    pub fn start(&self) -> Point3<f64> {
        match self {
            Segment::Line { start } | Segment::Arc { start, .. } => *start,
        }
    }

    fn transform(&self, m: &Matrix4<f64>) -> Segment {
        match self {
            Segment::Line { start } => Segment::Line {
                start: m.transform_point(start),
            },
            Segment::Arc {
                start,
                center,
                normal,
                sweep,
            } => Segment::Arc {
                start: m.transform_point(start),
                center: m.transform_point(center),
                normal: m.transform_vector(normal).normalize(),
                sweep: *sweep,
            },
        }
    }

    /// Points of the segment excluding its end point
    fn sample(&self, deflection: f64, angle: f64, out: &mut Vec<Point3<f64>>) {
        match self {
            Segment::Line { start } => out.push(*start),
            Segment::Arc {
                start,
                center,
                normal,
                sweep,
            } => {
                let radius = (start - center).norm();
                let steps = arc_steps(radius, sweep.abs(), deflection, angle);
                let axis = Unit::new_normalize(*normal);
                for i in 0..steps {
                    let theta = sweep * i as f64 / steps as f64;
                    let rotation = Rotation3::from_axis_angle(&axis, theta);
                    out.push(center + rotation * (start - center));
                }
            }
        }
    }
}

/// Number of chords for an arc so that both the chord height stays under
/// `deflection` and each chord spans at most `angle` radians
pub fn arc_steps(radius: f64, sweep: f64, deflection: f64, angle: f64) -> usize {
    let mut step = if angle > 0.0 { angle } else { std::f64::consts::FRAC_PI_4 };
    if deflection > 0.0 && radius > deflection {
        step = step.min(2.0 * (1.0 - deflection / radius).acos());
    }
    ((sweep / step).ceil() as usize).clamp(1, 1024)
}

/// Closed boundary loop
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Loop {
    pub segments: Vec<Segment>,
}

impl Loop {
    pub fn from_points(points: impl IntoIterator<Item = Point3<f64>>) -> Self {
        Self {
            segments: points.into_iter().map(|start| Segment::Line { start }).collect(),
        }
    }

    pub fn has_arcs(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Arc { .. }))
    }

    /// Same boundary traversed the other way
    pub fn reverse(&mut self) {
        let n = self.segments.len();
        let reversed = (0..n)
            .rev()
            .map(|i| {
                let end = self.segments[(i + 1) % n].start();
                match &self.segments[i] {
                    Segment::Line { .. } => Segment::Line { start: end },
                    Segment::Arc {
                        center,
                        normal,
                        sweep,
                        ..
                    } => Segment::Arc {
                        start: end,
                        center: *center,
                        normal: -normal,
                        sweep: *sweep,
                    },
                }
            })
            .collect();
        self.segments = reversed;
    }

    fn sample(&self, deflection: f64, angle: f64) -> Vec<Point3<f64>> {
        let mut points = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            segment.sample(deflection, angle, &mut points);
        }
        points
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub outer: Loop,
    pub inner: SmallVec<[Loop; 1]>,
    pub surface: Surface,
}

impl Face {
    pub fn flip(&mut self) {
        self.outer.reverse();
        for hole in self.inner.iter_mut() {
            hole.reverse();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Shell {
    pub faces: Vec<Face>,
    /// Inner void of a solid; oriented inward
    pub void: bool,
}

impl Shell {
    pub fn flip(&mut self) {
        for face in &mut self.faces {
            face.flip();
        }
    }
}

/// Loaded B-rep of one part, in assembly coordinates
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Shape {
    pub shells: Vec<Shell>,
}

impl Shape {
    pub fn is_empty(&self) -> bool {
        self.shells.iter().all(|s| s.faces.is_empty())
    }

    pub fn face_count(&self) -> usize {
        self.shells.iter().map(|s| s.faces.len()).sum()
    }

    /// Apply a placement to every point
    pub fn transform(&mut self, m: &Matrix4<f64>) {
        if *m == Matrix4::identity() {
            return;
        }
        for face in self.shells.iter_mut().flat_map(|s| s.faces.iter_mut()) {
            face.surface = face.surface.transform(m);
            for lp in std::iter::once(&mut face.outer).chain(face.inner.iter_mut()) {
                for segment in lp.segments.iter_mut() {
                    *segment = segment.transform(m);
                }
            }
        }
    }

    /// Sample arcs into chords
    pub fn discretize(&self, deflection: f64, angle: f64) -> Polyhedron {
        Polyhedron {
            shells: self
                .shells
                .iter()
                .map(|shell| PolyShell {
                    void: shell.void,
                    faces: shell
                        .faces
                        .iter()
                        .map(|face| PolyFace {
                            outer: face.outer.sample(deflection, angle),
                            inner: face
                                .inner
                                .iter()
                                .map(|l| l.sample(deflection, angle))
                                .collect(),
                            surface: face.surface.clone(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Polygonal face; the loops are chords of the original boundary
#[derive(Debug, Clone, PartialEq)]
pub struct PolyFace {
    pub outer: Vec<Point3<f64>>,
    pub inner: Vec<Vec<Point3<f64>>>,
    pub surface: Surface,
}

impl PolyFace {
    /// Planar face without holes
    pub fn new(outer: Vec<Point3<f64>>) -> Self {
        Self {
            outer,
            inner: Vec::new(),
            surface: Surface::Plane,
        }
    }

    pub fn is_planar(&self) -> bool {
        self.surface.is_plane()
    }

    /// Reverse the winding of every loop
    pub fn flip(&mut self) {
        self.outer.reverse();
        for hole in &mut self.inner {
            hole.reverse();
        }
    }

    pub fn loops(&self) -> impl Iterator<Item = &Vec<Point3<f64>>> {
        std::iter::once(&self.outer).chain(self.inner.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolyShell {
    pub faces: Vec<PolyFace>,
    pub void: bool,
}

/// Polygonal B-rep
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polyhedron {
    pub shells: Vec<PolyShell>,
}

impl Polyhedron {
    pub fn from_faces(faces: Vec<PolyFace>) -> Self {
        Self {
            shells: vec![PolyShell { faces, void: false }],
        }
    }

    pub fn faces(&self) -> impl Iterator<Item = &PolyFace> {
        self.shells.iter().flat_map(|s| s.faces.iter())
    }

    pub fn points(&self) -> impl Iterator<Item = &Point3<f64>> {
        self.faces().flat_map(|f| f.loops().flatten())
    }

    pub fn face_count(&self) -> usize {
        self.shells.iter().map(|s| s.faces.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.face_count() == 0
    }

    /// True when every face lies on a plane
    pub fn all_planar(&self) -> bool {
        self.faces().all(PolyFace::is_planar)
    }

    /// `[min_x, min_y, min_z, max_x, max_y, max_z]`, or `None` without points
    pub fn bounding_box(&self) -> Option<[f64; 6]> {
        let mut points = self.points().filter(|p| p.iter().all(|c| c.is_finite()));
        let first = points.next()?;
        let mut bbox = [first.x, first.y, first.z, first.x, first.y, first.z];
        for p in points {
            for axis in 0..3 {
                bbox[axis] = bbox[axis].min(p[axis]);
                bbox[axis + 3] = bbox[axis + 3].max(p[axis]);
            }
        }
        Some(bbox)
    }

    /// Length of the bounding-box diagonal
    pub fn extent(&self) -> f64 {
        self.bounding_box()
            .map(|b| (Vector3::new(b[3] - b[0], b[4] - b[1], b[5] - b[2])).norm())
            .unwrap_or(0.0)
    }
}

/// Axis-aligned box from `min` to `max`, outward-oriented
pub fn box_polyhedron(min: [f64; 3], max: [f64; 3]) -> Polyhedron {
    let p = |x: usize, y: usize, z: usize| {
        Point3::new(
            if x == 0 { min[0] } else { max[0] },
            if y == 0 { min[1] } else { max[1] },
            if z == 0 { min[2] } else { max[2] },
        )
    };
    let quads = [
        [p(0, 0, 0), p(0, 1, 0), p(1, 1, 0), p(1, 0, 0)], // bottom, -z
        [p(0, 0, 1), p(1, 0, 1), p(1, 1, 1), p(0, 1, 1)], // top, +z
        [p(0, 0, 0), p(1, 0, 0), p(1, 0, 1), p(0, 0, 1)], // front, -y
        [p(0, 1, 0), p(0, 1, 1), p(1, 1, 1), p(1, 1, 0)], // back, +y
        [p(0, 0, 0), p(0, 0, 1), p(0, 1, 1), p(0, 1, 0)], // left, -x
        [p(1, 0, 0), p(1, 1, 0), p(1, 1, 1), p(1, 0, 1)], // right, +x
    ];
    Polyhedron::from_faces(quads.iter().map(|q| PolyFace::new(q.to_vec())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_arc_steps() {
        assert_eq!(arc_steps(10.0, PI, 0.0, PI / 4.0), 4);
        // tighter deflection means more chords
        assert!(arc_steps(100.0, 2.0 * PI, 0.01, 0.5) > arc_steps(100.0, 2.0 * PI, 1.0, 0.5));
        assert_eq!(arc_steps(1.0, 0.0, 0.5, 0.5), 1);
    }

    #[test]
    fn test_discretize_full_circle() {
        let lp = Loop {
            segments: vec![Segment::Arc {
                start: Point3::new(1.0, 0.0, 0.0),
                center: Point3::origin(),
                normal: Vector3::z(),
                sweep: 2.0 * PI,
            }],
        };
        let shape = Shape {
            shells: vec![Shell {
                faces: vec![Face {
                    outer: lp,
                    inner: SmallVec::new(),
                    surface: Surface::Plane,
                }],
                void: false,
            }],
        };
        let poly = shape.discretize(0.0, PI / 2.0);
        let outer = &poly.shells[0].faces[0].outer;
        assert_eq!(outer.len(), 4);
        assert_relative_eq!(outer[1].y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(outer[2].x, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reverse_loop_with_arc() {
        // Quarter arc from +x to +y, then a line back to +x
        let mut lp = Loop {
            segments: vec![
                Segment::Arc {
                    start: Point3::new(1.0, 0.0, 0.0),
                    center: Point3::origin(),
                    normal: Vector3::z(),
                    sweep: PI / 2.0,
                },
                Segment::Line {
                    start: Point3::new(0.0, 1.0, 0.0),
                },
            ],
        };
        lp.reverse();
        assert_eq!(lp.segments[0].start(), Point3::new(1.0, 0.0, 0.0));
        match &lp.segments[1] {
            Segment::Arc { start, normal, .. } => {
                assert_eq!(*start, Point3::new(0.0, 1.0, 0.0));
                assert_eq!(*normal, -Vector3::z());
            }
            other => panic!("expected arc, got {:?}", other),
        }
        let mut points = Vec::new();
        lp.segments[1].sample(0.0, PI / 4.0, &mut points);
        assert_relative_eq!(points[1].x, points[1].y, epsilon = 1e-12);
    }

    #[test]
    fn test_transform() {
        let mut shape = Shape {
            shells: vec![Shell {
                faces: vec![Face {
                    outer: Loop::from_points([Point3::new(1.0, 0.0, 0.0)]),
                    inner: SmallVec::new(),
                    surface: Surface::Plane,
                }],
                void: false,
            }],
        };
        shape.transform(&Matrix4::new_translation(&Vector3::new(0.0, 5.0, 0.0)));
        let poly = shape.discretize(0.5, 0.5);
        assert_eq!(poly.shells[0].faces[0].outer[0], Point3::new(1.0, 5.0, 0.0));
    }

    #[test]
    fn test_box_bounds() {
        let poly = box_polyhedron([0.0, 0.0, 0.0], [1.0, 2.0, 3.0]);
        assert_eq!(poly.face_count(), 6);
        assert_eq!(poly.bounding_box(), Some([0.0, 0.0, 0.0, 1.0, 2.0, 3.0]));
        assert_relative_eq!(poly.extent(), 14f64.sqrt());
    }
}
