// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boundary representation loading.
//!
//! Handles MANIFOLD_SOLID_BREP, BREP_WITH_VOIDS, FACETED_BREP and
//! SHELL_BASED_SURFACE_MODEL items. Faces may be bounded by POLY_LOOPs or by
//! EDGE_LOOPs of oriented edges; circular edges are kept as exact arcs and
//! every other curve is reduced to the chord between its end vertices.

use std::f64::consts::TAU;
use std::sync::Arc;

use ifc_bridge_core::{axis2_placement_3d, DecodedEntity, EntityDecoder, ShapeHandle};
use nalgebra::{Matrix4, Point3, Vector3};
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::shape::{Face, Loop, Segment, Shape, Shell, Surface};
use crate::triangulation::newell_vector;
use crate::{Error, Result};

/// Load the shape items of a part, placed into assembly coordinates
pub fn load_shape(decoder: &mut EntityDecoder, handle: &ShapeHandle) -> Result<Shape> {
    let mut loader = BrepLoader::new(decoder);
    let mut shape = Shape::default();
    for &item in &handle.items {
        match loader.load_item(item) {
            Ok(shells) => shape.shells.extend(shells),
            Err(e) => warn!(item, error = %e, "skipping shape item"),
        }
    }
    if loader.skipped_faces > 0 {
        debug!(skipped = loader.skipped_faces, "faces without usable bounds");
    }
    if shape.is_empty() {
        return Err(Error::EmptyShape(format!(
            "no faces in {} shape item(s)",
            handle.items.len()
        )));
    }
    shape.transform(&handle.transform);
    Ok(shape)
}

struct BrepLoader<'d, 'a> {
    decoder: &'d mut EntityDecoder<'a>,
    skipped_faces: usize,
}

impl<'d, 'a> BrepLoader<'d, 'a> {
    fn new(decoder: &'d mut EntityDecoder<'a>) -> Self {
        Self {
            decoder,
            skipped_faces: 0,
        }
    }

    fn entity(&mut self, id: u32) -> Result<Arc<DecodedEntity>> {
        Ok(self.decoder.decode_by_id(id)?)
    }

    fn point(&mut self, id: u32) -> Result<Point3<f64>> {
        let [x, y, z] = self.decoder.point(id)?;
        Ok(Point3::new(x, y, z))
    }

    fn load_item(&mut self, id: u32) -> Result<Vec<Shell>> {
        let item = self.entity(id)?;
        match item.type_name() {
            "MANIFOLD_SOLID_BREP" | "FACETED_BREP" => {
                let outer = required_ref(&item, 1)?;
                Ok(vec![self.load_shell(outer, false)?])
            }
            "BREP_WITH_VOIDS" => {
                let outer = required_ref(&item, 1)?;
                let mut shells = vec![self.load_shell(outer, false)?];
                for void in item.get_ref_list(2) {
                    shells.push(self.load_shell(void, true)?);
                }
                Ok(shells)
            }
            "SHELL_BASED_SURFACE_MODEL" => item
                .get_ref_list(1)
                .into_iter()
                .map(|shell| self.load_shell(shell, false))
                .collect(),
            other => Err(Error::UnsupportedEntity {
                id,
                type_name: other.to_string(),
            }),
        }
    }

    fn load_shell(&mut self, id: u32, void: bool) -> Result<Shell> {
        let shell = self.entity(id)?;
        match shell.type_name() {
            "CLOSED_SHELL" | "OPEN_SHELL" => {
                let mut faces = Vec::new();
                for face in shell.get_ref_list(1) {
                    if let Some(face) = self.load_face(face)? {
                        faces.push(face);
                    }
                }
                Ok(Shell { faces, void })
            }
            // (name, *, closed_shell_element, orientation)
            "ORIENTED_CLOSED_SHELL" | "ORIENTED_OPEN_SHELL" => {
                let element = required_ref(&shell, 2)?;
                let mut inner = self.load_shell(element, void)?;
                if !orientation(&shell, 3) {
                    inner.flip();
                }
                Ok(inner)
            }
            other => Err(Error::UnsupportedEntity {
                id,
                type_name: other.to_string(),
            }),
        }
    }

    fn load_face(&mut self, id: u32) -> Result<Option<Face>> {
        let face = self.entity(id)?;
        if face.type_name() == "ORIENTED_FACE" {
            let element = required_ref(&face, 2)?;
            let mut inner = self.load_face(element)?;
            if !orientation(&face, 3) {
                if let Some(f) = inner.as_mut() {
                    f.flip();
                }
            }
            return Ok(inner);
        }

        let surface = match face.get_ref(2) {
            Some(geometry) => self.load_surface(geometry)?,
            None => Surface::Plane,
        };

        let mut outer: Option<Loop> = None;
        let mut bounds: Vec<Loop> = Vec::new();
        for bound_id in face.get_ref_list(1) {
            let bound = self.entity(bound_id)?;
            let Some(loop_id) = bound.get_ref(1) else { continue };
            let Some(mut lp) = self.load_loop(loop_id)? else { continue };
            if !orientation(&bound, 2) {
                lp.reverse();
            }
            if bound.type_name() == "FACE_OUTER_BOUND" && outer.is_none() {
                outer = Some(lp);
            } else {
                bounds.push(lp);
            }
        }

        // Without an explicit outer bound the largest loop is the outer one
        let outer = match outer {
            Some(lp) => lp,
            None if !bounds.is_empty() => {
                let area = |lp: &Loop| {
                    let points: Vec<Point3<f64>> = lp.segments.iter().map(Segment::start).collect();
                    newell_vector(&points).norm()
                };
                let largest = (0..bounds.len())
                    .max_by(|&a, &b| area(&bounds[a]).total_cmp(&area(&bounds[b])))
                    .unwrap_or(0);
                bounds.swap_remove(largest)
            }
            None => {
                self.skipped_faces += 1;
                return Ok(None);
            }
        };

        Ok(Some(Face {
            outer,
            inner: SmallVec::from_vec(bounds),
            surface,
        }))
    }

    fn load_surface(&mut self, id: u32) -> Result<Surface> {
        let surface = self.entity(id)?;
        Ok(match surface.type_name() {
            "PLANE" => Surface::Plane,
            // (name, position, radius)
            "CYLINDRICAL_SURFACE" => {
                let placement = match surface.get_ref(1) {
                    Some(p) => axis2_placement_3d(self.decoder, p)?,
                    None => Matrix4::identity(),
                };
                let radius = surface.get_float(2).unwrap_or(0.0);
                Surface::Cylinder {
                    origin: Point3::new(placement[(0, 3)], placement[(1, 3)], placement[(2, 3)]),
                    axis: column(&placement, 2),
                    ref_dir: column(&placement, 0),
                    radius,
                }
            }
            _ => Surface::Other,
        })
    }

    /// `None` for loops that bound nothing (VERTEX_LOOP, empty lists)
    fn load_loop(&mut self, id: u32) -> Result<Option<Loop>> {
        let lp = self.entity(id)?;
        let segments = match lp.type_name() {
            "POLY_LOOP" => {
                let mut segments = Vec::new();
                for point in lp.get_ref_list(1) {
                    segments.push(Segment::Line {
                        start: self.point(point)?,
                    });
                }
                segments
            }
            "EDGE_LOOP" => {
                let mut segments = Vec::new();
                for edge in lp.get_ref_list(1) {
                    segments.push(self.load_oriented_edge(edge)?);
                }
                segments
            }
            _ => return Ok(None),
        };
        Ok((!segments.is_empty()).then_some(Loop { segments }))
    }

    /// `ORIENTED_EDGE(name, *, *, edge_element, orientation)` over
    /// `EDGE_CURVE(name, start, end, geometry, same_sense)`
    fn load_oriented_edge(&mut self, id: u32) -> Result<Segment> {
        let oriented = self.entity(id)?;
        let (edge, forward) = if oriented.type_name() == "ORIENTED_EDGE" {
            (self.entity(required_ref(&oriented, 3)?)?, orientation(&oriented, 4))
        } else {
            (oriented, true)
        };

        let start = self.vertex(required_ref(&edge, 1)?)?;
        let end = self.vertex(required_ref(&edge, 2)?)?;
        let (from, to) = if forward { (start, end) } else { (end, start) };

        let Some(curve) = edge.get_ref(3) else {
            return Ok(Segment::Line { start: from });
        };
        let curve = self.basis_curve(curve)?;
        if curve.type_name() != "CIRCLE" {
            return Ok(Segment::Line { start: from });
        }

        // (name, position, radius)
        let placement = match curve.get_ref(1) {
            Some(p) => axis2_placement_3d(self.decoder, p)?,
            None => Matrix4::identity(),
        };
        let center = Point3::new(placement[(0, 3)], placement[(1, 3)], placement[(2, 3)]);
        let axis = column(&placement, 2);
        // Traversal runs along the curve parametrisation when both senses agree
        let counter_clockwise = orientation(&edge, 4) == forward;
        let normal = if counter_clockwise { axis } else { -axis };
        Ok(Segment::Arc {
            start: from,
            center,
            normal,
            sweep: sweep_angle(&center, &normal, &from, &to),
        })
    }

    /// Unwrap SURFACE_CURVE / SEAM_CURVE to their 3D curve
    fn basis_curve(&mut self, id: u32) -> Result<Arc<DecodedEntity>> {
        let mut curve = self.entity(id)?;
        for _ in 0..4 {
            match curve.type_name() {
                "SURFACE_CURVE" | "SEAM_CURVE" | "INTERSECTION_CURVE" => {
                    curve = self.entity(required_ref(&curve, 1)?)?;
                }
                _ => break,
            }
        }
        Ok(curve)
    }

    fn vertex(&mut self, id: u32) -> Result<Point3<f64>> {
        let vertex = self.entity(id)?;
        match vertex.type_name() {
            "VERTEX_POINT" => self.point(required_ref(&vertex, 1)?),
            "CARTESIAN_POINT" => self.point(id),
            other => Err(Error::UnsupportedEntity {
                id,
                type_name: other.to_string(),
            }),
        }
    }
}

/// Angle swept counter-clockwise about `normal` from `from` to `to`, in
/// (0, 2pi]; coincident end points make a full circle
fn sweep_angle(
    center: &Point3<f64>,
    normal: &Vector3<f64>,
    from: &Point3<f64>,
    to: &Point3<f64>,
) -> f64 {
    let a = from - center;
    let b = to - center;
    let mut angle = normal.dot(&a.cross(&b)).atan2(a.dot(&b));
    if angle <= 1e-9 {
        angle += TAU;
    }
    angle
}

fn column(m: &Matrix4<f64>, c: usize) -> Vector3<f64> {
    Vector3::new(m[(0, c)], m[(1, c)], m[(2, c)])
}

fn required_ref(entity: &DecodedEntity, index: usize) -> Result<u32> {
    entity.get_ref(index).ok_or_else(|| {
        Error::InvalidTopology(format!(
            "#{} {} has no reference at attribute {}",
            entity.id,
            entity.type_name(),
            index
        ))
    })
}

/// Boolean orientation flag; missing or derived values count as true
fn orientation(entity: &DecodedEntity, index: usize) -> bool {
    entity.get(index).and_then(|v| v.as_bool()).unwrap_or(true)
}
