// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Polygon triangulation utilities
//!
//! Faces are triangulated with earcutr, either projected onto their best
//! fitting plane or, for cylindrical faces, unwrapped into (angle, height)
//! parameter space. Triangle winding always follows the traversal direction
//! of the face's outer loop so that neighbouring faces stay consistent.

use std::f64::consts::{PI, TAU};

use crate::mesh::Mesh;
use crate::shape::{PolyFace, Surface};
use crate::{Error, Point2, Point3, Result, Vector3};

/// Check if a polygon is convex (all cross products have same sign)
#[inline]
fn is_convex(points: &[Point2<f64>]) -> bool {
    if points.len() < 3 {
        return false;
    }

    let n = points.len();
    let mut sign = 0i8;
    for i in 0..n {
        let p0 = &points[i];
        let p1 = &points[(i + 1) % n];
        let p2 = &points[(i + 2) % n];
        let cross = (p1.x - p0.x) * (p2.y - p1.y) - (p1.y - p0.y) * (p2.x - p1.x);
        if cross.abs() > 1e-10 {
            let current = if cross > 0.0 { 1i8 } else { -1i8 };
            if sign == 0 {
                sign = current;
            } else if sign != current {
                return false;
            }
        }
    }
    true
}

/// Triangulate a simple polygon (no holes)
/// Returns triangle indices into the input points
pub fn triangulate_polygon(points: &[Point2<f64>]) -> Result<Vec<usize>> {
    let n = points.len();
    if n < 3 {
        return Err(Error::TriangulationError(
            "Need at least 3 points to triangulate".to_string(),
        ));
    }
    if n == 3 {
        return Ok(vec![0, 1, 2]);
    }
    // Convex polygon: fan
    if n <= 8 && is_convex(points) {
        return Ok((1..n - 1).flat_map(|i| [0, i, i + 1]).collect());
    }

    let vertices: Vec<f64> = points.iter().flat_map(|p| [p.x, p.y]).collect();
    earcutr::earcut(&vertices, &[], 2).map_err(|e| Error::TriangulationError(format!("{:?}", e)))
}

/// Triangulate a polygon with holes
/// Returns triangle indices into the combined vertex array (outer + holes
/// with at least three points, in order)
pub fn triangulate_polygon_with_holes(
    outer: &[Point2<f64>],
    holes: &[Vec<Point2<f64>>],
) -> Result<Vec<usize>> {
    if outer.len() < 3 {
        return Err(Error::TriangulationError(
            "Need at least 3 points in outer boundary".to_string(),
        ));
    }
    let valid_holes: Vec<&Vec<Point2<f64>>> = holes.iter().filter(|h| h.len() >= 3).collect();
    if valid_holes.is_empty() {
        return triangulate_polygon(outer);
    }

    let mut vertices: Vec<f64> = outer.iter().flat_map(|p| [p.x, p.y]).collect();
    let mut hole_indices = Vec::with_capacity(valid_holes.len());
    for hole in valid_holes {
        hole_indices.push(vertices.len() / 2);
        vertices.extend(hole.iter().flat_map(|p| [p.x, p.y]));
    }
    earcutr::earcut(&vertices, &hole_indices, 2)
        .map_err(|e| Error::TriangulationError(format!("{:?}", e)))
}

/// Project 3D points onto the plane through the first point with the given
/// normal. Returns the 2D points and the basis `(u_axis, v_axis, origin)`.
pub fn project_to_2d(
    points_3d: &[Point3<f64>],
    normal: &Vector3<f64>,
) -> (Vec<Point2<f64>>, Vector3<f64>, Vector3<f64>, Point3<f64>) {
    let Some(origin) = points_3d.first().copied() else {
        return (Vec::new(), Vector3::zeros(), Vector3::zeros(), Point3::origin());
    };

    // Axis least parallel to the normal
    let reference = if normal.x.abs() <= normal.y.abs() && normal.x.abs() <= normal.z.abs() {
        Vector3::x()
    } else if normal.y.abs() <= normal.z.abs() {
        Vector3::y()
    } else {
        Vector3::z()
    };
    let u_axis = normal.cross(&reference).normalize();
    let v_axis = normal.cross(&u_axis).normalize();

    let points_2d = project_to_2d_with_basis(points_3d, &u_axis, &v_axis, &origin);
    (points_2d, u_axis, v_axis, origin)
}

/// Project 3D points using an existing coordinate system
pub fn project_to_2d_with_basis(
    points_3d: &[Point3<f64>],
    u_axis: &Vector3<f64>,
    v_axis: &Vector3<f64>,
    origin: &Point3<f64>,
) -> Vec<Point2<f64>> {
    points_3d
        .iter()
        .map(|p| {
            let v = p - origin;
            Point2::new(v.dot(u_axis), v.dot(v_axis))
        })
        .collect()
}

/// Newell's area vector of a closed loop; its length is twice the area
pub fn newell_vector(points: &[Point3<f64>]) -> Vector3<f64> {
    let n = points.len();
    let mut normal = Vector3::<f64>::zeros();
    for i in 0..n {
        let current = &points[i];
        let next = &points[(i + 1) % n];
        normal.x += (current.y - next.y) * (current.z + next.z);
        normal.y += (current.z - next.z) * (current.x + next.x);
        normal.z += (current.x - next.x) * (current.y + next.y);
    }
    normal
}

/// Unit normal of a polygon; `None` when degenerate
pub fn calculate_polygon_normal(points: &[Point3<f64>]) -> Option<Vector3<f64>> {
    if points.len() < 3 {
        return None;
    }
    let normal = newell_vector(points);
    let len = normal.norm();
    (len > 1e-12).then(|| normal / len)
}

/// Signed area of a 2D polygon (positive when counter-clockwise)
pub fn signed_area_2d(points: &[Point2<f64>]) -> f64 {
    let n = points.len();
    (0..n)
        .map(|i| {
            let (a, b) = (&points[i], &points[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
        * 0.5
}

/// Area of a face measured on its own surface
pub fn face_area(face: &PolyFace) -> f64 {
    match &face.surface {
        Surface::Cylinder { .. } => triangulate_face(face)
            .map(|mesh| {
                mesh.triangles()
                    .map(|[a, b, c]| (b - a).cross(&(c - a)).norm() * 0.5)
                    .sum()
            })
            .unwrap_or(0.0),
        _ => {
            let outer = newell_vector(&face.outer).norm() * 0.5;
            let holes: f64 = face.inner.iter().map(|h| newell_vector(h).norm() * 0.5).sum();
            (outer - holes).max(0.0)
        }
    }
}

/// Triangulate one face into a mesh whose vertices are the loop points
pub fn triangulate_face(face: &PolyFace) -> Result<Mesh> {
    if face.outer.len() < 3 {
        return Err(Error::TriangulationError(format!(
            "outer loop has {} points",
            face.outer.len()
        )));
    }
    match &face.surface {
        Surface::Cylinder {
            origin,
            axis,
            ref_dir,
            ..
        } => match triangulate_cylindrical(face, origin, axis, ref_dir) {
            Ok(mesh) => Ok(mesh),
            // Projection still works for shallow patches
            Err(_) => triangulate_projected(face),
        },
        _ => triangulate_projected(face),
    }
}

fn triangulate_projected(face: &PolyFace) -> Result<Mesh> {
    let normal = calculate_polygon_normal(&face.outer)
        .ok_or_else(|| Error::TriangulationError("degenerate outer loop".to_string()))?;
    let (outer_2d, u_axis, v_axis, origin) = project_to_2d(&face.outer, &normal);
    let holes_2d: Vec<Vec<Point2<f64>>> = face
        .inner
        .iter()
        .map(|h| project_to_2d_with_basis(h, &u_axis, &v_axis, &origin))
        .collect();
    let indices = triangulate_polygon_with_holes(&outer_2d, &holes_2d)?;

    let points = combined_points(face);
    let mut mesh = Mesh::with_capacity(points.len(), indices.len());
    for p in &points {
        mesh.add_vertex(*p);
    }
    for t in indices.chunks_exact(3) {
        let (a, b, c) = (points[t[0]], points[t[1]], points[t[2]]);
        let tri_normal = (b - a).cross(&(c - a));
        if tri_normal.dot(&normal) < 0.0 {
            mesh.add_triangle(t[0] as u32, t[2] as u32, t[1] as u32);
        } else {
            mesh.add_triangle(t[0] as u32, t[1] as u32, t[2] as u32);
        }
    }
    Ok(mesh)
}

/// Outer points followed by every hole with at least three points, matching
/// the index space of [`triangulate_polygon_with_holes`]
fn combined_points(face: &PolyFace) -> Vec<Point3<f64>> {
    let mut points = face.outer.clone();
    for hole in face.inner.iter().filter(|h| h.len() >= 3) {
        points.extend_from_slice(hole);
    }
    points
}

/// Cylinder parameters `(theta, height)` of a loop with theta unwrapped
/// along the loop, plus its net winding in turns
fn unwrap_loop(
    points: &[Point3<f64>],
    origin: &Point3<f64>,
    axis: &Vector3<f64>,
    x_dir: &Vector3<f64>,
    y_dir: &Vector3<f64>,
) -> (Vec<Point2<f64>>, i32) {
    let mut params = Vec::with_capacity(points.len());
    let mut previous: Option<f64> = None;
    for p in points {
        let v = p - origin;
        let raw = v.dot(y_dir).atan2(v.dot(x_dir));
        let theta = match previous {
            Some(prev) => prev + wrap_angle(raw - prev),
            None => raw,
        };
        previous = Some(theta);
        params.push(Point2::new(theta, v.dot(axis)));
    }
    let winding = match (params.first(), params.last()) {
        (Some(first), Some(last)) => {
            let closing = wrap_angle(first.x - last.x);
            ((last.x + closing - first.x) / TAU).round() as i32
        }
        _ => 0,
    };
    (params, winding)
}

/// Wrap an angle difference into (-pi, pi]
fn wrap_angle(mut d: f64) -> f64 {
    while d > PI {
        d -= TAU;
    }
    while d <= -PI {
        d += TAU;
    }
    d
}

fn triangulate_cylindrical(
    face: &PolyFace,
    origin: &Point3<f64>,
    axis: &Vector3<f64>,
    ref_dir: &Vector3<f64>,
) -> Result<Mesh> {
    let x_dir = (ref_dir - axis * ref_dir.dot(axis)).normalize();
    let y_dir = axis.cross(&x_dir);

    let loops: Vec<&Vec<Point3<f64>>> = face.loops().filter(|l| l.len() >= 2).collect();
    let unwrapped: Vec<(Vec<Point2<f64>>, i32)> = loops
        .iter()
        .map(|l| unwrap_loop(l, origin, axis, &x_dir, &y_dir))
        .collect();

    let banded = unwrapped.iter().filter(|(_, winding)| *winding != 0).count();
    match (banded, unwrapped.len()) {
        (0, 1) => zip_monotone(loops[0], &unwrapped[0].0),
        (2, 2) => Ok(stitch_band(
            [loops[0], loops[1]],
            [&unwrapped[0], &unwrapped[1]],
        )),
        (banded, total) => Err(Error::TriangulationError(format!(
            "unsupported cylindrical face: {} loops, {} wrapping",
            total, banded
        ))),
    }
}

/// Strip triangulation of a patch that is monotone in the angle parameter.
///
/// The loop is split at its extreme angles into two chains, which are zipped
/// together in order of angle. Arc points sharing a height stay on the
/// boundary, so no triangle cuts across the cylinder.
fn zip_monotone(points: &[Point3<f64>], params: &[Point2<f64>]) -> Result<Mesh> {
    let n = params.len();
    let sense = signed_area_2d(params);
    if n < 3 || sense.abs() < 1e-15 {
        return Err(Error::TriangulationError(
            "outer loop has no parametric area".to_string(),
        ));
    }
    let order = |i: &usize, j: &usize| {
        params[*i]
            .x
            .total_cmp(&params[*j].x)
            .then(params[*i].y.total_cmp(&params[*j].y))
    };
    let (Some(lo), Some(hi)) = ((0..n).min_by(order), (0..n).max_by(order)) else {
        return Err(Error::TriangulationError("empty loop".to_string()));
    };
    let walk = |step: usize| {
        let mut chain = vec![lo];
        let mut k = lo;
        while k != hi {
            k = (k + step) % n;
            chain.push(k);
        }
        chain
    };
    let (a, b) = (walk(1), walk(n - 1));
    let monotone = |chain: &[usize]| {
        chain
            .windows(2)
            .all(|w| params[w[1]].x >= params[w[0]].x - 1e-9)
    };
    if !monotone(&a) || !monotone(&b) {
        return Err(Error::TriangulationError(
            "cylindrical patch is not monotone".to_string(),
        ));
    }

    let mut mesh = Mesh::with_capacity(n, 3 * n);
    for p in points {
        mesh.add_vertex(*p);
    }
    let (mut i, mut j) = (0usize, 0usize);
    while i + 1 < a.len() || j + 1 < b.len() {
        let advance_a = if i + 1 >= a.len() {
            false
        } else if j + 1 >= b.len() {
            true
        } else {
            params[a[i + 1]].x <= params[b[j + 1]].x
        };
        let tri = if advance_a {
            i += 1;
            [a[i - 1], a[i], b[j]]
        } else {
            j += 1;
            [a[i], b[j], b[j - 1]]
        };
        if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
            continue;
        }
        let area = signed_area_2d(&[params[tri[0]], params[tri[1]], params[tri[2]]]);
        if area.abs() < 1e-14 {
            continue;
        }
        let [p, q, r] = tri.map(|k| k as u32);
        if area * sense < 0.0 {
            mesh.add_triangle(p, r, q);
        } else {
            mesh.add_triangle(p, q, r);
        }
    }
    Ok(mesh)
}

/// Zip two loops that each wind once around the axis into a strip
fn stitch_band(loops: [&Vec<Point3<f64>>; 2], unwrapped: [&(Vec<Point2<f64>>, i32); 2]) -> Mesh {
    let mut mesh = Mesh::new();
    // Loop with the lower mean height drives the orientation
    let mean_h = |l: &[Point2<f64>]| l.iter().map(|p| p.y).sum::<f64>() / l.len() as f64;
    let lower = if mean_h(&unwrapped[0].0) <= mean_h(&unwrapped[1].0) { 0 } else { 1 };
    let counter_clockwise = unwrapped[lower].1 > 0;

    // Each ring as (theta mod 2pi, vertex index), sorted by theta
    let mut rings: [Vec<(f64, u32)>; 2] = [Vec::new(), Vec::new()];
    for (k, ring) in rings.iter_mut().enumerate() {
        for (p, param) in loops[k].iter().zip(unwrapped[k].0.iter()) {
            ring.push((param.x.rem_euclid(TAU), mesh.add_vertex(*p)));
        }
        ring.sort_by(|a, b| a.0.total_cmp(&b.0));
    }

    let (a, b) = (&rings[lower], &rings[1 - lower]);
    let (na, nb) = (a.len(), b.len());
    let (mut i, mut j) = (0usize, 0usize);
    // Advance along whichever ring has the smaller next angle
    while i < na || j < nb {
        let next_a = a[(i + 1) % na].0 + if i + 1 >= na { TAU } else { 0.0 };
        let next_b = b[(j + 1) % nb].0 + if j + 1 >= nb { TAU } else { 0.0 };
        let advance_a = j >= nb || (i < na && next_a <= next_b);
        let (p, q, r) = if advance_a {
            let tri = (a[i % na].1, a[(i + 1) % na].1, b[j % nb].1);
            i += 1;
            tri
        } else {
            let tri = (a[i % na].1, b[(j + 1) % nb].1, b[j % nb].1);
            j += 1;
            tri
        };
        if counter_clockwise {
            mesh.add_triangle(p, q, r);
        } else {
            mesh.add_triangle(p, r, q);
        }
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_triangulate_square() {
        let points = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        assert_eq!(triangulate_polygon(&points).unwrap().len(), 6);
    }

    #[test]
    fn test_triangulate_insufficient_points() {
        let points = vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)];
        assert!(triangulate_polygon(&points).is_err());
    }

    #[test]
    fn test_triangulate_square_with_hole() {
        let outer = vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ];
        let hole = vec![
            Point2::new(3.0, 3.0),
            Point2::new(7.0, 3.0),
            Point2::new(7.0, 7.0),
            Point2::new(3.0, 7.0),
        ];
        let indices = triangulate_polygon_with_holes(&outer, &[hole]).unwrap();
        assert_eq!(indices.len(), 8 * 3);
    }

    #[test]
    fn test_polygon_normal() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let normal = calculate_polygon_normal(&points).unwrap();
        assert_relative_eq!(normal.z, 1.0);
        assert!(calculate_polygon_normal(&points[..2]).is_none());
    }

    #[test]
    fn test_face_winding_follows_loop() {
        // Clockwise seen from +z, so triangles must face -z
        let face = PolyFace::new(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(2.0, 1.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ]);
        let mesh = triangulate_face(&face).unwrap();
        assert_eq!(mesh.triangle_count(), 2);
        for [a, b, c] in mesh.triangles() {
            assert!((b - a).cross(&(c - a)).z < 0.0);
        }
        assert_relative_eq!(face_area(&face), 2.0);
    }

    #[test]
    fn test_face_area_with_hole() {
        let mut face = PolyFace::new(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(4.0, 4.0, 0.0),
            Point3::new(0.0, 4.0, 0.0),
        ]);
        face.inner.push(vec![
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(1.0, 2.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
            Point3::new(2.0, 1.0, 0.0),
        ]);
        assert_relative_eq!(face_area(&face), 15.0);
    }

    fn ring(z: f64, n: usize, reverse: bool) -> Vec<Point3<f64>> {
        let mut points: Vec<Point3<f64>> = (0..n)
            .map(|i| {
                let t = TAU * i as f64 / n as f64;
                Point3::new(t.cos(), t.sin(), z)
            })
            .collect();
        if reverse {
            points.reverse();
        }
        points
    }

    #[test]
    fn test_cylinder_band_faces_outward() {
        let face = PolyFace {
            outer: ring(0.0, 16, false),
            inner: vec![ring(2.0, 16, true)],
            surface: Surface::Cylinder {
                origin: Point3::origin(),
                axis: Vector3::z(),
                ref_dir: Vector3::x(),
                radius: 1.0,
            },
        };
        let mesh = triangulate_face(&face).unwrap();
        assert_eq!(mesh.triangle_count(), 32);
        for [a, b, c] in mesh.triangles() {
            let normal = (b - a).cross(&(c - a));
            let centre = (a.coords + b.coords + c.coords) / 3.0;
            let radial = Vector3::new(centre.x, centre.y, 0.0);
            assert!(normal.dot(&radial) > 0.0);
        }
    }

    #[test]
    fn test_cylinder_patch_in_parameter_space() {
        // Half cylinder patch: arc at z=0, line up, arc back at z=1, line down
        let mut outer: Vec<Point3<f64>> = (0..=8)
            .map(|i| {
                let t = PI * i as f64 / 8.0;
                Point3::new(t.cos(), t.sin(), 0.0)
            })
            .collect();
        outer.extend((0..=8).rev().map(|i| {
            let t = PI * i as f64 / 8.0;
            Point3::new(t.cos(), t.sin(), 1.0)
        }));
        let face = PolyFace {
            outer,
            inner: Vec::new(),
            surface: Surface::Cylinder {
                origin: Point3::origin(),
                axis: Vector3::z(),
                ref_dir: Vector3::x(),
                radius: 1.0,
            },
        };
        let mesh = triangulate_face(&face).unwrap();
        assert_eq!(mesh.triangle_count(), 16);
        let area: f64 = mesh
            .triangles()
            .map(|[a, b, c]| (b - a).cross(&(c - a)).norm() * 0.5)
            .sum();
        // chordal approximation of pi
        assert!(area > 3.0 && area < PI);
    }
}
