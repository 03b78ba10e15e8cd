// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mesh data structures

use nalgebra::{Point3, Vector3};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Indexed triangle mesh in model units
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    /// Vertex positions (x, y, z)
    pub positions: Vec<f64>,
    /// Triangle indices (i0, i1, i2), counter-clockwise seen from outside
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mesh with capacity
    pub fn with_capacity(vertex_count: usize, index_count: usize) -> Self {
        Self {
            positions: Vec::with_capacity(vertex_count * 3),
            indices: Vec::with_capacity(index_count),
        }
    }

    /// Add a vertex, returning its index
    #[inline]
    pub fn add_vertex(&mut self, position: Point3<f64>) -> u32 {
        let index = self.vertex_count() as u32;
        self.positions.extend_from_slice(&[position.x, position.y, position.z]);
        index
    }

    #[inline]
    pub fn add_triangle(&mut self, i0: u32, i1: u32, i2: u32) {
        self.indices.extend_from_slice(&[i0, i1, i2]);
    }

    /// Merge another mesh into this one
    pub fn merge(&mut self, other: &Mesh) {
        if other.is_empty() {
            return;
        }
        let vertex_offset = self.vertex_count() as u32;
        self.positions.extend_from_slice(&other.positions);
        self.indices
            .extend(other.indices.iter().map(|&i| i + vertex_offset));
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn vertex(&self, index: u32) -> Point3<f64> {
        let i = index as usize * 3;
        Point3::new(self.positions[i], self.positions[i + 1], self.positions[i + 2])
    }

    /// Vertex triples of every triangle
    pub fn triangles(&self) -> impl Iterator<Item = [Point3<f64>; 3]> + '_ {
        self.indices
            .chunks_exact(3)
            .map(move |t| [self.vertex(t[0]), self.vertex(t[1]), self.vertex(t[2])])
    }

    /// Calculate bounds (min, max)
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let mut chunks = self.positions.chunks_exact(3);
        let first = chunks.next()?;
        let mut min = Point3::new(first[0], first[1], first[2]);
        let mut max = min;
        for chunk in chunks {
            for axis in 0..3 {
                min[axis] = min[axis].min(chunk[axis]);
                max[axis] = max[axis].max(chunk[axis]);
            }
        }
        Some((min, max))
    }

    /// Signed enclosed volume and its centroid (divergence theorem over
    /// origin-based tetrahedra). Only meaningful for closed meshes.
    pub fn volume_and_centroid(&self) -> (f64, Point3<f64>) {
        let mut volume = 0.0;
        let mut moment = Vector3::zeros();
        for [a, b, c] in self.triangles() {
            let v = a.coords.dot(&b.coords.cross(&c.coords)) / 6.0;
            volume += v;
            moment += (a.coords + b.coords + c.coords) * (v / 4.0);
        }
        if volume.abs() < f64::EPSILON {
            return (volume, Point3::origin());
        }
        (volume, Point3::from(moment / volume))
    }

    /// Merge vertices that coincide within `tolerance`, dropping triangles
    /// that collapse
    pub fn weld(&self, tolerance: f64) -> Mesh {
        let mut welder = PointWelder::new(tolerance);
        let remap: Vec<u32> = self
            .positions
            .chunks_exact(3)
            .map(|c| welder.insert(Point3::new(c[0], c[1], c[2])))
            .collect();
        let mut welded = Mesh::with_capacity(welder.len(), self.indices.len());
        for p in welder.points() {
            welded.add_vertex(*p);
        }
        for t in self.indices.chunks_exact(3) {
            let (a, b, c) = (
                remap[t[0] as usize],
                remap[t[1] as usize],
                remap[t[2] as usize],
            );
            if a != b && b != c && a != c {
                welded.add_triangle(a, b, c);
            }
        }
        welded
    }
}

/// Assigns one id to all points within a tolerance of each other.
///
/// Points are bucketed on a grid with cell size equal to the tolerance and
/// looked up in the neighbouring cells too, so near-coincident points that
/// straddle a cell boundary still weld.
#[derive(Debug, Clone)]
pub struct PointWelder {
    tolerance: f64,
    cells: FxHashMap<[i64; 3], SmallVec<[u32; 2]>>,
    points: Vec<Point3<f64>>,
}

impl PointWelder {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: if tolerance > 0.0 { tolerance } else { 1e-9 },
            cells: FxHashMap::default(),
            points: Vec::new(),
        }
    }

    /// Id of the representative point for `p`, creating one if needed
    pub fn insert(&mut self, p: Point3<f64>) -> u32 {
        let cell = quantize(&p, self.tolerance);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let key = [cell[0] + dx, cell[1] + dy, cell[2] + dz];
                    if let Some(ids) = self.cells.get(&key) {
                        for &id in ids {
                            if (self.points[id as usize] - p).norm() <= self.tolerance {
                                return id;
                            }
                        }
                    }
                }
            }
        }
        let id = self.points.len() as u32;
        self.points.push(p);
        self.cells.entry(cell).or_default().push(id);
        id
    }

    #[inline]
    pub fn point(&self, id: u32) -> Point3<f64> {
        self.points[id as usize]
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Grid cell of a point
#[inline]
fn quantize(p: &Point3<f64>, cell: f64) -> [i64; 3] {
    [
        (p.x / cell).floor() as i64,
        (p.y / cell).floor() as i64,
        (p.z / cell).floor() as i64,
    ]
}
