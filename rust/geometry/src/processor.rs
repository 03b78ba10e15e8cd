// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-part geometry processing: load, discretise, validate, heal, measure
//! and triangulate.

use ifc_bridge_core::{EntityDecoder, ShapeHandle, StepFile};
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::brep::load_shape;
use crate::kernel::{PolyhedralKernel, ShapeKernel};
use crate::mesh::Mesh;
use crate::shape::Polyhedron;
use crate::Result;

/// Measured properties of one part's solid, in model units
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeMetrics {
    /// `[min_x, min_y, min_z, max_x, max_y, max_z]`
    pub bbox: [f64; 6],
    pub volume: Option<f64>,
    pub centroid: Option<[f64; 3]>,
    pub valid: bool,
    pub repaired: bool,
    pub repair_note: Option<String>,
}

impl ShapeMetrics {
    /// Sorted extents `(s, m, l)` of the bounding box
    pub fn extents(&self) -> [f64; 3] {
        let mut e = [
            (self.bbox[3] - self.bbox[0]).abs(),
            (self.bbox[4] - self.bbox[1]).abs(),
            (self.bbox[5] - self.bbox[2]).abs(),
        ];
        e.sort_by(f64::total_cmp);
        e
    }

    /// Length of the bounding-box diagonal
    pub fn diagonal(&self) -> f64 {
        let [a, b, c] = self.extents();
        (a * a + b * b + c * c).sqrt()
    }
}

/// Geometry of one part after processing
#[derive(Debug, Clone)]
pub struct ProcessedShape {
    pub metrics: ShapeMetrics,
    /// Healed polygonal B-rep
    pub polyhedron: Polyhedron,
    pub mesh: Mesh,
}

impl ProcessedShape {
    /// A closed, valid solid bounded only by planes
    pub fn is_planar_solid(&self) -> bool {
        self.metrics.valid && self.metrics.volume.is_some() && self.polyhedron.all_planar()
    }
}

/// Drives a [`ShapeKernel`] over the parts of an assembly
pub struct GeometryProcessor<K: ShapeKernel = PolyhedralKernel> {
    kernel: K,
}

impl Default for GeometryProcessor<PolyhedralKernel> {
    fn default() -> Self {
        Self::new(PolyhedralKernel::default())
    }
}

impl<K: ShapeKernel> GeometryProcessor<K> {
    pub fn new(kernel: K) -> Self {
        Self { kernel }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Validate a shape, healing it when it is invalid or inside out.
    ///
    /// The bounding box is always reported; volume and centroid only when
    /// the final shape is a valid closed solid with non-zero volume.
    pub fn validate_and_heal(&self, shape: Polyhedron) -> (ShapeMetrics, Polyhedron) {
        let validation = self.kernel.validate(&shape);
        let measurement = self.kernel.measure(&shape);
        let inside_out = measurement.volume.is_some_and(|v| v < 0.0);

        if validation.valid && !inside_out {
            let metrics = ShapeMetrics {
                bbox: measurement.bbox.unwrap_or_default(),
                volume: measurement.volume,
                centroid: measurement.centroid,
                valid: true,
                repaired: false,
                repair_note: None,
            };
            return (metrics, shape);
        }

        debug!(issues = ?validation.issues, inside_out, "healing shape");
        match self.kernel.heal(&shape) {
            Ok(healed) => {
                let revalidated = self.kernel.validate(&healed.shape);
                let measured = self.kernel.measure(&healed.shape);
                let solid = revalidated.valid && measured.volume.is_some_and(|v| v > 0.0);
                let metrics = ShapeMetrics {
                    bbox: measured
                        .bbox
                        .or(measurement.bbox)
                        .unwrap_or_default(),
                    volume: measured.volume.filter(|_| solid),
                    centroid: measured.centroid.filter(|_| solid),
                    valid: revalidated.valid,
                    repaired: true,
                    repair_note: Some(healed.note),
                };
                (metrics, healed.shape)
            }
            Err(e) => {
                let metrics = ShapeMetrics {
                    bbox: measurement.bbox.unwrap_or_default(),
                    volume: None,
                    centroid: None,
                    valid: false,
                    repaired: false,
                    repair_note: Some(format!("repair failed: {}", e)),
                };
                (metrics, shape)
            }
        }
    }

    /// Load and process one part
    pub fn process(
        &self,
        decoder: &mut EntityDecoder,
        handle: &ShapeHandle,
        deflection: f64,
        angle: f64,
    ) -> Result<ProcessedShape> {
        let shape = load_shape(decoder, handle)?;
        let polyhedron = self.kernel.mesh(&shape, deflection, angle);
        let (metrics, polyhedron) = self.validate_and_heal(polyhedron);
        let mesh = self.kernel.triangulate(&polyhedron);
        trace!(
            faces = polyhedron.face_count(),
            triangles = mesh.triangle_count(),
            valid = metrics.valid,
            "processed shape"
        );
        Ok(ProcessedShape {
            metrics,
            polyhedron,
            mesh,
        })
    }

    /// Process every handle in parallel, one decoder per worker over the
    /// file's shared index. Results come back in input order.
    pub fn process_all(
        &self,
        step: &StepFile,
        handles: &[&ShapeHandle],
        deflection: f64,
        angle: f64,
    ) -> Vec<Result<ProcessedShape>> {
        handles
            .par_iter()
            .map_init(
                || step.decoder(),
                |decoder, handle| self.process(decoder, handle, deflection, angle),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::box_polyhedron;
    use approx::assert_relative_eq;

    fn processor() -> GeometryProcessor {
        GeometryProcessor::default()
    }

    #[test]
    fn test_valid_box_metrics() {
        let (metrics, _) = processor().validate_and_heal(box_polyhedron([0.0; 3], [10.0, 20.0, 30.0]));
        assert!(metrics.valid);
        assert!(!metrics.repaired);
        assert_relative_eq!(metrics.volume.unwrap(), 6000.0, epsilon = 1e-6);
        assert_eq!(metrics.extents(), [10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_inside_out_box_is_repaired() {
        let mut cube = box_polyhedron([0.0; 3], [1.0; 3]);
        for face in &mut cube.shells[0].faces {
            face.flip();
        }
        let (metrics, healed) = processor().validate_and_heal(cube);
        assert!(metrics.valid && metrics.repaired);
        assert_relative_eq!(metrics.volume.unwrap(), 1.0, epsilon = 1e-9);
        assert!(healed.all_planar());
    }

    #[test]
    fn test_open_shell_has_no_volume() {
        let mut cube = box_polyhedron([0.0; 3], [1.0; 3]);
        cube.shells[0].faces.truncate(5);
        let (metrics, _) = processor().validate_and_heal(cube);
        assert!(!metrics.valid);
        assert!(metrics.repaired);
        assert!(metrics.volume.is_none());
        assert!(metrics.centroid.is_none());
        assert_eq!(metrics.bbox, [0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    }
}
