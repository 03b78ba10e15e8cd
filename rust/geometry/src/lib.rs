// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IFC-Bridge Geometry Processing
//!
//! Loads STEP boundary representations into polygonal solids, validates and
//! heals them behind the [`ShapeKernel`] capability trait, and measures and
//! triangulates them with earcutr and nalgebra.

pub mod brep;
pub mod error;
pub mod kernel;
pub mod mesh;
pub mod processor;
pub mod shape;
pub mod triangulation;

// Re-export nalgebra types for convenience
pub use nalgebra::{Matrix4, Point2, Point3, Vector2, Vector3};

pub use brep::load_shape;
pub use error::{Error, Result};
pub use kernel::{Healed, KernelTolerances, Measurement, PolyhedralKernel, ShapeKernel, Validation};
pub use mesh::{Mesh, PointWelder};
pub use processor::{GeometryProcessor, ProcessedShape, ShapeMetrics};
pub use shape::{box_polyhedron, Face, Loop, PolyFace, PolyShell, Polyhedron, Segment, Shape, Shell, Surface};
pub use triangulation::{triangulate_face, triangulate_polygon};
