// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Placement parsing shared by the assembly reader and geometry loading

use nalgebra::{Matrix4, Vector3};

use crate::decoder::EntityDecoder;
use crate::error::{Error, Result};

/// Parse `AXIS2_PLACEMENT_3D(name, location, axis, ref_direction)` into a
/// transformation matrix.
///
/// Axis defaults to +Z and ref_direction to +X. The X axis is made
/// orthogonal to Z (Gram-Schmidt); a ref_direction parallel to the axis is
/// replaced by the world axis least aligned with it.
pub fn axis2_placement_3d(decoder: &mut EntityDecoder, id: u32) -> Result<Matrix4<f64>> {
    let placement = decoder.decode_by_id(id)?;
    let location = match placement.get_ref(1) {
        Some(point) => decoder.point(point)?,
        None => [0.0; 3],
    };

    let z = match placement.get_ref(2) {
        Some(d) => direction(decoder, d)?,
        None => Vector3::z(),
    };
    let x_hint = match placement.get_ref(3) {
        Some(d) => direction(decoder, d)?,
        None => Vector3::x(),
    };

    let mut x = x_hint - z * x_hint.dot(&z);
    if x.norm() < 1e-12 {
        let fallback = if z.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
        x = fallback - z * fallback.dot(&z);
    }
    let x = x.normalize();
    let y = z.cross(&x);

    #[rustfmt::skip]
    let matrix = Matrix4::new(
        x.x, y.x, z.x, location[0],
        x.y, y.y, z.y, location[1],
        x.z, y.z, z.z, location[2],
        0.0, 0.0, 0.0, 1.0,
    );
    Ok(matrix)
}

/// Parse `DIRECTION(name, ratios)` into a unit vector
pub fn direction(decoder: &mut EntityDecoder, id: u32) -> Result<Vector3<f64>> {
    let entity = decoder.decode_by_id(id)?;
    let [x, y, z] = entity
        .get(1)
        .and_then(|v| v.as_point3())
        .ok_or_else(|| Error::parse(0, format!("#{} is not a direction", id)))?;
    let v = Vector3::new(x, y, z);
    if v.norm() < 1e-12 {
        return Err(Error::parse(0, format!("#{} is a zero direction", id)));
    }
    Ok(v.normalize())
}
