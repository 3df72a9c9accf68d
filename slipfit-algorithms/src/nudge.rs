//! The nudge transform.
//!
//! Re-derives a panel's geometry from its committed backup, a parameter
//! vector and the centroid of the group the parameters belong to:
//!
//! 1. tilt the corner about the centroid by `alpha`/`beta`, expressed in a
//!    basis whose z axis points along the centroid direction;
//! 2. rotate the tilted corner in the lab frame by `horiz`/`vert`/`gamma`;
//! 3. push it radially by `radius` along the centroid direction.
//!
//! Scan axes get the same two rotations and no displacement.

use slipfit_core::geometry::{orthonormal_basis, rotation_from_angles, rotation_in_basis, unit};
use slipfit_core::{PanelGeometry, Vec3};

use crate::params::ParameterVector;

/// Returns `backup` transformed by `params` about `centroid` (metres).
///
/// A zero parameter vector returns the backup unchanged.
#[must_use]
pub fn nudge_geometry(
    backup: &PanelGeometry,
    params: &ParameterVector,
    centroid: &Vec3,
) -> PanelGeometry {
    if params.is_zero() {
        return backup.clone();
    }

    let direction = unit(centroid).unwrap_or_else(Vec3::z);
    let basis = orthonormal_basis(&direction);
    let intra = rotation_in_basis(&basis, &rotation_from_angles(params.alpha, params.beta, 0.0));
    let slide = rotation_from_angles(params.horiz, params.vert, params.gamma);

    let length = centroid.norm() + params.radius;
    let displacement = direction * length - centroid;

    let corner = backup.corner_metres();
    let tilted = centroid + intra * (corner - centroid);
    let moved = slide * tilted + displacement;

    let axes = slide * intra;
    let mut nudged = backup.clone();
    nudged.set_corner_metres(&moved);
    nudged.fs = axes * backup.fs;
    nudged.ss = axes * backup.ss;
    nudged
}
