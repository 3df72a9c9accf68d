//! Vector and matrix kernel.
//!
//! Thin layer over `nalgebra` fixed-size types. Everything here is a pure
//! function; inputs are assumed finite.

use nalgebra::{Matrix3, Rotation3, Vector3};

/// 3D vector in lab (or reciprocal) space.
pub type Vec3 = Vector3<f64>;

/// 3x3 matrix.
pub type Mat3 = Matrix3<f64>;

/// Returns `v` rescaled to `length`. A zero vector is returned unchanged.
#[must_use]
pub fn set_length(v: &Vec3, length: f64) -> Vec3 {
    let norm = v.norm();
    if norm > 0.0 {
        v * (length / norm)
    } else {
        *v
    }
}

/// Returns the unit vector along `v`, or `None` for a zero vector.
#[must_use]
pub fn unit(v: &Vec3) -> Option<Vec3> {
    v.try_normalize(0.0)
}

/// Builds an orthonormal basis whose third column is the unit vector along
/// `axis`.
///
/// The first column is the world axis least aligned with `axis`, projected
/// into the plane perpendicular to it; the second completes a right-handed
/// frame. For `axis` along +z this is the identity.
#[must_use]
pub fn orthonormal_basis(axis: &Vec3) -> Mat3 {
    let Some(z) = unit(axis) else {
        return Mat3::identity();
    };

    let abs = z.abs();
    let helper = if abs.x <= abs.y && abs.x <= abs.z {
        Vec3::x()
    } else if abs.y <= abs.z {
        Vec3::y()
    } else {
        Vec3::z()
    };

    let x = (helper - z * z.dot(&helper)).normalize();
    let y = z.cross(&x);
    Mat3::from_columns(&[x, y, z])
}

/// Rotation by `a` about x, then `b` about y, then `c` about z
/// (`Rz(c) * Ry(b) * Rx(a)`).
///
/// All-zero angles give the exact identity.
#[must_use]
pub fn rotation_from_angles(a: f64, b: f64, c: f64) -> Mat3 {
    Rotation3::from_euler_angles(a, b, c).into_inner()
}

/// Expresses `rotation`, defined in the frame `basis`, in the lab frame:
/// `basis * rotation * basisᵀ`.
#[must_use]
pub fn rotation_in_basis(basis: &Mat3, rotation: &Mat3) -> Mat3 {
    basis * rotation * basis.transpose()
}
