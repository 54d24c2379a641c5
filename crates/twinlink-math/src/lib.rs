//! Transform math for the twin hierarchy.
//!
//! Pure conversions between a local transform (position, orientation as a
//! unit quaternion, optional scale) and its 4×4 local-to-world matrix, plus
//! the Euler-angle conversions used at the system's edges.
//!
//! # Euler convention
//!
//! One convention is used everywhere: **intrinsic Y-Z-X, degrees**.  Angles
//! cross every external surface (wire frames, config, operator UI) in
//! degrees; radians exist only inside the glam calls in this crate.  Call
//! sites never re-derive the order.
//!
//! # Example
//!
//! ```rust
//! use glam::DVec3;
//! use twinlink_math::{Pose, euler_deg_to_quat};
//!
//! let pose = Pose::new(DVec3::new(1.0, 0.0, 0.0), euler_deg_to_quat(0.0, 90.0, 0.0));
//! let back = Pose::from_matrix(&pose.to_matrix());
//! assert!((back.position - pose.position).length() < twinlink_math::EPSILON);
//! ```

use glam::{DMat4, DQuat, DVec3, EulerRot};

/// Floating-point tolerance for transform comparisons.
pub const EPSILON: f64 = 1e-6;

/// A local transform relative to the parent entity.
///
/// `scale` is optional: `None` means unit scale, and partial writes through
/// the scene collaborator never touch it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: DVec3,
    pub orientation: DQuat,
    pub scale: Option<DVec3>,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: DVec3::ZERO,
        orientation: DQuat::IDENTITY,
        scale: None,
    };

    pub fn new(position: DVec3, orientation: DQuat) -> Self {
        Self {
            position,
            orientation,
            scale: None,
        }
    }

    /// Builder-style scale override.
    pub fn with_scale(mut self, scale: DVec3) -> Self {
        self.scale = Some(scale);
        self
    }

    /// The effective scale, defaulting to unit.
    pub fn scale_or_one(&self) -> DVec3 {
        self.scale.unwrap_or(DVec3::ONE)
    }

    /// Build the local-to-parent matrix (translation × rotation × scale).
    pub fn to_matrix(&self) -> DMat4 {
        compose_local(self.position, self.orientation, self.scale)
    }

    /// Extract a pose from a matrix.  See [`decompose`].
    pub fn from_matrix(matrix: &DMat4) -> Self {
        decompose(matrix)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Compose a local transform matrix in TRS order.
///
/// The orientation is normalized on the way in so numerical drift from
/// repeated composition cannot accumulate into the matrix.
pub fn compose_local(position: DVec3, orientation: DQuat, scale: Option<DVec3>) -> DMat4 {
    DMat4::from_scale_rotation_translation(
        scale.unwrap_or(DVec3::ONE),
        orientation.normalize(),
        position,
    )
}

/// Decompose a TRS matrix back into a [`Pose`].
///
/// The extracted orientation is re-normalized; `decompose(compose_local(p,
/// q, s))` returns `(p, q, s)` within [`EPSILON`].
pub fn decompose(matrix: &DMat4) -> Pose {
    let (scale, rotation, position) = matrix.to_scale_rotation_translation();
    Pose {
        position,
        orientation: rotation.normalize(),
        scale: Some(scale),
    }
}

/// Convert Euler angles in degrees (intrinsic Y-Z-X) to a unit quaternion.
pub fn euler_deg_to_quat(x: f64, y: f64, z: f64) -> DQuat {
    DQuat::from_euler(
        EulerRot::YZX,
        y.to_radians(),
        z.to_radians(),
        x.to_radians(),
    )
}

/// Inverse of [`euler_deg_to_quat`]: extract intrinsic Y-Z-X angles in
/// degrees, returned as `(x, y, z)` components of a vector.
pub fn quat_to_euler_deg(q: DQuat) -> DVec3 {
    let (y, z, x) = q.normalize().to_euler(EulerRot::YZX);
    DVec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees())
}

/// Whether two unit quaternions represent the same rotation, up to sign.
pub fn same_rotation(a: DQuat, b: DQuat) -> bool {
    a.dot(b).abs() > 1.0 - EPSILON
}
