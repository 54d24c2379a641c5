//! [`Delta`] – one update instruction addressed to a root entity.

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};
use twinlink_math::euler_deg_to_quat;
use twinlink_types::TwinError;

/// Rotation component of a delta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeltaRotation {
    /// A ready-made rotation quaternion.
    Quat(DQuat),
    /// Intrinsic Y-Z-X angles in degrees, the system-wide convention.
    EulerDeg(DVec3),
}

/// A relative transform change: translation and/or rotation.
///
/// Deltas are validated before any mutation; a delta of zero magnitude is a
/// legal no-op and is applied like any other (idempotent), it is never
/// special-cased away here.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Delta {
    pub translation: Option<DVec3>,
    pub rotation: Option<DeltaRotation>,
}

impl Delta {
    pub fn from_translation(translation: DVec3) -> Self {
        Self {
            translation: Some(translation),
            rotation: None,
        }
    }

    pub fn from_euler_deg(x: f64, y: f64, z: f64) -> Self {
        Self {
            translation: None,
            rotation: Some(DeltaRotation::EulerDeg(DVec3::new(x, y, z))),
        }
    }

    pub fn from_rotation(rotation: DQuat) -> Self {
        Self {
            translation: None,
            rotation: Some(DeltaRotation::Quat(rotation)),
        }
    }

    /// The rotation as a normalized quaternion, if any.
    pub fn rotation_quat(&self) -> Option<DQuat> {
        match self.rotation {
            Some(DeltaRotation::Quat(q)) => Some(q.normalize()),
            Some(DeltaRotation::EulerDeg(e)) => Some(euler_deg_to_quat(e.x, e.y, e.z)),
            None => None,
        }
    }

    /// Reject non-finite components and degenerate rotations.
    ///
    /// Called before any entity is touched so a bad delta can never be
    /// partially applied.
    pub fn validate(&self) -> Result<(), TwinError> {
        if let Some(t) = self.translation {
            if !t.is_finite() {
                return Err(TwinError::InvalidDelta(format!(
                    "non-finite translation {t:?}"
                )));
            }
        }
        match self.rotation {
            Some(DeltaRotation::Quat(q)) => {
                if !q.is_finite() {
                    return Err(TwinError::InvalidDelta(format!("non-finite rotation {q:?}")));
                }
                if q.length() < 1e-12 {
                    return Err(TwinError::InvalidDelta("zero-length quaternion".to_string()));
                }
            }
            Some(DeltaRotation::EulerDeg(e)) => {
                if !e.is_finite() {
                    return Err(TwinError::InvalidDelta(format!(
                        "non-finite euler angles {e:?}"
                    )));
                }
            }
            None => {}
        }
        Ok(())
    }
}

/// Which frame a delta is interpreted in, selectable per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaMode {
    /// Compose onto the root's local transform; descendants follow through
    /// the hierarchy without being touched.
    AdditiveLocal,
    /// A rigid world-space move of the root and its whole sub-tree.
    WorldFrame,
}
