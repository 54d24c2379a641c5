//! The scene collaborator seam.
//!
//! The rendering/scene system is an external collaborator.  Everything the
//! twin engine needs from it is these four operations; everything else about
//! the renderer is opaque.  Real deployments implement this trait over their
//! scene SDK; tests and the demo twin use [`SimScene`][crate::sim::SimScene].

use async_trait::async_trait;
use glam::{DQuat, DVec3};
use twinlink_math::Pose;
use twinlink_types::TwinError;
use uuid::Uuid;

use crate::registry::PartFilter;

/// Identity of one scene entity carrying a spatial transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInfo {
    pub id: Uuid,
    pub name: String,
}

/// A partial local-transform write.
///
/// The collaborator contract is field-wise: a write carries position and/or
/// orientation and never clobbers components it does not mention (scale in
/// particular stays untouched).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoseUpdate {
    pub position: Option<DVec3>,
    pub orientation: Option<DQuat>,
}

impl PoseUpdate {
    /// A full position + orientation write taken from `pose`.
    pub fn from_pose(pose: &Pose) -> Self {
        Self {
            position: Some(pose.position),
            orientation: Some(pose.orientation),
        }
    }

    /// Apply this update onto an existing pose.
    pub fn apply_to(&self, pose: &mut Pose) {
        if let Some(p) = self.position {
            pose.position = p;
        }
        if let Some(q) = self.orientation {
            pose.orientation = q.normalize();
        }
    }
}

/// The four operations the engine consumes from the scene system.
///
/// Implementations must be cheap to call repeatedly: `refresh` enumerates the
/// scene once per connection, but transform reads/writes happen on every
/// propagated delta.
#[async_trait]
pub trait SceneBackend: Send + Sync {
    /// Enumerate entities carrying a spatial-transform capability.
    ///
    /// The `filter` is advisory: backends that can filter server-side should,
    /// but the registry re-applies the naming convention on its side either
    /// way.
    async fn find_entities(&self, filter: &PartFilter) -> Result<Vec<EntityInfo>, TwinError>;

    /// The owning parent of `id`, or `None` for a scene root.
    async fn parent_of(&self, id: Uuid) -> Result<Option<Uuid>, TwinError>;

    /// Read the current local transform of `id`.
    async fn local_transform(&self, id: Uuid) -> Result<Pose, TwinError>;

    /// Write position and/or orientation of `id`'s local transform.
    async fn set_local_transform(&self, id: Uuid, update: &PoseUpdate) -> Result<(), TwinError>;
}
