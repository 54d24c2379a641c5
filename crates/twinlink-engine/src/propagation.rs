//! Rigid sub-tree propagation.
//!
//! Applies one [`Delta`] to a named root entity so the root and every
//! descendant move together.  The two semantics:
//!
//! * [`DeltaMode::AdditiveLocal`] – compose the delta onto the root's local
//!   transform.  Descendant locals are untouched; their worlds follow
//!   because a world transform is a function of the parent chain, so only
//!   the cached worlds are invalidated.
//!
//! * [`DeltaMode::WorldFrame`] – a rigid world-space move.  Every
//!   descendant's world pose is snapshotted *before* anything mutates, the
//!   world delta is applied to each snapshot, and each new local is
//!   re-derived as `inverse(new_parent_world) * new_world`, parents before
//!   children.  Re-deriving from snapshots rather than from locals is what
//!   keeps the sub-tree undistorted when the parent has already moved.
//!
//! Malformed deltas are rejected up front; partial application cannot occur.

use std::collections::HashMap;

use glam::{DMat4, DQuat, DVec3};
use tracing::debug;
use twinlink_math::{Pose, decompose};
use twinlink_scene::{EntityRegistry, PoseUpdate, SceneBackend};
use twinlink_types::TwinError;
use uuid::Uuid;

use crate::delta::{Delta, DeltaMode};

/// Apply `delta` to `root_name` and its descendants.
///
/// Returns the number of entities whose transform chain was touched (the
/// root plus its descendant set).
///
/// # Errors
///
/// [`TwinError::InvalidDelta`] for non-finite input (checked before any
/// mutation), [`TwinError::EntityNotFound`] for an unknown root,
/// [`TwinError::Scene`] if a collaborator write fails.
pub async fn propagate(
    registry: &mut EntityRegistry,
    backend: &dyn SceneBackend,
    root_name: &str,
    delta: &Delta,
    mode: DeltaMode,
) -> Result<usize, TwinError> {
    delta.validate()?;

    let root_id = registry
        .id_of(root_name)
        .ok_or_else(|| TwinError::EntityNotFound(root_name.to_string()))?;

    let touched = match mode {
        DeltaMode::AdditiveLocal => apply_additive(registry, backend, root_id, delta).await?,
        DeltaMode::WorldFrame => apply_world_frame(registry, backend, root_id, delta).await?,
    };

    debug!(root = %root_name, ?mode, touched, "delta propagated");
    Ok(touched)
}

/// Compose the delta onto the root's local transform.
///
/// Translation adds onto the local position, rotation pre-multiplies the
/// local orientation (the controller stream convention); the result is
/// re-normalized so drift never accumulates.
async fn apply_additive(
    registry: &mut EntityRegistry,
    backend: &dyn SceneBackend,
    root_id: Uuid,
    delta: &Delta,
) -> Result<usize, TwinError> {
    let root = registry
        .get_by_id(root_id)
        .ok_or_else(|| TwinError::EntityNotFound(root_id.to_string()))?;

    let mut local = root.local;
    if let Some(t) = delta.translation {
        local.position += t;
    }
    if let Some(q) = delta.rotation_quat() {
        local.orientation = (q * local.orientation).normalize();
    }

    let descendants = registry.descendant_ids(root_id).len();

    // Registry mirror first (this also invalidates cached descendant
    // worlds), then the collaborator write.
    registry.set_local(root_id, local);
    let update = PoseUpdate {
        position: delta.translation.map(|_| local.position),
        orientation: delta.rotation.map(|_| local.orientation),
    };
    backend.set_local_transform(root_id, &update).await?;

    Ok(1 + descendants)
}

/// Rigid world-space move of the root's sub-tree.
async fn apply_world_frame(
    registry: &mut EntityRegistry,
    backend: &dyn SceneBackend,
    root_id: Uuid,
    delta: &Delta,
) -> Result<usize, TwinError> {
    let descendants = registry.descendant_ids(root_id);

    // Step 1: snapshot world poses before mutating anything.
    let old_root_world = registry
        .world_transform(root_id)
        .ok_or_else(|| TwinError::EntityNotFound(root_id.to_string()))?;
    let mut old_worlds: HashMap<Uuid, DMat4> = HashMap::with_capacity(descendants.len());
    for did in &descendants {
        if let Some(world) = registry.world_transform(*did) {
            old_worlds.insert(*did, world);
        }
    }

    // The world-space delta rotates about the root's current world position,
    // so the sub-tree pivots on its own root rather than the scene origin.
    let pivot = old_root_world.w_axis.truncate();
    let rotation = delta.rotation_quat().unwrap_or(DQuat::IDENTITY);
    let translation = delta.translation.unwrap_or(DVec3::ZERO);
    let delta_world = DMat4::from_translation(translation + pivot)
        * DMat4::from_quat(rotation)
        * DMat4::from_translation(-pivot);

    // The root's parent is outside the moved set; its world is needed to
    // re-derive the root's local and must be read before any write.
    let root_parent = registry.get_by_id(root_id).and_then(|e| e.parent_id);
    let root_parent_world = match root_parent {
        Some(pid) => registry.world_transform(pid).unwrap_or(DMat4::IDENTITY),
        None => DMat4::IDENTITY,
    };

    // Steps 2–3: new worlds from the snapshots, new locals from the new
    // parent worlds.  `descendants` is breadth-first, so a parent's new
    // world is always computed before its children need it.
    let mut new_worlds: HashMap<Uuid, DMat4> = HashMap::with_capacity(old_worlds.len() + 1);
    let mut writes: Vec<(Uuid, Pose)> = Vec::with_capacity(old_worlds.len() + 1);

    let new_root_world = delta_world * old_root_world;
    new_worlds.insert(root_id, new_root_world);
    writes.push((root_id, reframe(root_parent_world, new_root_world)));

    for did in &descendants {
        let Some(old_world) = old_worlds.get(did).copied() else {
            continue;
        };
        let new_world = delta_world * old_world;

        let parent = registry.get_by_id(*did).and_then(|e| e.parent_id);
        let parent_world = match parent {
            Some(pid) => match new_worlds.get(&pid) {
                Some(w) => *w,
                // Parent outside the moved set (corrupt graph): anchor on
                // its current world.
                None => registry.world_transform(pid).unwrap_or(DMat4::IDENTITY),
            },
            None => DMat4::IDENTITY,
        };

        new_worlds.insert(*did, new_world);
        writes.push((*did, reframe(parent_world, new_world)));
    }

    // Step 4: write back, registry mirror then collaborator.
    for (id, pose) in &writes {
        registry.set_local(*id, *pose);
    }
    for (id, pose) in &writes {
        backend
            .set_local_transform(*id, &PoseUpdate::from_pose(pose))
            .await?;
    }

    Ok(writes.len())
}

fn reframe(parent_world: DMat4, world: DMat4) -> Pose {
    decompose(&(parent_world.inverse() * world))
}
