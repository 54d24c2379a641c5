//! [`SimScene`] – in-memory scene backend.
//!
//! Stands in for the real rendering collaborator in unit tests and in the
//! CLI's demo twin.  Nodes are plain structs behind a mutex; parent links
//! may be rewired freely, including into deliberately corrupt cycles for
//! traversal tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use glam::DVec3;
use twinlink_math::Pose;
use twinlink_types::TwinError;
use uuid::Uuid;

use crate::backend::{EntityInfo, PoseUpdate, SceneBackend};
use crate::registry::PartFilter;

#[derive(Debug, Clone)]
struct SimNode {
    name: String,
    parent: Option<Uuid>,
    pose: Pose,
}

/// In-memory scene: a flat node table with parent links and local poses.
#[derive(Debug, Default)]
pub struct SimScene {
    nodes: Mutex<HashMap<Uuid, SimNode>>,
    fail_queries: AtomicBool,
}

impl SimScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node at the identity pose.
    pub fn add_entity(&self, name: &str, parent: Option<Uuid>) -> Uuid {
        self.add_entity_at(name, parent, Pose::IDENTITY)
    }

    /// Add a node with an explicit local pose.
    pub fn add_entity_at(&self, name: &str, parent: Option<Uuid>, pose: Pose) -> Uuid {
        let id = Uuid::new_v4();
        self.nodes.lock().unwrap().insert(
            id,
            SimNode {
                name: name.to_string(),
                parent,
                pose,
            },
        );
        id
    }

    /// Rewire a node's parent link.  No validation: tests use this to build
    /// corrupt cyclic graphs on purpose.
    pub fn set_parent(&self, id: Uuid, parent: Option<Uuid>) {
        if let Some(node) = self.nodes.lock().unwrap().get_mut(&id) {
            node.parent = parent;
        }
    }

    /// Current local pose of a node, for assertions.
    pub fn pose_of(&self, id: Uuid) -> Option<Pose> {
        self.nodes.lock().unwrap().get(&id).map(|n| n.pose)
    }

    /// Make every query fail with [`TwinError::Scene`] until reset.
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// A straight chain `part_1 → part_2 → … → part_n`, each link offset
    /// `spacing` along local +Y.  Returns the scene and the ids in order.
    pub fn demo_chain(parts: usize, spacing: f64) -> (Self, Vec<Uuid>) {
        let scene = Self::new();
        let mut ids = Vec::with_capacity(parts);
        let mut parent = None;
        for i in 1..=parts {
            let pose = if parent.is_some() {
                Pose::new(DVec3::new(0.0, spacing, 0.0), glam::DQuat::IDENTITY)
            } else {
                Pose::IDENTITY
            };
            let id = scene.add_entity_at(&format!("part_{i}"), parent, pose);
            ids.push(id);
            parent = Some(id);
        }
        (scene, ids)
    }

    fn check_available(&self) -> Result<(), TwinError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(TwinError::Scene("simulated scene query failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SceneBackend for SimScene {
    async fn find_entities(&self, _filter: &PartFilter) -> Result<Vec<EntityInfo>, TwinError> {
        self.check_available()?;
        let nodes = self.nodes.lock().unwrap();
        let mut found: Vec<EntityInfo> = nodes
            .iter()
            .map(|(id, node)| EntityInfo {
                id: *id,
                name: node.name.clone(),
            })
            .collect();
        // Deterministic enumeration order; the registry re-sorts by suffix.
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn parent_of(&self, id: Uuid) -> Result<Option<Uuid>, TwinError> {
        self.check_available()?;
        self.nodes
            .lock()
            .unwrap()
            .get(&id)
            .map(|n| n.parent)
            .ok_or_else(|| TwinError::Scene(format!("unknown entity {id}")))
    }

    async fn local_transform(&self, id: Uuid) -> Result<Pose, TwinError> {
        self.check_available()?;
        self.nodes
            .lock()
            .unwrap()
            .get(&id)
            .map(|n| n.pose)
            .ok_or_else(|| TwinError::Scene(format!("unknown entity {id}")))
    }

    async fn set_local_transform(&self, id: Uuid, update: &PoseUpdate) -> Result<(), TwinError> {
        self.check_available()?;
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .get_mut(&id)
            .ok_or_else(|| TwinError::Scene(format!("unknown entity {id}")))?;
        update.apply_to(&mut node.pose);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn partial_write_through_backend() {
        let scene = SimScene::new();
        let id = scene.add_entity_at(
            "part_1",
            None,
            Pose::new(DVec3::ZERO, glam::DQuat::IDENTITY).with_scale(DVec3::splat(3.0)),
        );

        scene
            .set_local_transform(
                id,
                &PoseUpdate {
                    position: Some(DVec3::new(1.0, 2.0, 3.0)),
                    orientation: None,
                },
            )
            .await
            .unwrap();

        let pose = scene.pose_of(id).unwrap();
        assert_eq!(pose.position, DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(pose.scale, Some(DVec3::splat(3.0)));
    }

    #[tokio::test]
    async fn demo_chain_links_parents() {
        let (scene, ids) = SimScene::demo_chain(3, 0.5);
        assert_eq!(ids.len(), 3);
        assert_eq!(scene.parent_of(ids[0]).await.unwrap(), None);
        assert_eq!(scene.parent_of(ids[2]).await.unwrap(), Some(ids[1]));
    }
}
