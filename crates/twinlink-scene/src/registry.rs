//! [`EntityRegistry`] – the session-scoped mirror of the part hierarchy.
//!
//! The registry is rebuilt once per scene connection: it enumerates the
//! scene collaborator's transform-carrying entities, keeps the ones matching
//! the part naming convention sorted by numeric suffix, and resolves each
//! part's parent to an id inside the set (a parent outside the set makes the
//! entity a root of the twin hierarchy).
//!
//! Entities live in an id-addressed arena with the parent stored as an id,
//! never as a reference, so a corrupt parent graph can at worst cost a warn
//! log – traversals treat a re-visited id as terminal.
//!
//! The registry is the single owner of parent links.  Transform math only
//! ever reads/writes the local and cached world transform fields.

use std::collections::{HashMap, HashSet, VecDeque};

use glam::DMat4;
use tracing::{debug, warn};
use twinlink_math::Pose;
use twinlink_types::TwinError;
use uuid::Uuid;

use crate::backend::SceneBackend;

// ---------------------------------------------------------------------------
// PartFilter
// ---------------------------------------------------------------------------

/// Naming convention for robot parts: `<prefix><digits>`, e.g. `part_7`.
///
/// The prefix is configuration, not a hard-coded pattern; the numeric suffix
/// doubles as the sort key for deterministic enumeration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartFilter {
    prefix: String,
}

impl PartFilter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Extract the numeric suffix of a matching name (`part_7` → `7`).
    ///
    /// Returns `None` for names outside the convention, including empty or
    /// non-digit suffixes.
    pub fn suffix(&self, name: &str) -> Option<u32> {
        let rest = name.strip_prefix(&self.prefix)?;
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        rest.parse().ok()
    }
}

impl Default for PartFilter {
    fn default() -> Self {
        Self::new("part_")
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// One named node of the twin hierarchy.
#[derive(Debug, Clone)]
pub struct PartEntity {
    pub id: Uuid,
    pub name: String,
    /// Numeric suffix extracted by the [`PartFilter`].
    pub index: u32,
    /// Owning parent inside the registry, or `None` for a hierarchy root.
    pub parent_id: Option<Uuid>,
    /// Local transform relative to the parent.
    pub local: Pose,
    /// Cached local-to-world matrix; `None` when stale.
    world: Option<DMat4>,
}

impl PartEntity {
    pub fn new(id: Uuid, name: String, index: u32, parent_id: Option<Uuid>, local: Pose) -> Self {
        Self {
            id,
            name,
            index,
            parent_id,
            local,
            world: None,
        }
    }
}

/// Flat registry listing handed to the operator UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub id: Uuid,
    pub name: String,
    pub index: u32,
    pub parent_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// EntityRegistry
// ---------------------------------------------------------------------------

/// Arena of discovered parts with name lookup, descendant traversal and
/// cached world transforms.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    filter: PartFilter,
    entities: HashMap<Uuid, PartEntity>,
    by_name: HashMap<String, Uuid>,
    children: HashMap<Uuid, Vec<Uuid>>,
    /// All ids, ascending by part index.
    order: Vec<Uuid>,
}

impl EntityRegistry {
    pub fn new(filter: PartFilter) -> Self {
        Self {
            filter,
            entities: HashMap::new(),
            by_name: HashMap::new(),
            children: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn filter(&self) -> &PartFilter {
        &self.filter
    }

    /// Re-enumerate the scene and rebuild the registry.
    ///
    /// A backend error leaves the previous registry untouched: the condition
    /// is logged and the caller keeps running.  A half-built registry is
    /// never observable – the rebuilt maps are swapped in atomically by
    /// [`install`][Self::install].
    pub async fn refresh(&mut self, backend: &dyn SceneBackend) {
        let collected = collect(backend, &self.filter).await;
        match collected {
            Ok(parts) => self.install(parts),
            Err(e) => {
                warn!(error = %e, "registry refresh failed; keeping previous registry");
            }
        }
    }

    /// Install a collected part set, replacing the current registry wholesale.
    pub fn install(&mut self, parts: Vec<PartEntity>) {
        let ids: HashSet<Uuid> = parts.iter().map(|p| p.id).collect();

        let mut entities: HashMap<Uuid, PartEntity> = HashMap::with_capacity(parts.len());
        let mut by_name: HashMap<String, Uuid> = HashMap::with_capacity(parts.len());
        let mut order: Vec<Uuid> = Vec::with_capacity(parts.len());

        for mut part in parts {
            if let Some(pid) = part.parent_id {
                if !ids.contains(&pid) {
                    part.parent_id = None;
                }
            }
            if by_name.contains_key(&part.name) {
                warn!(name = %part.name, "duplicate part name; keeping the first occurrence");
                continue;
            }
            part.world = None;
            by_name.insert(part.name.clone(), part.id);
            order.push(part.id);
            entities.insert(part.id, part);
        }

        order.sort_by_key(|id| entities[id].index);

        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for id in &order {
            if let Some(pid) = entities[id].parent_id {
                children.entry(pid).or_default().push(*id);
            }
        }
        // order is index-sorted, so each child list already is.

        self.entities = entities;
        self.by_name = by_name;
        self.children = children;
        self.order = order;
        debug!(parts = self.order.len(), "registry installed");
    }

    /// Drop every entity; used on disconnect/rescene.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.by_name.clear();
        self.children.clear();
        self.order.clear();
    }

    /// Whether at least one part has been discovered.
    pub fn is_ready(&self) -> bool {
        !self.entities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PartEntity> {
        self.by_name.get(name).and_then(|id| self.entities.get(id))
    }

    pub fn get_by_id(&self, id: Uuid) -> Option<&PartEntity> {
        self.entities.get(&id)
    }

    pub fn id_of(&self, name: &str) -> Option<Uuid> {
        self.by_name.get(name).copied()
    }

    /// Parts in ascending index order.
    pub fn parts(&self) -> impl Iterator<Item = &PartEntity> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    /// Flat listing for the operator UI.
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.parts()
            .map(|p| RegistryEntry {
                id: p.id,
                name: p.name.clone(),
                index: p.index,
                parent_id: p.parent_id,
            })
            .collect()
    }

    /// Every entity whose parent chain reaches `name`, breadth-first with
    /// siblings in index order.  Unknown names yield an empty list.
    pub fn descendants_of(&self, name: &str) -> Vec<Uuid> {
        self.id_of(name)
            .map(|id| self.descendant_ids(id))
            .unwrap_or_default()
    }

    /// Breadth-first descendant set of `root`, excluding `root` itself.
    ///
    /// A re-visited id (corrupt parent graph) terminates that branch with a
    /// warning instead of looping.
    pub fn descendant_ids(&self, root: Uuid) -> Vec<Uuid> {
        let mut result = Vec::new();
        let mut visited: HashSet<Uuid> = HashSet::from([root]);
        let mut queue: VecDeque<Uuid> = VecDeque::from([root]);

        while let Some(current) = queue.pop_front() {
            let Some(kids) = self.children.get(&current) else {
                continue;
            };
            for child in kids {
                if !visited.insert(*child) {
                    warn!(entity = %child, "parent cycle detected; stopping traversal at re-visited entity");
                    continue;
                }
                result.push(*child);
                queue.push_back(*child);
            }
        }
        result
    }

    /// The local-to-world matrix of `id`, composed up the parent chain and
    /// memoized.
    ///
    /// A parent cycle is treated as a root at the point of re-visit (warned,
    /// never looped).  Returns `None` for unknown ids.
    pub fn world_transform(&mut self, id: Uuid) -> Option<DMat4> {
        self.entities.get(&id)?;

        // Climb until a cached ancestor or a root, recording who needs
        // recomputation (query entity first).
        let mut chain: Vec<Uuid> = Vec::new();
        let mut base = DMat4::IDENTITY;
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut cursor = Some(id);

        while let Some(cid) = cursor {
            if !visited.insert(cid) {
                warn!(entity = %cid, "parent cycle detected while composing world transform; treating as root");
                break;
            }
            let Some(entity) = self.entities.get(&cid) else {
                break;
            };
            if let Some(world) = entity.world {
                base = world;
                break;
            }
            chain.push(cid);
            cursor = entity.parent_id;
        }

        if chain.is_empty() {
            // The query entity itself was cached.
            return Some(base);
        }

        for cid in chain.into_iter().rev() {
            let local = self.entities.get(&cid)?.local.to_matrix();
            base *= local;
            if let Some(entity) = self.entities.get_mut(&cid) {
                entity.world = Some(base);
            }
        }
        Some(base)
    }

    /// Overwrite the local transform of `id` and invalidate the cached world
    /// transforms of the entity and its whole descendant set.
    pub fn set_local(&mut self, id: Uuid, pose: Pose) {
        if !self.entities.contains_key(&id) {
            warn!(entity = %id, "set_local on unknown entity ignored");
            return;
        }
        let descendants = self.descendant_ids(id);
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.local = pose;
            entity.world = None;
        }
        for did in descendants {
            if let Some(entity) = self.entities.get_mut(&did) {
                entity.world = None;
            }
        }
    }
}

/// Enumerate, filter and sort the scene's parts without touching any
/// registry.
///
/// Split out from [`EntityRegistry::refresh`] so a caller can run the slow
/// collaborator queries outside its session lock and discard the result if
/// the session epoch moved on meanwhile.
pub async fn collect(
    backend: &dyn SceneBackend,
    filter: &PartFilter,
) -> Result<Vec<PartEntity>, TwinError> {
    let found = backend.find_entities(filter).await?;

    let mut matched: Vec<(crate::backend::EntityInfo, u32)> = found
        .into_iter()
        .filter_map(|e| filter.suffix(&e.name).map(|idx| (e, idx)))
        .collect();
    matched.sort_by_key(|(_, idx)| *idx);

    let ids: HashSet<Uuid> = matched.iter().map(|(e, _)| e.id).collect();

    let mut parts = Vec::with_capacity(matched.len());
    for (info, index) in matched {
        let parent_id = backend
            .parent_of(info.id)
            .await?
            .filter(|pid| ids.contains(pid));
        let local = backend.local_transform(info.id).await?;
        parts.push(PartEntity::new(info.id, info.name, index, parent_id, local));
    }
    Ok(parts)
}
