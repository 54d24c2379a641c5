//! Scene collaborator seam and the part-entity registry.
//!
//! The engine never talks to a renderer directly.  It depends on the four
//! operations of [`SceneBackend`] and keeps its own [`EntityRegistry`] mirror
//! of the named part hierarchy.  [`SimScene`] is an in-memory backend used by
//! tests and the demo twin.

pub mod backend;
pub mod registry;
pub mod sim;

pub use backend::{EntityInfo, PoseUpdate, SceneBackend};
pub use registry::{EntityRegistry, PartEntity, PartFilter, RegistryEntry};
pub use sim::SimScene;
