//! [`TwinSession`] – one scene connection's worth of mutable state.
//!
//! The registry and the selection are the only mutable shared structures in
//! the system.  Both live here, owned by a single session scope that is
//! handed to the update channel and the operator UI by injection – there is
//! no ambient global, so independent sessions can coexist in one process
//! (and in tests).
//!
//! All mutation happens under the session lock, one delta at a time, which
//! is what makes the multi-step world-frame algorithm safe without any
//! finer-grained locking.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use twinlink_scene::{EntityRegistry, PartFilter, RegistryEntry, SceneBackend, registry};
use twinlink_types::TwinError;

use crate::delta::{Delta, DeltaMode};
use crate::propagation;
use crate::selection::{SelectionObserver, SelectionOrigin, SelectionState};

/// Session handle shared between the channel, the UI and the host.
pub type SharedSession = Arc<Mutex<TwinSession>>;

pub struct TwinSession {
    backend: Arc<dyn SceneBackend>,
    registry: EntityRegistry,
    selection: SelectionState,
    /// Bumped on [`invalidate`][Self::invalidate]; in-flight refresh results
    /// from an older epoch are discarded instead of installed.
    epoch: u64,
}

impl TwinSession {
    pub fn new(backend: Arc<dyn SceneBackend>, filter: PartFilter) -> Self {
        Self {
            backend,
            registry: EntityRegistry::new(filter),
            selection: SelectionState::new(),
            epoch: 0,
        }
    }

    /// Convenience constructor for the usual shared form.
    pub fn shared(backend: Arc<dyn SceneBackend>, filter: PartFilter) -> SharedSession {
        Arc::new(Mutex::new(Self::new(backend, filter)))
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Whether the registry holds at least one part.
    pub fn is_ready(&self) -> bool {
        self.registry.is_ready()
    }

    /// Flat registry listing for the operator UI.
    pub fn registry_snapshot(&self) -> Vec<RegistryEntry> {
        self.registry.snapshot()
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.current()
    }

    pub fn select(&mut self, name: impl Into<String>, origin: SelectionOrigin) {
        self.selection.select(name, origin);
    }

    pub fn clear_selection(&mut self, origin: SelectionOrigin) {
        self.selection.clear(origin);
    }

    pub fn on_selection_changed(&mut self, observer: SelectionObserver) {
        self.selection.on_change(observer);
    }

    /// Apply one delta through the propagation engine.
    ///
    /// This is the single entry point for every transform mutation – remote
    /// updates and manual UI edits alike.
    ///
    /// # Errors
    ///
    /// [`TwinError::RegistryUnavailable`] before the first successful
    /// refresh, plus everything [`propagation::propagate`] reports.
    pub async fn propagate_delta(
        &mut self,
        root_name: &str,
        delta: &Delta,
        mode: DeltaMode,
    ) -> Result<usize, TwinError> {
        if !self.registry.is_ready() {
            return Err(TwinError::RegistryUnavailable);
        }
        let backend = Arc::clone(&self.backend);
        propagation::propagate(&mut self.registry, backend.as_ref(), root_name, delta, mode).await
    }

    /// Refresh the registry in place (lock held across the scene queries).
    ///
    /// Prefer [`refresh_shared`] from async callers that share the session.
    pub async fn refresh_registry(&mut self) {
        let backend = Arc::clone(&self.backend);
        self.registry.refresh(backend.as_ref()).await;
    }

    /// Tear the session state down on disconnect/rescene: the registry is
    /// dropped wholesale and any refresh still in flight becomes stale.
    pub fn invalidate(&mut self) {
        self.epoch += 1;
        self.registry.clear();
        info!(epoch = self.epoch, "session invalidated; registry dropped");
    }
}

/// Refresh a shared session's registry without holding the session lock
/// across the scene collaborator queries.
///
/// The epoch read before querying is compared again before installing: a
/// session invalidated in the meantime (connection closed, rescene) discards
/// the stale result rather than resurrecting dead entities.
pub async fn refresh_shared(session: &SharedSession) {
    let (backend, filter, epoch) = {
        let s = session.lock().await;
        (Arc::clone(&s.backend), s.registry.filter().clone(), s.epoch)
    };

    let parts = match registry::collect(backend.as_ref(), &filter).await {
        Ok(parts) => parts,
        Err(e) => {
            warn!(error = %e, "registry refresh failed; keeping previous registry");
            return;
        }
    };

    let mut s = session.lock().await;
    if s.epoch != epoch {
        debug!("discarding stale registry refresh result");
        return;
    }
    s.registry.install(parts);
}
