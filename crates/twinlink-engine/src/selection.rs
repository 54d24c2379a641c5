//! [`SelectionState`] – the currently targeted entity for manual edits.
//!
//! One optional selection, shared between the operator UI (local origin) and
//! the update channel (remote origin).  Last writer wins; observers are an
//! explicit list delivered synchronously in registration order, so tests and
//! callers see deterministic notification behaviour.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where a selection change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionOrigin {
    /// The operator UI.
    Local,
    /// A `select` frame on the update channel.
    Remote,
}

/// Callback invoked on every selection change with the new value.
pub type SelectionObserver = Box<dyn Fn(Option<&str>, SelectionOrigin) + Send>;

#[derive(Default)]
pub struct SelectionState {
    current: Option<String>,
    observers: Vec<SelectionObserver>,
}

impl fmt::Debug for SelectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionState")
            .field("current", &self.current)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active selection, if any.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Set the active selection.  Re-selecting the current entity is a
    /// no-op and does not notify.
    pub fn select(&mut self, name: impl Into<String>, origin: SelectionOrigin) {
        let name = name.into();
        if self.current.as_deref() == Some(name.as_str()) {
            return;
        }
        debug!(entity = %name, ?origin, "selection changed");
        self.current = Some(name);
        self.notify(origin);
    }

    /// Drop the active selection.
    pub fn clear(&mut self, origin: SelectionOrigin) {
        if self.current.take().is_some() {
            debug!(?origin, "selection cleared");
            self.notify(origin);
        }
    }

    /// Register an observer; called synchronously on every change, in
    /// registration order.
    pub fn on_change(&mut self, observer: SelectionObserver) {
        self.observers.push(observer);
    }

    fn notify(&self, origin: SelectionOrigin) {
        for observer in &self.observers {
            observer(self.current.as_deref(), origin);
        }
    }
}
