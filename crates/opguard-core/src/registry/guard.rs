//! RAII guard that stops a tracked operation when dropped, and a progress
//! handle bound to one incarnation of an id.

use super::state::OperationRegistry;

/// Stops the operation it was created for when dropped. A guard only stops
/// its own incarnation: if the id timed out and was started again by someone
/// else, dropping the guard leaves the newer operation alone.
#[must_use = "the operation is stopped as soon as the guard is dropped"]
pub struct LoadingGuard {
    registry: OperationRegistry,
    id: String,
    generation: u64,
}

impl LoadingGuard {
    pub(super) fn new(registry: OperationRegistry, id: String, generation: u64) -> Self {
        Self {
            registry,
            id,
            generation,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn progress(&self) -> ProgressHandle {
        ProgressHandle {
            registry: self.registry.clone(),
            id: self.id.clone(),
            generation: self.generation,
        }
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.registry.stop_inner(&self.id, Some(self.generation));
    }
}

/// Reports progress for one operation. Updates after the operation ended
/// are ignored.
#[derive(Clone)]
pub struct ProgressHandle {
    registry: OperationRegistry,
    id: String,
    generation: u64,
}

impl ProgressHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Set percent complete (clamped to [0, 100]).
    pub fn set(&self, percent: f64) {
        self.registry
            .update_progress_inner(&self.id, Some(self.generation), percent);
    }

    /// Set progress from a `done / total` pair.
    pub fn set_fraction(&self, done: u64, total: u64) {
        if total == 0 {
            self.set(100.0);
        } else {
            self.set(done as f64 * 100.0 / total as f64);
        }
    }
}
