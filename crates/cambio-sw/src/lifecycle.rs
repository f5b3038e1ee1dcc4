//! Worker lifecycle state and the per-scope registration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::WorkerConfig;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WorkerState {
    /// Created, not yet installing.
    #[default]
    Parsed,
    /// Populating its versioned cache.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Cleaning up stale caches and claiming pages.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// One worker version and its lifecycle position.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: WorkerId,

    /// The version's static configuration.
    pub config: WorkerConfig,

    /// Current state.
    pub state: WorkerState,

    /// Time of the last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new worker in the Parsed state.
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            id: WorkerId::new(),
            config,
            state: WorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }
}

/// The registration for one scope: at most one worker per slot.
#[derive(Debug)]
pub struct Registration {
    /// Scope URL.
    pub scope: Url,

    /// Worker currently installing.
    pub installing: Option<ServiceWorker>,

    /// Worker installed but not yet active.
    pub waiting: Option<ServiceWorker>,

    /// Worker controlling pages.
    pub active: Option<ServiceWorker>,
}

impl Registration {
    /// Create an empty registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Move the installing worker into the waiting slot.
    pub fn install_complete(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(WorkerState::Installed);
            // A previous update that never activated is superseded.
            if let Some(mut stale) = self.waiting.replace(worker) {
                stale.set_state(WorkerState::Redundant);
            }
        }
    }

    /// Discard the installing worker after a failed install.
    pub fn install_failed(&mut self) -> Option<WorkerId> {
        let mut worker = self.installing.take()?;
        worker.set_state(WorkerState::Redundant);
        Some(worker.id)
    }

    /// Move the waiting worker into the active slot in the Activating
    /// state, retiring the previous active worker.
    pub fn begin_activation(&mut self) -> Option<WorkerId> {
        let mut worker = self.waiting.take()?;
        worker.set_state(WorkerState::Activating);
        if let Some(mut old) = self.active.take() {
            old.set_state(WorkerState::Redundant);
        }
        let id = worker.id;
        self.active = Some(worker);
        Some(id)
    }

    /// Mark the activating worker fully activated.
    pub fn finish_activation(&mut self) {
        if let Some(worker) = self.active.as_mut() {
            worker.set_state(WorkerState::Activated);
        }
    }

    /// Look up a worker's state across all three slots.
    pub fn state_of(&self, id: WorkerId) -> Option<WorkerState> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|w| w.id == id)
            .map(|w| w.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> Registration {
        Registration::new(Url::parse("https://converter.example/").unwrap())
    }

    #[test]
    fn test_worker_starts_parsed() {
        let worker = ServiceWorker::new(WorkerConfig::default());
        assert_eq!(worker.state, WorkerState::Parsed);
        assert!(!worker.is_active());
    }

    #[test]
    fn test_install_complete_moves_to_waiting() {
        let mut reg = registration();
        reg.installing = Some(ServiceWorker::new(WorkerConfig::default()));

        reg.install_complete();

        assert!(reg.installing.is_none());
        assert_eq!(reg.waiting.as_ref().unwrap().state, WorkerState::Installed);
    }

    #[test]
    fn test_install_failed_discards_worker() {
        let mut reg = registration();
        let worker = ServiceWorker::new(WorkerConfig::default());
        let id = worker.id;
        reg.installing = Some(worker);

        assert_eq!(reg.install_failed(), Some(id));
        assert!(reg.installing.is_none());
        assert!(reg.waiting.is_none());
    }

    #[test]
    fn test_activation_retires_previous_worker() {
        let mut reg = registration();
        reg.installing = Some(ServiceWorker::new(WorkerConfig::default()));
        reg.install_complete();
        let first = reg.begin_activation().unwrap();
        reg.finish_activation();
        assert_eq!(reg.state_of(first), Some(WorkerState::Activated));

        reg.installing = Some(ServiceWorker::new(WorkerConfig::default()));
        reg.install_complete();
        let second = reg.begin_activation().unwrap();
        reg.finish_activation();

        assert_ne!(first, second);
        assert_eq!(reg.state_of(second), Some(WorkerState::Activated));
        // The retired worker left the registration entirely.
        assert_eq!(reg.state_of(first), None);
    }

    #[test]
    fn test_begin_activation_requires_waiting_worker() {
        let mut reg = registration();
        assert!(reg.begin_activation().is_none());
    }
}
