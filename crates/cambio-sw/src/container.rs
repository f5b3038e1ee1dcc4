//! The service-worker container for one scope.
//!
//! Owns the registration, the cache storage, the set of open pages, and
//! the event stream the page controller listens on. Drives the whole
//! lifecycle: install (all-or-nothing cache population), activation
//! (stale-cache cleanup, then claiming), messaging, and fetch dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use cambio_net::{Request, ResourceLoader};

use crate::cache::{CacheEntry, CacheStorage};
use crate::lifecycle::{Registration, ServiceWorker, WorkerId, WorkerState};
use crate::message::ControlMessage;
use crate::router::{FetchResponse, FetchRouter};
use crate::{SwError, WorkerConfig};

/// Unique identifier for an open page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// An open page under this scope.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: ClientId,

    /// Page URL.
    pub url: Url,

    /// Worker controlling this page, if any.
    pub controller: Option<WorkerId>,
}

/// Lifecycle events delivered to the page controller.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A worker changed state.
    StateChange {
        worker_id: WorkerId,
        state: WorkerState,
    },
    /// A new version finished installing while another worker is active.
    UpdateReady { worker_id: WorkerId },
    /// The worker controlling a page changed.
    ControllerChange { client_id: ClientId },
}

/// The container coordinating one scope's worker, caches, and pages.
pub struct ServiceWorkerContainer {
    scope: Url,
    registration: RwLock<Registration>,
    /// Cache storage shared with spawned revalidation tasks.
    pub caches: Arc<RwLock<CacheStorage>>,
    clients: RwLock<HashMap<ClientId, Client>>,
    loader: Arc<ResourceLoader>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a container for a scope, returning the event stream the
    /// page controller should consume.
    pub fn new(
        scope: Url,
        loader: Arc<ResourceLoader>,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registration: RwLock::new(Registration::new(scope.clone())),
                scope,
                caches: Arc::new(RwLock::new(CacheStorage::new())),
                clients: RwLock::new(HashMap::new()),
                loader,
                event_tx,
            },
            event_rx,
        )
    }

    /// The scope URL.
    pub fn scope(&self) -> &Url {
        &self.scope
    }

    /// Register an open page with this scope.
    pub async fn add_client(&self, url: Url) -> ClientId {
        let client = Client {
            id: ClientId::new(),
            url,
            controller: None,
        };
        let id = client.id;
        self.clients.write().await.insert(id, client);
        id
    }

    /// The worker controlling a page, if any.
    pub async fn controller_of(&self, client_id: ClientId) -> Option<WorkerId> {
        self.clients
            .read()
            .await
            .get(&client_id)
            .and_then(|c| c.controller)
    }

    /// The worker installed and waiting for activation, if any.
    pub async fn waiting_worker(&self) -> Option<WorkerId> {
        self.registration.read().await.waiting.as_ref().map(|w| w.id)
    }

    /// The active worker, if any.
    pub async fn active_worker(&self) -> Option<WorkerId> {
        self.registration.read().await.active.as_ref().map(|w| w.id)
    }

    /// A worker's current state, searched across all registration slots.
    pub async fn worker_state(&self, id: WorkerId) -> Option<WorkerState> {
        self.registration.read().await.state_of(id)
    }

    /// Register a new worker version: install it, then either activate it
    /// immediately (first install) or park it as a pending update.
    pub async fn register(&self, config: WorkerConfig) -> Result<WorkerId, SwError> {
        let mut worker = ServiceWorker::new(config.clone());
        worker.set_state(WorkerState::Installing);
        let id = worker.id;
        {
            let mut reg = self.registration.write().await;
            // A predecessor still mid-install is superseded outright.
            if let Some(stale) = reg.install_failed() {
                debug!(worker = ?stale, "superseding unfinished install");
            }
            reg.installing = Some(worker);
        }
        self.emit(WorkerEvent::StateChange {
            worker_id: id,
            state: WorkerState::Installing,
        });
        info!(version = %config.cache_version, "installing worker");

        match self.run_install(&config).await {
            Ok(entries) => {
                let mut caches = self.caches.write().await;
                let cache = caches.open(&config.cache_version);
                for (key, entry) in entries {
                    cache.put(&key, entry);
                }
            }
            Err(err) => {
                self.registration.write().await.install_failed();
                self.emit(WorkerEvent::StateChange {
                    worker_id: id,
                    state: WorkerState::Redundant,
                });
                warn!(version = %config.cache_version, error = %err, "worker install failed");
                return Err(err);
            }
        }

        self.registration.write().await.install_complete();
        self.emit(WorkerEvent::StateChange {
            worker_id: id,
            state: WorkerState::Installed,
        });

        let has_active = self.registration.read().await.active.is_some();
        if has_active {
            info!(version = %config.cache_version, "new worker waiting; update ready");
            self.emit(WorkerEvent::UpdateReady { worker_id: id });
        } else {
            self.activate_waiting().await?;
        }

        Ok(id)
    }

    /// Handle a message posted by a page. Unrecognized messages are
    /// dropped silently; a skip-waiting request with nothing waiting is a
    /// no-op.
    pub async fn post_message(&self, raw: &serde_json::Value) {
        let Some(message) = ControlMessage::parse(raw) else {
            return;
        };

        match message {
            ControlMessage::SkipWaiting => {
                if let Err(err) = self.activate_waiting().await {
                    debug!(error = %err, "skip-waiting ignored");
                }
            }
        }
    }

    /// Respond to a fetch intercepted from a controlled page.
    pub async fn handle_fetch(&self, url: &Url) -> Result<FetchResponse, SwError> {
        let config = {
            let reg = self.registration.read().await;
            reg.active
                .as_ref()
                .map(|w| w.config.clone())
                .ok_or_else(|| SwError::state("no active worker"))?
        };

        FetchRouter::new(config, Arc::clone(&self.caches), Arc::clone(&self.loader))
            .handle(url)
            .await
    }

    /// Fetch every manifest asset before touching the cache, so a failed
    /// install never leaves a partial cache behind.
    async fn run_install(
        &self,
        config: &WorkerConfig,
    ) -> Result<Vec<(String, CacheEntry)>, SwError> {
        let mut entries = Vec::with_capacity(config.static_assets.len());

        for asset in &config.static_assets {
            let url = self.scope.join(asset)?;
            let response = self
                .loader
                .fetch(Request::get(url.clone()))
                .await
                .map_err(|err| SwError::install(format!("{url}: {err}")))?;

            if !response.ok() {
                return Err(SwError::install(format!(
                    "{url}: unexpected status {}",
                    response.status
                )));
            }

            entries.push((url.to_string(), CacheEntry::from_response(&response)));
        }

        Ok(entries)
    }

    /// Activate the waiting worker: delete every stale cache, mark the
    /// worker active, then claim all open pages. Cleanup strictly
    /// precedes claiming.
    async fn activate_waiting(&self) -> Result<WorkerId, SwError> {
        let (id, version) = {
            let mut reg = self.registration.write().await;
            let id = reg
                .begin_activation()
                .ok_or_else(|| SwError::state("no waiting worker to activate"))?;
            let version = reg
                .active
                .as_ref()
                .map(|w| w.config.cache_version.clone())
                .unwrap_or_default();
            (id, version)
        };
        self.emit(WorkerEvent::StateChange {
            worker_id: id,
            state: WorkerState::Activating,
        });

        // Each deletion stands alone: one failure is logged and the rest
        // of the cleanup continues.
        {
            let mut caches = self.caches.write().await;
            let stale: Vec<String> = caches
                .keys()
                .into_iter()
                .filter(|name| *name != version)
                .map(String::from)
                .collect();
            for name in stale {
                if caches.delete(&name) {
                    debug!(cache = %name, "deleted stale cache");
                } else {
                    warn!(cache = %name, "failed to delete stale cache");
                }
            }
        }

        self.registration.write().await.finish_activation();
        self.emit(WorkerEvent::StateChange {
            worker_id: id,
            state: WorkerState::Activated,
        });

        // Claim every open page so interception starts without a reload.
        {
            let mut clients = self.clients.write().await;
            for client in clients.values_mut() {
                client.controller = Some(id);
                self.emit(WorkerEvent::ControllerChange {
                    client_id: client.id,
                });
            }
        }

        info!(worker = ?id, version = %version, "worker activated and controlling");
        Ok(id)
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.event_tx.send(event);
    }
}
