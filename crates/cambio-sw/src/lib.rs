//! # Cambio Service Worker Core
//!
//! The offline heart of the Cambio currency converter: a versioned static
//! asset cache, a fetch router applying one of two caching policies per
//! request, and the update handshake between a freshly installed worker
//! version and the pages it will control.
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (one per scope)
//!     │
//!     ├── Registration
//!     │       ├── installing (ServiceWorker)
//!     │       ├── waiting (ServiceWorker)
//!     │       └── active (ServiceWorker)
//!     │
//!     ├── CacheStorage
//!     │       └── Cache (named by version)
//!     │               └── url → CacheEntry
//!     │
//!     ├── Clients (controlled pages)
//!     │
//!     └── WorkerEvent stream → page controller
//! ```
//!
//! Install populates the version-named cache with every manifest asset or
//! fails wholesale; activation deletes every other cache and claims all open
//! pages. Rate lookups are served stale-while-revalidate, everything else
//! cache-first.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cambio_net::NetError;

pub mod cache;
pub mod container;
pub mod lifecycle;
pub mod message;
pub mod router;

pub use cache::{Cache, CacheEntry, CacheStorage};
pub use container::{Client, ClientId, ServiceWorkerContainer, WorkerEvent};
pub use lifecycle::{Registration, ServiceWorker, WorkerId, WorkerState};
pub use message::ControlMessage;
pub use router::{FetchPolicy, FetchResponse, FetchRouter};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl SwError {
    /// Create a state error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Create an install error.
    pub fn install(message: impl Into<String>) -> Self {
        Self::InstallFailed(message.into())
    }
}

/// Static configuration for one worker version.
///
/// This is the Rust analog of the worker script a browser would download:
/// a new version ships a new config, usually with a bumped
/// `cache_version`, and goes through install → waiting → activate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Name of this generation of the versioned cache.
    pub cache_version: String,

    /// Resources cached at install time, resolved against the scope.
    /// Absolute URLs pass through unchanged.
    pub static_assets: Vec<String>,

    /// Request path prefix served with the stale-while-revalidate policy.
    pub rate_api_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_version: "currency-converter-v1".to_string(),
            static_assets: [
                "/",
                "js/jquery.min.js",
                "js/idb.js",
                "js/materialize.min.js",
                "js/currency-converter.js",
                "https://fonts.googleapis.com/icon?family=Material+Icons",
                "css/materialize.min.css",
                "css/currency-converter.css",
                "images/cactus.png",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            rate_api_prefix: "/api/v5/convert".to_string(),
        }
    }
}
