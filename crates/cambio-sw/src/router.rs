//! Fetch routing: which caching policy answers an intercepted request.
//!
//! Exactly one policy responds per request. Exchange-rate lookups are
//! served stale-while-revalidate; every other request is cache-first
//! against the install-time asset set.

use std::sync::Arc;

use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use cambio_net::{Request, ResourceLoader, Response};

use crate::cache::{CacheEntry, CacheStorage};
use crate::{SwError, WorkerConfig};

/// The two caching policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Stale-while-revalidate, keyed by the full URL.
    RateLookup,
    /// Cache-first against the install-time asset set.
    StaticAsset,
}

/// Response handed back to an intercepted request.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether the body came out of the cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Serve a cached entry.
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }

    /// Serve a live network response.
    pub fn from_network(response: &Response) -> Self {
        let mut headers = HashMap::new();
        for (name, value) in response.headers.iter() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_string(), v.to_string());
            }
        }

        Self {
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            from_cache: false,
        }
    }

    /// Check if the response was successful (2xx).
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Routes intercepted requests for one worker version.
pub struct FetchRouter {
    config: WorkerConfig,
    caches: Arc<RwLock<CacheStorage>>,
    loader: Arc<ResourceLoader>,
}

impl FetchRouter {
    /// Create a router serving the given version's cache.
    pub fn new(
        config: WorkerConfig,
        caches: Arc<RwLock<CacheStorage>>,
        loader: Arc<ResourceLoader>,
    ) -> Self {
        Self {
            config,
            caches,
            loader,
        }
    }

    /// Decide which policy serves a URL.
    pub fn policy_for(&self, url: &Url) -> FetchPolicy {
        if url.path().starts_with(&self.config.rate_api_prefix) {
            FetchPolicy::RateLookup
        } else {
            FetchPolicy::StaticAsset
        }
    }

    /// Respond to an intercepted request with exactly one policy.
    pub async fn handle(&self, url: &Url) -> Result<FetchResponse, SwError> {
        match self.policy_for(url) {
            FetchPolicy::RateLookup => self.serve_rate(url).await,
            FetchPolicy::StaticAsset => self.serve_static(url).await,
        }
    }

    /// Cache-first: a hit never touches the network, a miss is served live
    /// and never cached. Only install populates this policy's entries.
    async fn serve_static(&self, url: &Url) -> Result<FetchResponse, SwError> {
        {
            let caches = self.caches.read().await;
            if let Some(entry) = caches
                .get(&self.config.cache_version)
                .and_then(|cache| cache.match_request(url.as_str()))
            {
                trace!(url = %url, "serving static asset from cache");
                return Ok(FetchResponse::from_entry(entry));
            }
        }

        debug!(url = %url, "static asset not cached; fetching live");
        let response = self.loader.fetch(Request::get(url.clone())).await?;
        Ok(FetchResponse::from_network(&response))
    }

    /// Stale-while-revalidate: a hit returns immediately and refreshes in
    /// the background; a cold miss fetches, stores, and returns.
    async fn serve_rate(&self, url: &Url) -> Result<FetchResponse, SwError> {
        let cached = {
            let caches = self.caches.read().await;
            caches
                .get(&self.config.cache_version)
                .and_then(|cache| cache.match_request(url.as_str()))
                .cloned()
        };

        if let Some(entry) = cached {
            trace!(url = %url, "serving stale rate; revalidating in background");
            self.spawn_revalidate(url.clone());
            return Ok(FetchResponse::from_entry(&entry));
        }

        let response = self.loader.fetch(Request::get(url.clone())).await?;
        let entry = CacheEntry::from_response(&response);
        self.caches
            .write()
            .await
            .open(&self.config.cache_version)
            .put(url.as_str(), entry);

        Ok(FetchResponse::from_network(&response))
    }

    /// Fire-and-forget refresh of a rate entry. Failures keep the stale
    /// entry in place and never reach the original caller.
    fn spawn_revalidate(&self, url: Url) {
        let loader = Arc::clone(&self.loader);
        let caches = Arc::clone(&self.caches);
        let version = self.config.cache_version.clone();

        tokio::spawn(async move {
            match loader.fetch(Request::get(url.clone())).await {
                Ok(response) => {
                    let entry = CacheEntry::from_response(&response);
                    caches.write().await.open(&version).put(url.as_str(), entry);
                    trace!(url = %url, "rate entry revalidated");
                }
                Err(err) => {
                    debug!(url = %url, error = %err, "background revalidation failed; keeping stale entry");
                }
            }
        });
    }
}
