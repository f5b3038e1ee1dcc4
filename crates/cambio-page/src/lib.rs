//! # Cambio Page
//!
//! The page-controller side of the offline converter: worker registration,
//! the update-available handshake, the one-shot reload on controller
//! change, and exchange-rate lookups routed through whichever worker
//! controls the page.
//!
//! Rendering, input validation, and install-prompt handling live in the
//! embedding UI; this crate only drives the worker protocol and hands the
//! UI its two cues through [`UpdateUi`].

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use cambio_net::{NetError, Request, ResourceLoader};
use cambio_sw::{
    ClientId, ServiceWorkerContainer, SwError, WorkerConfig, WorkerEvent, WorkerId,
};

/// Errors that can occur on the page side.
#[derive(Error, Debug)]
pub enum PageError {
    #[error("Worker error: {0}")]
    Worker(#[from] SwError),

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Malformed rate payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// UI cues owned by the embedding page; the controller never renders.
pub trait UpdateUi: Send + Sync {
    /// A new worker version is installed and waiting for the user's nod.
    fn update_available(&self);

    /// A new worker took control; the page should reload itself.
    fn reload(&self);
}

/// A conversion lookup for one currency pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateQuery {
    pub from: String,
    pub to: String,
}

impl RateQuery {
    /// Create a lookup for the given pair.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Key of this pair in the compact response payload.
    pub fn pair(&self) -> String {
        format!("{}_{}", self.from, self.to)
    }

    /// Full query URL under the given scope and API prefix.
    pub fn url(&self, scope: &Url, prefix: &str) -> Result<Url, url::ParseError> {
        let mut url = scope.join(prefix)?;
        url.set_query(Some(&format!("q={}&compact=ultra", self.pair())));
        Ok(url)
    }
}

/// An exchange rate for one currency pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Rate {
    /// The pair key, e.g. `USD_EUR`.
    pub pair: String,

    /// Units of the target currency per unit of the source.
    pub value: f64,
}

impl Rate {
    /// Convert an amount of the source currency.
    pub fn apply(&self, amount: f64) -> f64 {
        amount * self.value
    }
}

/// Pull a pair's rate out of the compact payload shape
/// `{"USD_EUR": 0.86}`. An empty or mismatched payload is no rate.
fn decode_rate(payload: &Value, pair: &str) -> Option<f64> {
    payload.get(pair)?.as_f64()
}

/// Drives the worker protocol for one open page.
pub struct PageController {
    container: Arc<ServiceWorkerContainer>,
    loader: Arc<ResourceLoader>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    ui: Option<Arc<dyn UpdateUi>>,
    client_id: ClientId,
    scope: Url,
    rate_prefix: String,
    pending_update: Option<WorkerId>,
    /// One-shot guard: however many controller changes arrive, the page
    /// reloads at most once per controller instance.
    refreshing: bool,
}

impl PageController {
    /// Attach a page to the container and start listening for worker
    /// events.
    pub async fn connect(
        container: Arc<ServiceWorkerContainer>,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
        loader: Arc<ResourceLoader>,
        ui: Option<Arc<dyn UpdateUi>>,
    ) -> Self {
        let scope = container.scope().clone();
        let client_id = container.add_client(scope.clone()).await;

        Self {
            container,
            loader,
            events,
            ui,
            client_id,
            scope,
            rate_prefix: WorkerConfig::default().rate_api_prefix,
            pending_update: None,
            refreshing: false,
        }
    }

    /// This page's client ID.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Whether an installed update is waiting on the user.
    pub fn update_pending(&self) -> bool {
        self.pending_update.is_some()
    }

    /// Register a worker version, then surface any update that is already
    /// waiting, mirroring the page's registration flow.
    pub async fn register_worker(&mut self, config: WorkerConfig) -> Result<(), PageError> {
        self.rate_prefix = config.rate_api_prefix.clone();
        let result = self.container.register(config).await;
        self.pump_events();

        if let Some(id) = self.container.waiting_worker().await {
            self.notice_update(id);
        }

        result.map(|_| ()).map_err(PageError::from)
    }

    /// Drain pending worker events and react to them.
    pub fn pump_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::UpdateReady { worker_id } => self.notice_update(worker_id),
            WorkerEvent::ControllerChange { client_id } if client_id == self.client_id => {
                self.on_controller_change()
            }
            WorkerEvent::StateChange { .. } | WorkerEvent::ControllerChange { .. } => {}
        }
    }

    fn notice_update(&mut self, worker_id: WorkerId) {
        if self.pending_update == Some(worker_id) {
            return;
        }
        info!(worker = ?worker_id, "update ready; notifying page");
        self.pending_update = Some(worker_id);
        if let Some(ui) = &self.ui {
            ui.update_available();
        }
    }

    fn on_controller_change(&mut self) {
        if self.refreshing {
            debug!("controller changed again; reload already scheduled");
            return;
        }
        self.refreshing = true;
        info!("controller changed; reloading page");
        if let Some(ui) = &self.ui {
            ui.reload();
        }
    }

    /// The user accepted the update notice: ask the waiting worker to
    /// activate now.
    pub async fn apply_update(&mut self) {
        self.container
            .post_message(&json!({"action": "skipWaiting"}))
            .await;
        self.pending_update = None;
        self.pump_events();
    }

    /// Look up an exchange rate, through the controlling worker when one
    /// controls this page, live otherwise. `Ok(None)` means the service
    /// answered with no rate for the pair.
    pub async fn fetch_rate(&self, query: &RateQuery) -> Result<Option<Rate>, PageError> {
        let url = query.url(&self.scope, &self.rate_prefix)?;
        let pair = query.pair();

        let payload: Value = if self.container.controller_of(self.client_id).await.is_some() {
            self.container.handle_fetch(&url).await?.json()?
        } else {
            debug!(url = %url, "page not controlled; fetching rate live");
            self.loader.fetch(Request::get(url)).await?.json()?
        };

        Ok(decode_rate(&payload, &pair).map(|value| Rate { pair, value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cambio_net::LoaderConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingUi {
        updates: AtomicUsize,
        reloads: AtomicUsize,
    }

    impl UpdateUi for RecordingUi {
        fn update_available(&self) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }

        fn reload(&self) {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn worker_config(version: &str) -> WorkerConfig {
        WorkerConfig {
            cache_version: version.to_string(),
            static_assets: vec!["/".to_string()],
            rate_api_prefix: "/api/v5/convert".to_string(),
        }
    }

    async fn mock_origin() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>converter</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v5/convert"))
            .and(query_param("q", "USD_EUR"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(r#"{"USD_EUR":0.86}"#, "application/json"),
            )
            .mount(&server)
            .await;
        server
    }

    async fn page_for(
        server: &MockServer,
        ui: Option<Arc<dyn UpdateUi>>,
    ) -> (PageController, Arc<ServiceWorkerContainer>) {
        let scope = Url::parse(&format!("{}/", server.uri())).unwrap();
        let loader = Arc::new(ResourceLoader::new(LoaderConfig::default()).unwrap());
        let (container, events) = ServiceWorkerContainer::new(scope, Arc::clone(&loader));
        let container = Arc::new(container);
        let page = PageController::connect(Arc::clone(&container), events, loader, ui).await;
        (page, container)
    }

    #[test]
    fn test_rate_query_url_matches_converter_api() {
        let scope = Url::parse("https://free.currencyconverterapi.com/").unwrap();
        let url = RateQuery::new("USD", "EUR")
            .url(&scope, "/api/v5/convert")
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://free.currencyconverterapi.com/api/v5/convert?q=USD_EUR&compact=ultra"
        );
    }

    #[test]
    fn test_decode_rate_reads_pair_value() {
        let payload = json!({"USD_EUR": 0.86});
        assert_eq!(decode_rate(&payload, "USD_EUR"), Some(0.86));
    }

    #[test]
    fn test_decode_rate_rejects_empty_payload() {
        assert_eq!(decode_rate(&json!({}), "USD_EUR"), None);
        assert_eq!(decode_rate(&json!({"EUR_USD": 1.1}), "USD_EUR"), None);
        assert_eq!(decode_rate(&json!({"USD_EUR": "n/a"}), "USD_EUR"), None);
    }

    #[test]
    fn test_rate_applies_multiplier() {
        let rate = Rate {
            pair: "USD_EUR".to_string(),
            value: 0.5,
        };
        assert_eq!(rate.apply(10.0), 5.0);
    }

    #[tokio::test]
    async fn test_repeated_controller_changes_reload_once() {
        let server = mock_origin().await;
        let ui = Arc::new(RecordingUi::default());
        let (mut page, _container) = page_for(&server, Some(ui.clone())).await;

        let client_id = page.client_id();
        for _ in 0..3 {
            page.handle_event(WorkerEvent::ControllerChange { client_id });
        }

        assert_eq!(ui.reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_pages_controller_changes_are_ignored() {
        let server = mock_origin().await;
        let ui = Arc::new(RecordingUi::default());
        let (mut page, container) = page_for(&server, Some(ui.clone())).await;

        let other = container.add_client(container.scope().clone()).await;
        page.handle_event(WorkerEvent::ControllerChange { client_id: other });

        assert_eq!(ui.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_update_notices_fire_once() {
        let server = mock_origin().await;
        let ui = Arc::new(RecordingUi::default());
        let (mut page, _container) = page_for(&server, Some(ui.clone())).await;

        let worker = cambio_sw::ServiceWorker::new(worker_config("test-v2"));
        page.handle_event(WorkerEvent::UpdateReady { worker_id: worker.id });
        page.handle_event(WorkerEvent::UpdateReady { worker_id: worker.id });

        assert!(page.update_pending());
        assert_eq!(ui.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uncontrolled_page_fetches_rates_live() {
        let server = mock_origin().await;
        let (page, _container) = page_for(&server, None).await;

        let rate = page
            .fetch_rate(&RateQuery::new("USD", "EUR"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(rate.pair, "USD_EUR");
        assert_eq!(rate.value, 0.86);
    }

    #[tokio::test]
    async fn test_full_update_handshake() {
        let server = mock_origin().await;
        let ui = Arc::new(RecordingUi::default());
        let (mut page, _container) = page_for(&server, Some(ui.clone())).await;

        // First install: the worker claims the page, which reloads once.
        page.register_worker(worker_config("test-v1")).await.unwrap();
        assert_eq!(ui.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(ui.updates.load(Ordering::SeqCst), 0);

        // A rate lookup now goes through the worker and lands in cache.
        let rate = page
            .fetch_rate(&RateQuery::new("USD", "EUR"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rate.apply(200.0), 172.0);

        // A second version parks as waiting and raises the update notice.
        page.register_worker(worker_config("test-v2")).await.unwrap();
        assert!(page.update_pending());
        assert_eq!(ui.updates.load(Ordering::SeqCst), 1);

        // Accepting the update activates it; the reload guard holds.
        page.apply_update().await;
        assert!(!page.update_pending());
        assert_eq!(ui.reloads.load(Ordering::SeqCst), 1);
    }
}
