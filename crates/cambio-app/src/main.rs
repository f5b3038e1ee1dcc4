//! Cambio smoke run.
//!
//! Wires the loader, worker container, and page controller together
//! against a live origin: registers the worker (with the embedder's
//! retry schedule), then performs a conversion twice so the second
//! lookup exercises the cached path.
//!
//! Usage: `cambio [FROM] [TO] [AMOUNT]`, origin overridable through
//! `CAMBIO_ORIGIN`, log filtering through `RUST_LOG`.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use url::Url;

use cambio_common::{init_logging, LogConfig, RetryConfig};
use cambio_net::{LoaderConfig, ResourceLoader};
use cambio_page::{PageController, RateQuery};
use cambio_sw::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(LogConfig::default());

    let origin = env::var("CAMBIO_ORIGIN")
        .unwrap_or_else(|_| "https://free.currencyconverterapi.com".to_string());
    let mut args = env::args().skip(1);
    let from = args.next().unwrap_or_else(|| "USD".to_string());
    let to = args.next().unwrap_or_else(|| "EUR".to_string());
    let amount: f64 = args
        .next()
        .as_deref()
        .unwrap_or("1")
        .parse()
        .context("amount must be a number")?;

    let scope = Url::parse(&origin).context("invalid origin")?;
    let loader = Arc::new(ResourceLoader::new(LoaderConfig::default())?);
    let (container, events) =
        cambio_sw::ServiceWorkerContainer::new(scope, Arc::clone(&loader));
    let container = Arc::new(container);

    let mut page =
        PageController::connect(Arc::clone(&container), events, Arc::clone(&loader), None).await;

    // The embedder owns the install retry schedule; the worker itself
    // never retries a failed install.
    let retry = RetryConfig::default();
    let mut attempt = 1;
    loop {
        match page.register_worker(WorkerConfig::default()).await {
            Ok(()) => {
                info!("service worker registered");
                break;
            }
            Err(err) if attempt < retry.max_attempts => {
                warn!(attempt, error = %err, "worker install failed; retrying");
                tokio::time::sleep(retry.delay_for_attempt(attempt + 1)).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(error = %err, "giving up on worker install; running uncontrolled");
                break;
            }
        }
    }

    let query = RateQuery::new(from, to);
    match page.fetch_rate(&query).await {
        Ok(Some(rate)) => {
            println!("{} {} = {} ({})", amount, query.from, rate.apply(amount), query.to);

            // A second lookup is served from cache while the rate
            // refreshes in the background.
            if let Ok(Some(rate)) = page.fetch_rate(&query).await {
                info!(pair = %rate.pair, rate = rate.value, "repeat lookup served");
            }
        }
        Ok(None) => warn!(pair = %query.pair(), "rate service returned no rate"),
        Err(err) => warn!(pair = %query.pair(), error = %err, "rate lookup failed"),
    }

    page.pump_events();
    Ok(())
}
