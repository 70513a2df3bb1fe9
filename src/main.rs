mod config;
mod cycle;
mod http;
mod ingest;
mod ledger;
mod metrics;
mod models;
mod picklist;
mod poller;
mod report;
mod routes;
mod shipstation;
mod sinks;
mod sizes;
mod sku;

use config::{AppConfig, FulfillmentConfig};
use cycle::Fulfillment;
use eyre::WrapErr;
use ledger::{FileLedger, Ledger, RedisLedger};
use metrics_exporter_prometheus::PrometheusBuilder;
use routes::{AppState, build_router};
use shipstation::ShipStationClient;
use sinks::{FileSink, Notifier};
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let app = AppConfig::from_env();
    let fulfillment_config = FulfillmentConfig::load(&app.sku_config_path)
        .wrap_err_with(|| format!("loading {}", app.sku_config_path.display()))?;
    let ledger = open_ledger(&app)?;

    let fulfillment = Fulfillment::new(
        ledger,
        fulfillment_config,
        Arc::new(FileSink::new(&app.output_dir)),
        Notifier::from_url(app.notify_webhook_url.clone()),
    );

    match ShipStationClient::from_env() {
        Some(client) => {
            let _poller =
                poller::Poller::new(client, fulfillment.clone(), app.poll_interval, app.refresh_wait)
                    .spawn();
        }
        None => warn!(
            target = "pickwell.api",
            "ShipStation credentials missing; poller disabled, POST /batches only"
        ),
    }

    let prometheus_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(target = "pickwell.metrics", error = %err, "prometheus recorder unavailable");
            None
        }
    };

    let router = build_router(
        AppState {
            fulfillment,
            prometheus_handle,
        },
        app.request_max_bytes,
    );

    let addr: SocketAddr = ([0, 0, 0, 0], app.port).into();
    info!(target = "pickwell.api", "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, router.into_make_service())
        .await
        .wrap_err("server crashed")?;
    Ok(())
}

fn open_ledger(app: &AppConfig) -> eyre::Result<Box<dyn Ledger>> {
    if let Some(url) = &app.redis_url {
        let client = redis::Client::open(url.as_str()).wrap_err("invalid REDIS_URL")?;
        let ledger = RedisLedger::open(&client, app.ledger_redis_key.clone())
            .wrap_err("opening redis ledger")?;
        return Ok(Box::new(ledger));
    }
    let ledger = FileLedger::open(&app.ledger_path)
        .wrap_err_with(|| format!("opening ledger {}", app.ledger_path.display()))?;
    Ok(Box::new(ledger))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
