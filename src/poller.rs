use crate::cycle::{CycleError, CycleReport, Fulfillment};
use crate::shipstation::ShipStationClient;
use std::time::Duration;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct Poller {
    client: ShipStationClient,
    fulfillment: Fulfillment,
    interval: Duration,
    refresh_wait: Duration,
}

impl Poller {
    pub fn new(
        client: ShipStationClient,
        fulfillment: Fulfillment,
        interval: Duration,
        refresh_wait: Duration,
    ) -> Self {
        Self {
            client,
            fulfillment,
            interval,
            refresh_wait,
        }
    }

    /// Cycles forever. A failed cycle is logged and retried after the usual
    /// interval.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                target = "pickwell.cycle",
                interval_secs = self.interval.as_secs(),
                "poller started"
            );
            loop {
                match self.run_once().await {
                    Ok(report) => info!(
                        target = "pickwell.cycle",
                        cycle_id = %report.cycle_id,
                        accepted = report.accepted.len(),
                        "cycle complete"
                    ),
                    Err(err) => error!(
                        target = "pickwell.cycle",
                        stage = err.stage(),
                        delivered = err.partial().map_or(0, |report| report.accepted.len()),
                        error = %err,
                        "cycle failed; retrying next interval"
                    ),
                }
                sleep(self.interval).await;
            }
        })
    }

    pub async fn run_once(&self) -> Result<CycleReport, CycleError> {
        match self.client.refresh_store().await {
            Ok(true) => sleep(self.refresh_wait).await,
            Ok(false) => {}
            Err(err) => warn!(
                target = "pickwell.shipstation",
                error = %err,
                "store refresh failed"
            ),
        }
        let orders = self.client.awaiting_shipment().await?;
        self.fulfillment.process(orders, "poller").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FulfillmentConfig;
    use crate::cycle::CycleErrorKind;
    use crate::ledger::MemoryLedger;
    use crate::sinks::{FileSink, Notifier};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::Arc;

    fn poller(server: &MockServer, dir: &std::path::Path) -> Poller {
        let fulfillment = Fulfillment::new(
            Box::new(MemoryLedger::default()),
            FulfillmentConfig::default(),
            Arc::new(FileSink::new(dir)),
            Notifier::Log,
        );
        Poller::new(
            ShipStationClient::new(&server.base_url(), "k", "s", "1"),
            fulfillment,
            Duration::from_secs(60),
            Duration::ZERO,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_refresh_still_fetches() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/stores/refreshstore");
                then.status(503);
            })
            .await;
        let orders = server
            .mock_async(|when, then| {
                when.method(GET).path("/orders");
                then.status(200).json_body(json!({
                    "orders": [{
                        "orderNumber": "#1",
                        "shipTo": { "name": "Dana" },
                        "items": [{ "sku": "B-110-XL", "name": "hoodie", "quantity": "2", "imageUrl": "u" }]
                    }]
                }));
            })
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let report = poller(&server, dir.path()).run_once().await.expect("cycle");
        orders.assert_async().await;
        assert_eq!(report.flat[0].sku.as_str(), "B-610-XL");
        assert_eq!(report.flat[0].quantity, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_failure_aborts_cycle() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/stores/refreshstore");
                then.status(200).json_body(json!({ "success": "true" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/orders");
                then.status(500);
            })
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let err = poller(&server, dir.path()).run_once().await.expect_err("fetch");
        assert_eq!(err.stage(), "fetch");
        assert_eq!(err.kind(), CycleErrorKind::Internal);
    }
}
