//! One polling cycle: ingest → consolidate → render → deliver.

use crate::config::FulfillmentConfig;
use crate::ingest::{
    AcceptedOrder, CustomerOrders, IngestError, IngestOutcome, ItemError, MultiQuantityRecord,
    OrderIngestor, SkippedOrder,
};
use crate::ledger::Ledger;
use crate::models::OrderRecord;
use crate::picklist::{ConsolidateError, FlatEntry, PickListEntry, consolidate};
use crate::report::{self, RenderedReport};
use crate::shipstation::ShipStationError;
use crate::sinks::{Notifier, ReportSink};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct CycleError {
    stage: &'static str,
    message: String,
    kind: CycleErrorKind,
    /// Orders that were recorded and folded before the failure.
    partial: Option<Box<CycleReport>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleErrorKind {
    InvalidInput,
    Internal,
}

impl CycleError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: CycleErrorKind::InvalidInput,
            partial: None,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: CycleErrorKind::Internal,
            partial: None,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> CycleErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }

    fn with_partial(mut self, report: CycleReport) -> Self {
        self.partial = Some(Box::new(report));
        self
    }

    pub fn partial(&self) -> Option<&CycleReport> {
        self.partial.as_deref()
    }
}

impl From<ShipStationError> for CycleError {
    fn from(err: ShipStationError) -> Self {
        Self::internal("fetch", err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub order_count: usize,
    pub accepted: Vec<AcceptedOrder>,
    pub skipped: Vec<SkippedOrder>,
    pub item_errors: Vec<ItemError>,
    pub flat: Vec<FlatEntry>,
    pub pick_list: Vec<PickListEntry>,
    pub size_errors: Vec<ConsolidateError>,
    pub multi_quantity: BTreeMap<String, MultiQuantityRecord>,
    pub repeat_customers: Vec<CustomerOrders>,
    /// Sink or notifier failures; the ledger is not rolled back for these.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub delivery_errors: Vec<String>,
}

#[cfg(test)]
impl CycleReport {
    pub fn empty() -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at: Utc::now(),
            order_count: 0,
            accepted: Vec::new(),
            skipped: Vec::new(),
            item_errors: Vec::new(),
            flat: Vec::new(),
            pick_list: Vec::new(),
            size_errors: Vec::new(),
            multi_quantity: BTreeMap::new(),
            repeat_customers: Vec::new(),
            delivery_errors: Vec::new(),
        }
    }
}

/// Runs the synchronous core over one batch. Aggregates live only for the
/// duration of this call; the ledger keeps what was accepted.
///
/// A ledger write failure aborts the batch. Orders recorded before it are
/// already in the ledger and will never be fetched as new again, so the error
/// carries their report for delivery.
pub fn run_cycle(
    batch: &[OrderRecord],
    ledger: &mut dyn Ledger,
    config: &FulfillmentConfig,
) -> Result<CycleReport, CycleError> {
    let cycle_id = Uuid::new_v4();
    let started_at = Utc::now();

    let ingested =
        OrderIngestor::new(&config.normalizer, &config.exclusions).ingest(batch, ledger);
    let outcome = match ingested {
        Ok(outcome) => outcome,
        Err(IngestError::Ledger {
            order_id,
            source,
            partial,
        }) => {
            let recorded: Vec<&str> = partial
                .accepted
                .iter()
                .map(|order| order.order_id.as_str())
                .collect();
            error!(
                target = "pickwell.ledger",
                order_id = %order_id,
                recorded = ?recorded,
                error = %source,
                "ledger write failed; batch aborted"
            );
            let message = format!("ledger write for order {order_id} failed: {source}");
            let report = build_report(cycle_id, started_at, *partial, config);
            return Err(CycleError::internal("ledger", message).with_partial(report));
        }
    };
    Ok(build_report(cycle_id, started_at, outcome, config))
}

fn build_report(
    cycle_id: Uuid,
    started_at: DateTime<Utc>,
    outcome: IngestOutcome,
    config: &FulfillmentConfig,
) -> CycleReport {
    let consolidated = consolidate(outcome.aggregates.items, &config.sizes);

    crate::metrics::orders_accepted(outcome.accepted.len());
    crate::metrics::orders_skipped(outcome.skipped.len());
    crate::metrics::item_errors(outcome.item_errors.len());
    info!(
        target = "pickwell.cycle",
        cycle_id = %cycle_id,
        orders = outcome.order_count,
        accepted = outcome.accepted.len(),
        skipped = outcome.skipped.len(),
        skus = consolidated.flat.len(),
        "cycle consolidated"
    );

    CycleReport {
        cycle_id,
        started_at,
        order_count: outcome.order_count,
        accepted: outcome.accepted,
        skipped: outcome.skipped,
        item_errors: outcome.item_errors,
        flat: consolidated.flat,
        pick_list: consolidated.pick_list,
        size_errors: consolidated.errors,
        multi_quantity: outcome.aggregates.multi_quantity,
        repeat_customers: outcome.repeat_customers,
        delivery_errors: Vec::new(),
    }
}

/// Shared handle used by the poller and the HTTP routes. The ledger mutex is
/// held for the whole ingest so every order is recorded before it is folded.
#[derive(Clone)]
pub struct Fulfillment {
    ledger: Arc<Mutex<Box<dyn Ledger>>>,
    config: Arc<FulfillmentConfig>,
    sink: Arc<dyn ReportSink>,
    notifier: Notifier,
    latest: Arc<Mutex<Option<CycleReport>>>,
}

impl Fulfillment {
    pub fn new(
        ledger: Box<dyn Ledger>,
        config: FulfillmentConfig,
        sink: Arc<dyn ReportSink>,
        notifier: Notifier,
    ) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(ledger)),
            config: Arc::new(config),
            sink,
            notifier,
            latest: Arc::new(Mutex::new(None)),
        }
    }

    /// Must run on a multi-threaded runtime; the core blocks in place.
    pub async fn process(
        &self,
        batch: Vec<OrderRecord>,
        source: &'static str,
    ) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let result = {
            let mut ledger = self.ledger.lock().await;
            tokio::task::block_in_place(|| run_cycle(&batch, &mut **ledger, &self.config))
        };

        match result {
            Ok(report) => Ok(self.finish(report, source, started).await),
            Err(mut err) => {
                if let Some(partial) = err.partial.take() {
                    let delivered = self.finish(*partial, source, started).await;
                    warn!(
                        target = "pickwell.cycle",
                        cycle_id = %delivered.cycle_id,
                        accepted = delivered.accepted.len(),
                        "delivered orders recorded before the ledger failure"
                    );
                    err.partial = Some(Box::new(delivered));
                }
                Err(err)
            }
        }
    }

    async fn finish(
        &self,
        mut report: CycleReport,
        source: &'static str,
        started: Instant,
    ) -> CycleReport {
        let rendered = report::render(&report);
        report.delivery_errors = self.deliver(&report, &rendered).await;
        info!(target = "pickwell.cycle", "\n{}", rendered.console);
        crate::metrics::cycle_elapsed(source, started.elapsed().as_millis());

        *self.latest.lock().await = Some(report.clone());
        report
    }

    async fn deliver(&self, report: &CycleReport, rendered: &RenderedReport) -> Vec<String> {
        let mut failures = Vec::new();
        let sink = Arc::clone(&self.sink);
        if let Err(err) = tokio::task::block_in_place(|| sink.write(rendered)) {
            warn!(target = "pickwell.cycle", error = %err, "report sink failed");
            failures.push(err.to_string());
        }
        if !report.accepted.is_empty()
            && let Err(err) = self.notifier.notify(&rendered.flat_text).await
        {
            warn!(target = "pickwell.cycle", error = %err, "notification failed");
            failures.push(err.to_string());
        }
        failures
    }

    pub async fn latest(&self) -> Option<CycleReport> {
        self.latest.lock().await.clone()
    }

    pub async fn ledger_len(&self) -> usize {
        self.ledger.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::models::LineItem;
    use crate::report::FLAT_FILE;
    use crate::sinks::FileSink;

    fn batch() -> Vec<OrderRecord> {
        vec![
            OrderRecord::sample(
                "#1",
                "Dana",
                vec![
                    LineItem::sample("A-100-SML", "tee", 2, "u1"),
                    LineItem::sample("wi_93820", "Custom Mug", 1, "u2"),
                ],
            ),
            OrderRecord::sample("#2", "Lee", vec![LineItem::sample("A-100-SML", "tee", 3, "u3")]),
        ]
    }

    #[test]
    fn run_cycle_builds_full_report() {
        let mut ledger = MemoryLedger::default();
        let report =
            run_cycle(&batch(), &mut ledger, &FulfillmentConfig::default()).expect("cycle");

        assert_eq!(report.order_count, 2);
        assert_eq!(report.accepted.len(), 2);
        let rendered: Vec<String> = report.pick_list.iter().map(|e| e.to_string()).collect();
        assert_eq!(rendered, vec!["A-600 -> SML (5)", "Custom Mug"]);
        assert_eq!(report.multi_quantity.len(), 2);
        assert!(report.size_errors.is_empty());
    }

    #[test]
    fn ledger_failure_maps_to_internal_error() {
        let mut ledger = MemoryLedger {
            fail_on: Some("#1".into()),
            ..MemoryLedger::default()
        };
        let err = run_cycle(&batch(), &mut ledger, &FulfillmentConfig::default())
            .expect_err("ledger failure");
        assert_eq!(err.stage(), "ledger");
        assert_eq!(err.kind(), CycleErrorKind::Internal);
        let partial = err.partial().expect("partial report");
        assert!(partial.accepted.is_empty());
        assert!(partial.flat.is_empty());
    }

    fn two_shirts() -> Vec<OrderRecord> {
        vec![
            OrderRecord::sample("#1", "Dana", vec![LineItem::sample("X-1-SML", "tee", 1, "u1")]),
            OrderRecord::sample("#2", "Lee", vec![LineItem::sample("X-2-SML", "tee", 1, "u2")]),
        ]
    }

    #[test]
    fn ledger_failure_keeps_orders_recorded_before_it() {
        let mut ledger = MemoryLedger {
            fail_on: Some("#2".into()),
            ..MemoryLedger::default()
        };
        let err = run_cycle(&two_shirts(), &mut ledger, &FulfillmentConfig::default())
            .expect_err("ledger failure");
        assert_eq!(err.stage(), "ledger");

        let partial = err.partial().expect("partial report");
        let accepted: Vec<&str> = partial.accepted.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(accepted, vec!["#1"]);
        let skus: Vec<&str> = partial.flat.iter().map(|e| e.sku.as_str()).collect();
        assert_eq!(skus, vec!["X-1-SML"]);
        assert!(ledger.contains("#1"));
        assert!(!ledger.contains("#2"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn process_delivers_recorded_orders_when_ledger_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fulfillment = Fulfillment::new(
            Box::new(MemoryLedger {
                fail_on: Some("#2".into()),
                ..MemoryLedger::default()
            }),
            FulfillmentConfig::default(),
            Arc::new(FileSink::new(dir.path())),
            Notifier::Log,
        );

        let err = fulfillment
            .process(two_shirts(), "test")
            .await
            .expect_err("ledger failure");
        assert_eq!(err.stage(), "ledger");
        assert_eq!(err.kind(), CycleErrorKind::Internal);

        let flat = std::fs::read_to_string(dir.path().join(FLAT_FILE)).expect("flat file");
        assert_eq!(flat, "X-1-SML\n");
        let latest = fulfillment.latest().await.expect("latest report");
        let skus: Vec<&str> = latest.flat.iter().map(|e| e.sku.as_str()).collect();
        assert_eq!(skus, vec!["X-1-SML"]);
        assert_eq!(fulfillment.ledger_len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn process_writes_files_and_keeps_latest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fulfillment = Fulfillment::new(
            Box::new(MemoryLedger::default()),
            FulfillmentConfig::default(),
            Arc::new(FileSink::new(dir.path())),
            Notifier::Log,
        );
        assert!(fulfillment.latest().await.is_none());

        let report = fulfillment.process(batch(), "test").await.expect("process");
        assert!(report.delivery_errors.is_empty());
        let flat = std::fs::read_to_string(dir.path().join(FLAT_FILE)).expect("flat file");
        assert_eq!(flat, "A-600-SML ... (5)\nCustom Mug\n");

        let again = fulfillment.process(batch(), "test").await.expect("second");
        assert!(again.flat.is_empty());
        assert_eq!(again.skipped.len(), 2);
        assert_eq!(fulfillment.ledger_len().await, 2);
        assert_eq!(
            fulfillment.latest().await.map(|r| r.cycle_id),
            Some(again.cycle_id)
        );
    }
}
