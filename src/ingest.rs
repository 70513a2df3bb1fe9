//! Folds a fetched batch of orders into per-SKU totals.
//!
//! Orders are visited in input order. An order contributes only if it is
//! neither excluded nor already in the ledger, and its id is durably recorded
//! before any of its items are folded.

use crate::ledger::{Ledger, LedgerError};
use crate::models::{ItemFault, OrderRecord};
use crate::sku::{CanonicalSku, SkuNormalizer};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedItem {
    pub quantity: u64,
    /// Image captured from the first line seen for this SKU in the batch.
    pub image_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkuLine {
    pub sku: CanonicalSku,
    pub quantity: u32,
}

/// Lines with quantity > 1 in one order, flagged for a packing double-check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultiQuantityRecord {
    pub customer: String,
    pub lines: Vec<SkuLine>,
}

/// Batch-scoped aggregates; built fresh every cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchAggregates {
    pub items: BTreeMap<CanonicalSku, AggregatedItem>,
    pub multi_quantity: BTreeMap<String, MultiQuantityRecord>,
}

impl BatchAggregates {
    fn fold(&mut self, order_id: &str, customer: &str, line: &PreparedLine) {
        self.items
            .entry(line.sku.clone())
            .and_modify(|item| item.quantity += u64::from(line.quantity))
            .or_insert_with(|| AggregatedItem {
                quantity: u64::from(line.quantity),
                image_ref: line.image_ref.clone(),
            });

        if line.quantity > 1 {
            self.multi_quantity
                .entry(order_id.to_string())
                .or_insert_with(|| MultiQuantityRecord {
                    customer: customer.to_string(),
                    lines: Vec::new(),
                })
                .lines
                .push(SkuLine {
                    sku: line.sku.clone(),
                    quantity: line.quantity,
                });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyProcessed,
    Excluded,
    MissingOrderId,
}

/// An order that was seen but not reprocessed.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedOrder {
    /// Index of the order in the input batch.
    pub position: usize,
    pub order_id: String,
    pub customer: String,
    pub reason: SkipReason,
    pub lines: Vec<SkuLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptedOrder {
    pub position: usize,
    pub order_id: String,
    pub customer: String,
    pub lines: Vec<SkuLine>,
}

#[derive(Debug, Clone, Error, Serialize)]
#[error("order {order_id} item {index}: {fault}")]
pub struct ItemError {
    pub order_id: String,
    pub index: usize,
    pub sku: String,
    pub fault: ItemFault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerOrders {
    pub customer: String,
    pub orders: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestOutcome {
    pub aggregates: BatchAggregates,
    /// Orders in the input batch, whether accepted or not.
    pub order_count: usize,
    pub accepted: Vec<AcceptedOrder>,
    pub skipped: Vec<SkippedOrder>,
    pub item_errors: Vec<ItemError>,
    /// Customers with more than one order in the batch, in first-seen order.
    pub repeat_customers: Vec<CustomerOrders>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// The batch stops at `order_id`; `partial` holds what was folded before it.
    #[error("ledger write for order {order_id} failed: {source}")]
    Ledger {
        order_id: String,
        #[source]
        source: LedgerError,
        partial: Box<IngestOutcome>,
    },
}

struct PreparedLine {
    sku: CanonicalSku,
    quantity: u32,
    image_ref: Option<String>,
}

pub struct OrderIngestor<'a> {
    normalizer: &'a SkuNormalizer,
    exclusions: &'a HashSet<String>,
}

impl<'a> OrderIngestor<'a> {
    pub fn new(normalizer: &'a SkuNormalizer, exclusions: &'a HashSet<String>) -> Self {
        Self {
            normalizer,
            exclusions,
        }
    }

    pub fn ingest(
        &self,
        batch: &[OrderRecord],
        ledger: &mut dyn Ledger,
    ) -> Result<IngestOutcome, IngestError> {
        let mut outcome = IngestOutcome {
            order_count: batch.len(),
            ..IngestOutcome::default()
        };
        let mut customers = CustomerTally::default();

        for (position, order) in batch.iter().enumerate() {
            let order_id = order.order_id();
            let customer = order.customer();
            customers.add(customer);

            let (lines, faults) = self.prepare(order);

            let reason = if order_id.is_empty() {
                Some(SkipReason::MissingOrderId)
            } else if self.exclusions.contains(order_id) {
                Some(SkipReason::Excluded)
            } else if ledger.contains(order_id) {
                Some(SkipReason::AlreadyProcessed)
            } else {
                None
            };

            if let Some(reason) = reason {
                warn!(
                    target = "pickwell.ingest",
                    order_id = %order_id,
                    customer = %customer,
                    reason = ?reason,
                    "order not reprocessed"
                );
                outcome.skipped.push(SkippedOrder {
                    position,
                    order_id: order_id.to_string(),
                    customer: customer.to_string(),
                    reason,
                    lines: lines.iter().map(PreparedLine::summary).collect(),
                });
                continue;
            }

            if let Err(source) = ledger.record(order_id) {
                outcome.repeat_customers = customers.repeats();
                return Err(IngestError::Ledger {
                    order_id: order_id.to_string(),
                    source,
                    partial: Box::new(outcome),
                });
            }

            for line in &lines {
                outcome.aggregates.fold(order_id, customer, line);
            }
            for error in &faults {
                warn!(
                    target = "pickwell.ingest",
                    order_id = %error.order_id,
                    index = error.index,
                    sku = %error.sku,
                    error = %error.fault,
                    "line item skipped"
                );
            }
            info!(
                target = "pickwell.ingest",
                order_id = %order_id,
                lines = lines.len(),
                "order accepted"
            );
            outcome.item_errors.extend(faults);
            outcome.accepted.push(AcceptedOrder {
                position,
                order_id: order_id.to_string(),
                customer: customer.to_string(),
                lines: lines.iter().map(PreparedLine::summary).collect(),
            });
        }

        outcome.repeat_customers = customers.repeats();
        Ok(outcome)
    }

    fn prepare(&self, order: &OrderRecord) -> (Vec<PreparedLine>, Vec<ItemError>) {
        let mut lines = Vec::with_capacity(order.items.len());
        let mut faults = Vec::new();
        for (index, item) in order.items.iter().enumerate() {
            let prepared = item.description().and_then(|description| {
                let raw_sku = item.raw_sku()?;
                let quantity = item.quantity()?;
                let image_ref = item.image_ref()?;
                let sku = self.normalizer.normalize(raw_sku, description);
                if sku.as_str().trim().is_empty() {
                    return Err(ItemFault::Unidentifiable);
                }
                Ok(PreparedLine {
                    sku,
                    quantity,
                    image_ref,
                })
            });
            match prepared {
                Ok(line) => lines.push(line),
                Err(fault) => faults.push(ItemError {
                    order_id: order.order_id().to_string(),
                    index,
                    sku: item.sku_label(),
                    fault,
                }),
            }
        }
        (lines, faults)
    }
}

impl PreparedLine {
    fn summary(&self) -> SkuLine {
        SkuLine {
            sku: self.sku.clone(),
            quantity: self.quantity,
        }
    }
}

#[derive(Default)]
struct CustomerTally {
    order: Vec<String>,
    counts: HashMap<String, usize>,
}

impl CustomerTally {
    fn add(&mut self, customer: &str) {
        if customer.is_empty() {
            return;
        }
        let count = self.counts.entry(customer.to_string()).or_insert(0);
        if *count == 0 {
            self.order.push(customer.to_string());
        }
        *count += 1;
    }

    fn repeats(&self) -> Vec<CustomerOrders> {
        self.order
            .iter()
            .filter_map(|customer| {
                let orders = self.counts.get(customer).copied().unwrap_or(0);
                (orders > 1).then(|| CustomerOrders {
                    customer: customer.clone(),
                    orders,
                })
            })
            .collect()
    }
}
