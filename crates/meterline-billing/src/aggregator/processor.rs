use crate::domain::catalog::{BillingModel, Meter, Price, Subscription, SubscriptionLineItem};
use crate::domain::events::{Event, ProcessedUsageRecord};
use crate::domain::matcher::match_event;
use crate::domain::pricing::CostCurve;
use crate::domain::quantity::{extract_quantity, generate_unique_hash};
use crate::error::{BillingError, Result};
use crate::storage::catalog::CatalogRepository;
use crate::storage::usage::UsageRecordRepository;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Outcome of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub events_total: usize,
    pub events_processed: usize,
    pub events_failed: usize,
    pub records_prepared: usize,
    pub records_stored: usize,
}

impl BatchSummary {
    pub fn merge(&mut self, other: &BatchSummary) {
        self.events_total += other.events_total;
        self.events_processed += other.events_processed;
        self.events_failed += other.events_failed;
        self.records_prepared += other.records_prepared;
        self.records_stored += other.records_stored;
    }

    pub fn duplicates(&self) -> usize {
        self.records_prepared.saturating_sub(self.records_stored)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventOutcome {
    pub records_prepared: usize,
    pub records_stored: usize,
}

/// Turns raw events into priced, deduplicated usage records.
pub struct UsageProcessor {
    catalog: Arc<dyn CatalogRepository>,
    usage: Arc<dyn UsageRecordRepository>,
    curve: Arc<dyn CostCurve>,
    permits: Arc<Semaphore>,
}

impl UsageProcessor {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        usage: Arc<dyn UsageRecordRepository>,
        curve: Arc<dyn CostCurve>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            catalog,
            usage,
            curve,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Records the event produces across every matching subscription line item.
    pub async fn prepare_records(&self, event: &Event) -> Result<Vec<ProcessedUsageRecord>> {
        let Some(customer) = self
            .catalog
            .find_customer(&event.tenant_id, &event.environment_id, &event.external_customer_id)
            .await?
        else {
            debug!(
                "No customer {} for event {}, skipping",
                event.external_customer_id, event.id
            );
            return Ok(Vec::new());
        };

        let subscriptions: Vec<Subscription> = self
            .catalog
            .active_subscriptions(&customer.id)
            .await?
            .into_iter()
            .filter(|s| s.accepts_event_at(event.timestamp))
            .collect();
        if subscriptions.is_empty() {
            debug!(
                "Customer {} has no subscription valid at {} for event {}",
                customer.id, event.timestamp, event.id
            );
            return Ok(Vec::new());
        }

        let price_ids: BTreeSet<String> = subscriptions
            .iter()
            .flat_map(|s| active_usage_items(s, event))
            .map(|item| item.price_id.clone())
            .collect();
        if price_ids.is_empty() {
            return Ok(Vec::new());
        }

        let price_ids: Vec<String> = price_ids.into_iter().collect();
        let prices: HashMap<String, Price> = self
            .catalog
            .prices_by_ids(&price_ids)
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let meter_ids: Vec<String> = prices
            .values()
            .filter_map(|p| p.meter_id().map(str::to_string))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let meters: HashMap<String, Meter> = self
            .catalog
            .meters_by_ids(&meter_ids)
            .await?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();

        let mut records = Vec::new();
        for subscription in &subscriptions {
            let items: HashMap<&str, &SubscriptionLineItem> = active_usage_items(subscription, event)
                .map(|item| (item.price_id.as_str(), item))
                .collect();
            let mut candidates: Vec<&Price> = items
                .keys()
                .filter_map(|price_id| prices.get(*price_id))
                .collect();
            candidates.sort_by(|a, b| a.id.cmp(&b.id));

            let matches = match_event(event, candidates, &meters);
            if matches.is_empty() {
                continue;
            }

            let period_id = subscription.period_id_for(event.timestamp)?;

            for found in matches {
                let Some(line_item) = items.get(found.price.id.as_str()) else {
                    continue;
                };

                if !is_supported(found.meter, found.price) {
                    debug!(
                        "Skipping price {} on event {}: {} x {} is not rated per event",
                        found.price.id,
                        event.id,
                        found.meter.aggregation.aggregation_type,
                        found.price.billing_model
                    );
                    continue;
                }

                records.push(self.build_record(
                    event,
                    &customer.id,
                    subscription,
                    line_item,
                    found.price,
                    found.meter,
                    period_id,
                )?);
            }
        }

        Ok(records)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_record(
        &self,
        event: &Event,
        customer_id: &str,
        subscription: &Subscription,
        line_item: &SubscriptionLineItem,
        price: &Price,
        meter: &Meter,
        period_id: u64,
    ) -> Result<ProcessedUsageRecord> {
        let extracted = extract_quantity(event, meter);
        let quantity = extracted.quantity;
        let cost = self.curve.calculate_cost(price, quantity)?;
        let unit_cost = if quantity.is_zero() {
            Decimal::ZERO
        } else {
            cost.checked_div(quantity).unwrap_or(Decimal::ZERO)
        };

        Ok(ProcessedUsageRecord {
            event_id: event.id.clone(),
            tenant_id: event.tenant_id.clone(),
            environment_id: event.environment_id.clone(),
            customer_id: customer_id.to_string(),
            subscription_id: subscription.id.clone(),
            line_item_id: line_item.id.clone(),
            price_id: price.id.clone(),
            meter_id: meter.id.clone(),
            event_name: event.event_name.clone(),
            timestamp: event.timestamp,
            period_id,
            unique_hash: generate_unique_hash(event, meter),
            quantity_total: quantity,
            quantity_billable: quantity,
            unit_cost,
            cost,
            currency: price.currency.clone(),
            sign: if quantity.is_zero() { 0 } else { 1 },
            processed_at: Utc::now(),
        })
    }

    /// Prepare and store the records of one event.
    pub async fn process_event(&self, event: &Event) -> Result<EventOutcome> {
        let records = self.prepare_records(event).await?;
        let prepared = records.len();
        if prepared == 0 {
            return Ok(EventOutcome::default());
        }

        let stored = self.usage.insert_records(records).await?;
        if stored < prepared {
            debug!(
                "Event {} produced {} records, {} already present",
                event.id,
                prepared,
                prepared - stored
            );
        }

        Ok(EventOutcome {
            records_prepared: prepared,
            records_stored: stored,
        })
    }

    /// Process events concurrently, bounded by the configured limit. A failing
    /// event is logged and counted without affecting the rest of the batch.
    pub async fn process_batch(&self, events: &[Event]) -> BatchSummary {
        let tasks = events.iter().map(|event| async move {
            let _permit = self.permits.acquire().await.map_err(|e| BillingError::LookupError {
                operation: "acquire_processing_permit".to_string(),
                source: Box::new(e),
            })?;
            self.process_event(event).await
        });

        let results = futures::future::join_all(tasks).await;

        let mut summary = BatchSummary {
            events_total: events.len(),
            ..BatchSummary::default()
        };
        for (event, result) in events.iter().zip(results) {
            match result {
                Ok(outcome) => {
                    summary.events_processed += 1;
                    summary.records_prepared += outcome.records_prepared;
                    summary.records_stored += outcome.records_stored;
                }
                Err(e) if e.is_validation() => {
                    warn!("Event {} rejected: {}", event.id, e);
                    summary.events_failed += 1;
                }
                Err(e) => {
                    error!("Failed to process event {}: {}", event.id, e);
                    summary.events_failed += 1;
                }
            }
        }

        info!(
            "Processed batch of {} events: {} ok, {} failed, {} records stored ({} duplicates)",
            summary.events_total,
            summary.events_processed,
            summary.events_failed,
            summary.records_stored,
            summary.duplicates()
        );

        summary
    }
}

fn active_usage_items<'s>(
    subscription: &'s Subscription,
    event: &'s Event,
) -> impl Iterator<Item = &'s SubscriptionLineItem> + 's {
    subscription
        .line_items
        .iter()
        .filter(move |item| item.is_usage() && item.is_active(event.timestamp))
}

fn is_supported(meter: &Meter, price: &Price) -> bool {
    meter.aggregation.aggregation_type.is_per_event_supported()
        && matches!(price.billing_model, BillingModel::FlatFee)
}
