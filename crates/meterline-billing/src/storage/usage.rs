use crate::domain::events::{PeriodKey, PeriodMeterTotal, ProcessedUsageRecord};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait UsageRecordRepository: Send + Sync {
    /// Store records, skipping any whose `(line_item_id, unique_hash)` was seen before.
    /// Returns how many records were newly stored.
    async fn insert_records(&self, records: Vec<ProcessedUsageRecord>) -> Result<usize>;

    /// Total cost of all records in the period.
    async fn period_cost(&self, key: &PeriodKey) -> Result<Decimal>;

    /// Billable quantity and cost per meter in the period, ordered by meter then line item.
    async fn period_meter_totals(&self, key: &PeriodKey) -> Result<Vec<PeriodMeterTotal>>;

    async fn records_for_period(&self, key: &PeriodKey) -> Result<Vec<ProcessedUsageRecord>>;
}

#[derive(Default)]
struct UsageState {
    records: Vec<ProcessedUsageRecord>,
    seen: HashSet<(String, String)>,
}

pub struct InMemoryUsageRepository {
    state: Arc<RwLock<UsageState>>,
}

impl InMemoryUsageRepository {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(UsageState::default())),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Distinct periods that hold at least one record.
    pub async fn period_keys(&self) -> Vec<PeriodKey> {
        let state = self.state.read().await;
        let mut keys: Vec<PeriodKey> = state.records.iter().map(PeriodKey::from).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

impl Default for InMemoryUsageRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageRecordRepository for InMemoryUsageRepository {
    async fn insert_records(&self, records: Vec<ProcessedUsageRecord>) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut inserted = 0;
        for record in records {
            let key = (record.line_item_id.clone(), record.unique_hash.clone());
            if state.seen.insert(key) {
                state.records.push(record);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn period_cost(&self, key: &PeriodKey) -> Result<Decimal> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|r| key.matches(r))
            .map(|r| r.cost)
            .sum())
    }

    async fn period_meter_totals(&self, key: &PeriodKey) -> Result<Vec<PeriodMeterTotal>> {
        let state = self.state.read().await;
        let mut totals: BTreeMap<(String, String), PeriodMeterTotal> = BTreeMap::new();

        for record in state.records.iter().filter(|r| key.matches(r)) {
            let total = totals
                .entry((record.meter_id.clone(), record.line_item_id.clone()))
                .or_insert_with(|| PeriodMeterTotal {
                    meter_id: record.meter_id.clone(),
                    price_id: record.price_id.clone(),
                    line_item_id: record.line_item_id.clone(),
                    quantity: Decimal::ZERO,
                    cost: Decimal::ZERO,
                    event_count: 0,
                });
            total.quantity += record.quantity_billable;
            total.cost += record.cost;
            total.event_count += 1;
        }

        Ok(totals.into_values().collect())
    }

    async fn records_for_period(&self, key: &PeriodKey) -> Result<Vec<ProcessedUsageRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|r| key.matches(r))
            .cloned()
            .collect())
    }
}
