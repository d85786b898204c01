use crate::domain::property::{Properties, PropertyValue};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw usage fact as received from ingestion. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub tenant_id: String,
    pub environment_id: String,
    pub event_name: String,
    pub external_customer_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub properties: Properties,
}

impl Event {
    pub fn new(
        event_name: impl Into<String>,
        external_customer_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: String::new(),
            environment_id: String::new(),
            event_name: event_name.into(),
            external_customer_id: external_customer_id.into(),
            timestamp,
            properties: Properties::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_scope(mut self, tenant_id: impl Into<String>, environment_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self.environment_id = environment_id.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

/// One quantified, priced usage record per (event, matched line item)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedUsageRecord {
    pub event_id: String,
    pub tenant_id: String,
    pub environment_id: String,
    pub customer_id: String,
    pub subscription_id: String,
    pub line_item_id: String,
    pub price_id: String,
    pub meter_id: String,
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
    /// Epoch milliseconds of the billing period start containing the event
    pub period_id: u64,
    pub unique_hash: String,
    pub quantity_total: Decimal,
    pub quantity_billable: Decimal,
    pub unit_cost: Decimal,
    pub cost: Decimal,
    pub currency: String,
    /// 0 for zero-quantity records, 1 otherwise
    pub sign: i8,
    pub processed_at: DateTime<Utc>,
}

/// Index key processed records are queried by
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodKey {
    pub tenant_id: String,
    pub environment_id: String,
    pub customer_id: String,
    pub subscription_id: String,
    pub period_id: u64,
}

impl PeriodKey {
    pub fn matches(&self, record: &ProcessedUsageRecord) -> bool {
        self.tenant_id == record.tenant_id
            && self.environment_id == record.environment_id
            && self.customer_id == record.customer_id
            && self.subscription_id == record.subscription_id
            && self.period_id == record.period_id
    }
}

impl From<&ProcessedUsageRecord> for PeriodKey {
    fn from(record: &ProcessedUsageRecord) -> Self {
        Self {
            tenant_id: record.tenant_id.clone(),
            environment_id: record.environment_id.clone(),
            customer_id: record.customer_id.clone(),
            subscription_id: record.subscription_id.clone(),
            period_id: record.period_id,
        }
    }
}

/// Per-meter totals inside one billing period
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodMeterTotal {
    pub meter_id: String,
    pub price_id: String,
    pub line_item_id: String,
    pub quantity: Decimal,
    pub cost: Decimal,
    pub event_count: u64,
}

/// Usage value for one window, as returned by an aggregation source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketUsage {
    pub window_start: DateTime<Utc>,
    pub value: Decimal,
}

impl BucketUsage {
    pub fn new(window_start: DateTime<Utc>, value: Decimal) -> Self {
        Self { window_start, value }
    }
}
