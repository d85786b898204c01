use crate::domain::types::{
    AggregationType, BillingCadence, BillingPeriod, InvoiceCadence, PriceType, SubscriptionStatus,
};
use crate::error::{BillingError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Property filter on a meter; the property must be present and its value listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterFilter {
    pub key: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    #[serde(rename = "type")]
    pub aggregation_type: AggregationType,
    #[serde(default)]
    pub field: String,
}

impl Aggregation {
    pub fn count() -> Self {
        Self {
            aggregation_type: AggregationType::Count,
            field: String::new(),
        }
    }

    pub fn on_field(aggregation_type: AggregationType, field: impl Into<String>) -> Self {
        Self {
            aggregation_type,
            field: field.into(),
        }
    }
}

/// Billable metric definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub id: String,
    pub event_name: String,
    #[serde(default)]
    pub name: String,
    pub aggregation: Aggregation,
    #[serde(default)]
    pub filters: Vec<MeterFilter>,
}

impl Meter {
    pub fn new(id: impl Into<String>, event_name: impl Into<String>, aggregation: Aggregation) -> Self {
        Self {
            id: id.into(),
            event_name: event_name.into(),
            name: String::new(),
            aggregation,
            filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, values: &[&str]) -> Self {
        self.filters.push(MeterFilter {
            key: key.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierMode {
    Volume,
    Slab,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTier {
    /// Inclusive upper bound of the tier; `None` for the last tier
    pub up_to: Option<u64>,
    pub unit_amount: Decimal,
    #[serde(default)]
    pub flat_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageRounding {
    Up,
    Down,
}

/// Price shape; the cost curve for each model lives behind [`crate::domain::pricing::CostCurve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingModel {
    FlatFee,
    Tiered {
        mode: TierMode,
        tiers: Vec<PriceTier>,
    },
    Package {
        divide_by: u64,
        round: PackageRounding,
    },
}

impl fmt::Display for BillingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingModel::FlatFee => write!(f, "FLAT_FEE"),
            BillingModel::Tiered { .. } => write!(f, "TIERED"),
            BillingModel::Package { .. } => write!(f, "PACKAGE"),
        }
    }
}

/// Billing rule, optionally attached to a meter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub id: String,
    #[serde(default)]
    pub meter_id: Option<String>,
    pub price_type: PriceType,
    pub billing_model: BillingModel,
    pub billing_cadence: BillingCadence,
    pub invoice_cadence: InvoiceCadence,
    pub billing_period: BillingPeriod,
    #[serde(default = "default_period_count")]
    pub billing_period_count: u32,
    /// Unit amount in main currency units
    pub amount: Decimal,
    pub currency: String,
}

fn default_period_count() -> u32 {
    1
}

impl Price {
    /// Usage-priced with a non-empty meter reference.
    pub fn is_usage(&self) -> bool {
        self.price_type == PriceType::Usage && self.meter_id().is_some()
    }

    pub fn meter_id(&self) -> Option<&str> {
        self.meter_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn is_fixed_recurring(&self) -> bool {
        self.price_type == PriceType::Fixed && self.billing_cadence == BillingCadence::Recurring
    }

    pub fn days_in_billing_interval(&self) -> u32 {
        self.billing_period.nominal_days() * self.billing_period_count.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitmentType {
    Amount,
    Quantity,
}

/// What the customer committed to, in the unit it was agreed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitmentKind {
    Amount { amount: Decimal },
    Quantity { quantity: Decimal },
}

impl CommitmentKind {
    pub fn commitment_type(&self) -> CommitmentType {
        match self {
            CommitmentKind::Amount { .. } => CommitmentType::Amount,
            CommitmentKind::Quantity { .. } => CommitmentType::Quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    #[serde(flatten)]
    pub kind: CommitmentKind,
    #[serde(default = "default_overage_factor")]
    pub overage_factor: Decimal,
    #[serde(default)]
    pub true_up_enabled: bool,
    /// Evaluate the commitment per usage window instead of per period
    #[serde(default)]
    pub windowed: bool,
}

fn default_overage_factor() -> Decimal {
    Decimal::ONE
}

impl Commitment {
    pub fn amount(amount: Decimal) -> Self {
        Self {
            kind: CommitmentKind::Amount { amount },
            overage_factor: Decimal::ONE,
            true_up_enabled: false,
            windowed: false,
        }
    }

    pub fn quantity(quantity: Decimal) -> Self {
        Self {
            kind: CommitmentKind::Quantity { quantity },
            overage_factor: Decimal::ONE,
            true_up_enabled: false,
            windowed: false,
        }
    }

    pub fn with_overage_factor(mut self, factor: Decimal) -> Self {
        self.overage_factor = factor;
        self
    }

    pub fn with_true_up(mut self, enabled: bool) -> Self {
        self.true_up_enabled = enabled;
        self
    }

    pub fn windowed(mut self) -> Self {
        self.windowed = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        match self.kind {
            CommitmentKind::Amount { amount } if amount.is_sign_negative() && !amount.is_zero() => {
                return Err(BillingError::validation(
                    "commitment.amount",
                    "commitment amount cannot be negative",
                ));
            }
            CommitmentKind::Quantity { quantity }
                if quantity.is_sign_negative() && !quantity.is_zero() =>
            {
                return Err(BillingError::validation(
                    "commitment.quantity",
                    "commitment quantity cannot be negative",
                ));
            }
            _ => {}
        }

        if self.overage_factor < Decimal::ZERO {
            return Err(BillingError::validation(
                "commitment.overage_factor",
                "overage factor cannot be negative",
            ));
        }

        Ok(())
    }
}

/// Binds a subscription to a price for a date range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionLineItem {
    pub id: String,
    pub subscription_id: String,
    pub price_id: String,
    pub price_type: PriceType,
    #[serde(default)]
    pub meter_id: Option<String>,
    pub invoice_cadence: InvoiceCadence,
    pub quantity: Decimal,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub commitment: Option<Commitment>,
}

impl SubscriptionLineItem {
    pub fn is_usage(&self) -> bool {
        self.price_type == PriceType::Usage
            && self.meter_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        at >= self.start_date && self.end_date.map_or(true, |end| at <= end)
    }

    pub fn commitment(&self) -> Result<&Commitment> {
        self.commitment
            .as_ref()
            .ok_or_else(|| BillingError::validation("commitment", format!("line item {} has no commitment", self.id)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub tenant_id: String,
    pub environment_id: String,
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub tenant_id: String,
    pub environment_id: String,
    pub customer_id: String,
    pub currency: String,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    /// Date every period boundary is derived from; the start date when unset
    #[serde(default)]
    pub billing_anchor: Option<DateTime<Utc>>,
    pub billing_period: BillingPeriod,
    #[serde(default = "default_period_count")]
    pub billing_period_count: u32,
    #[serde(default)]
    pub line_items: Vec<SubscriptionLineItem>,
}

/// Upper bound on how many periods `period_start_for` walks from the current period.
const MAX_PERIOD_STEPS: i64 = 10_000;

impl Subscription {
    pub fn line_item(&self, id: &str) -> Result<&SubscriptionLineItem> {
        self.line_items
            .iter()
            .find(|item| item.id == id)
            .ok_or_else(|| BillingError::LineItemNotFound {
                id: id.to_string(),
                subscription_id: self.id.clone(),
            })
    }

    /// Whether an event at `at` may accrue usage on this subscription.
    pub fn accepts_event_at(&self, at: DateTime<Utc>) -> bool {
        if at < self.start_date {
            return false;
        }
        if self.end_date.is_some_and(|end| at > end) {
            return false;
        }
        if self.status == SubscriptionStatus::Cancelled && self.cancelled_at.is_some_and(|c| at > c) {
            return false;
        }
        true
    }

    pub fn billing_anchor(&self) -> DateTime<Utc> {
        self.billing_anchor.unwrap_or(self.start_date)
    }

    /// Start of the billing period containing `at`.
    ///
    /// The current period is taken as given. Later periods are walked forward
    /// from `current_period_end` and earlier ones backward from
    /// `current_period_start`, with every boundary derived from the billing
    /// anchor so month-end anchors keep their day instead of drifting to the
    /// shortest month seen on the way.
    pub fn period_start_for(&self, at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if self.current_period_end <= self.current_period_start {
            return Err(BillingError::InvalidPeriod {
                message: format!(
                    "subscription {} has an empty current period",
                    self.id
                ),
            });
        }

        if at >= self.current_period_start && at < self.current_period_end {
            return Ok(self.current_period_start);
        }

        if at >= self.current_period_end {
            let mut start = self.current_period_end;
            for _ in 0..MAX_PERIOD_STEPS {
                let next = self.boundary_after(start)?;
                if at < next {
                    return Ok(start);
                }
                start = next;
            }
        } else {
            let mut end = self.current_period_start;
            for _ in 0..MAX_PERIOD_STEPS {
                let start = self.boundary_before(end)?;
                if start <= at {
                    return Ok(start.max(self.start_date));
                }
                end = start;
            }
        }

        Err(BillingError::InvalidPeriod {
            message: format!(
                "timestamp {} is too far from the current period of subscription {}",
                at, self.id
            ),
        })
    }

    fn boundary(&self, index: i64) -> Result<DateTime<Utc>> {
        self.billing_period
            .shift(self.billing_anchor(), self.billing_period_count, index)
            .ok_or_else(|| BillingError::InvalidPeriod {
                message: format!("period arithmetic overflowed for subscription {}", self.id),
            })
    }

    /// Index of the last anchor boundary at or before `t`.
    fn boundary_index_at_or_before(&self, t: DateTime<Utc>) -> Result<i64> {
        let nominal = i64::from(self.billing_period.nominal_days())
            * i64::from(self.billing_period_count.max(1));
        let mut index = (t - self.billing_anchor()).num_days().div_euclid(nominal);

        for _ in 0..MAX_PERIOD_STEPS {
            if self.boundary(index)? > t {
                index -= 1;
            } else if self.boundary(index + 1)? <= t {
                index += 1;
            } else {
                return Ok(index);
            }
        }

        Err(BillingError::InvalidPeriod {
            message: format!(
                "no billing boundary found near {} for subscription {}",
                t, self.id
            ),
        })
    }

    /// First anchor boundary strictly after `t`.
    fn boundary_after(&self, t: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let index = self.boundary_index_at_or_before(t)?;
        self.boundary(index + 1)
    }

    /// Last anchor boundary strictly before `t`.
    fn boundary_before(&self, t: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let index = self.boundary_index_at_or_before(t)?;
        let at_or_before = self.boundary(index)?;
        if at_or_before < t {
            Ok(at_or_before)
        } else {
            self.boundary(index - 1)
        }
    }

    /// Period id used to group processed usage: epoch milliseconds of the period start.
    pub fn period_id_for(&self, at: DateTime<Utc>) -> Result<u64> {
        let start = self.period_start_for(at)?;
        u64::try_from(start.timestamp_millis()).map_err(|_| BillingError::InvalidPeriod {
            message: format!("period start {} precedes the unix epoch", start),
        })
    }
}
