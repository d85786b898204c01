use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a meter folds event properties into a quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationType {
    Count,
    Sum,
    Avg,
    CountUnique,
    Latest,
    SumWithMultiplier,
    Max,
    WeightedSum,
}

impl AggregationType {
    /// Aggregations the per-event quantity extractor can produce a value for.
    pub fn is_per_event_supported(&self) -> bool {
        matches!(self, AggregationType::Count | AggregationType::Sum)
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregationType::Count => "COUNT",
            AggregationType::Sum => "SUM",
            AggregationType::Avg => "AVG",
            AggregationType::CountUnique => "COUNT_UNIQUE",
            AggregationType::Latest => "LATEST",
            AggregationType::SumWithMultiplier => "SUM_WITH_MULTIPLIER",
            AggregationType::Max => "MAX",
            AggregationType::WeightedSum => "WEIGHTED_SUM",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceType {
    Usage,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCadence {
    Recurring,
    Onetime,
}

/// When a price is invoiced relative to the period it covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceCadence {
    Advance,
    Arrear,
}

impl fmt::Display for InvoiceCadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceCadence::Advance => write!(f, "ADVANCE"),
            InvoiceCadence::Arrear => write!(f, "ARREAR"),
        }
    }
}

/// Recurring billing interval of a price or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingPeriod {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    HalfYearly,
    Annual,
}

impl BillingPeriod {
    /// Nominal day count of one interval, used to compare prices on a per-day basis.
    pub fn nominal_days(&self) -> u32 {
        match self {
            BillingPeriod::Daily => 1,
            BillingPeriod::Weekly => 7,
            BillingPeriod::Monthly => 30,
            BillingPeriod::Quarterly => 90,
            BillingPeriod::HalfYearly => 180,
            BillingPeriod::Annual => 365,
        }
    }

    /// Shift `anchor` by `steps` intervals of `count` periods each. Calendar
    /// periods are computed from the anchor every time so month-end days do not drift.
    pub fn shift(&self, anchor: DateTime<Utc>, count: u32, steps: i64) -> Option<DateTime<Utc>> {
        let count = i64::from(count.max(1));
        let months_per_period = match self {
            BillingPeriod::Daily => return anchor.checked_add_signed(Duration::days(count * steps)),
            BillingPeriod::Weekly => {
                return anchor.checked_add_signed(Duration::weeks(count * steps))
            }
            BillingPeriod::Monthly => 1,
            BillingPeriod::Quarterly => 3,
            BillingPeriod::HalfYearly => 6,
            BillingPeriod::Annual => 12,
        };

        let months = months_per_period * count * steps;
        let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
        if months >= 0 {
            anchor.checked_add_months(magnitude)
        } else {
            anchor.checked_sub_months(magnitude)
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BillingPeriod::Daily => "DAILY",
            BillingPeriod::Weekly => "WEEKLY",
            BillingPeriod::Monthly => "MONTHLY",
            BillingPeriod::Quarterly => "QUARTERLY",
            BillingPeriod::HalfYearly => "HALF_YEARLY",
            BillingPeriod::Annual => "ANNUAL",
        };
        write!(f, "{}", name)
    }
}

/// Subscription lifecycle states relevant to usage processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Paused,
    Cancelled,
    Incomplete,
}

impl SubscriptionStatus {
    /// Statuses whose line items accrue usage.
    pub fn accrues_usage(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

/// Direction of money on a proration line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Debit,
    Credit,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Debit => write!(f, "DEBIT"),
            TransactionType::Credit => write!(f, "CREDIT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_billing_period_shift_keeps_month_end_anchor() {
        let anchor = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();

        let feb = BillingPeriod::Monthly.shift(anchor, 1, 1).unwrap();
        assert_eq!(feb, Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap());

        let mar = BillingPeriod::Monthly.shift(anchor, 1, 2).unwrap();
        assert_eq!(mar, Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap());

        let dec = BillingPeriod::Monthly.shift(anchor, 1, -1).unwrap();
        assert_eq!(dec, Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_billing_period_shift_fixed_intervals() {
        let anchor = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            BillingPeriod::Weekly.shift(anchor, 2, 1).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
        );
        assert_eq!(
            BillingPeriod::Daily.shift(anchor, 1, -3).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 27, 12, 0, 0).unwrap()
        );
        assert_eq!(
            BillingPeriod::Quarterly.shift(anchor, 1, 1).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_nominal_days() {
        assert_eq!(BillingPeriod::Monthly.nominal_days(), 30);
        assert_eq!(BillingPeriod::Annual.nominal_days(), 365);
    }

    #[test]
    fn test_usage_accruing_statuses() {
        assert!(SubscriptionStatus::Active.accrues_usage());
        assert!(SubscriptionStatus::Trialing.accrues_usage());
        assert!(!SubscriptionStatus::Cancelled.accrues_usage());
    }
}
