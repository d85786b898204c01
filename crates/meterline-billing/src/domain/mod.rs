pub mod buckets;
pub mod catalog;
pub mod commitment;
pub mod events;
pub mod matcher;
pub mod pricing;
pub mod property;
pub mod proration;
pub mod quantity;
pub mod types;

pub use buckets::{align_start, expected_starts, fill_bucketed_usage, next_start, WindowSize};
pub use catalog::{
    Aggregation, BillingModel, Commitment, CommitmentKind, CommitmentType, Customer, Meter,
    MeterFilter, Price, Subscription, SubscriptionLineItem,
};
pub use commitment::{CommitmentCalculator, CommitmentInfo, CommitmentOutcome};
pub use events::{BucketUsage, Event, PeriodKey, PeriodMeterTotal, ProcessedUsageRecord};
pub use matcher::{match_event, MatchResult};
pub use pricing::{CostCurve, FlatFeeCurve, PriceBook};
pub use property::{Properties, PropertyValue};
pub use proration::{
    PlanChangeType, ProrationAction, ProrationBehavior, ProrationCalculator, ProrationDefaults,
    ProrationLineItem, ProrationParams, ProrationResult, ProrationStrategy,
};
pub use quantity::{extract_quantity, generate_unique_hash, ExtractedQuantity};
pub use types::{
    AggregationType, BillingCadence, BillingPeriod, InvoiceCadence, PriceType, SubscriptionStatus,
    TransactionType,
};
