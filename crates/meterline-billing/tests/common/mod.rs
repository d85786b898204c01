#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use meterline_billing::domain::{
    Aggregation, AggregationType, BillingCadence, BillingModel, BillingPeriod, Customer,
    InvoiceCadence, Meter, Price, PriceType, Subscription, SubscriptionLineItem,
    SubscriptionStatus,
};
use meterline_billing::storage::InMemoryCatalog;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const TENANT: &str = "tenant_1";
pub const ENVIRONMENT: &str = "prod";

pub fn ts(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

pub fn usage_price(id: &str, meter_id: &str, amount: Decimal) -> Price {
    Price {
        id: id.to_string(),
        meter_id: Some(meter_id.to_string()),
        price_type: PriceType::Usage,
        billing_model: BillingModel::FlatFee,
        billing_cadence: BillingCadence::Recurring,
        invoice_cadence: InvoiceCadence::Arrear,
        billing_period: BillingPeriod::Monthly,
        billing_period_count: 1,
        amount,
        currency: "usd".to_string(),
    }
}

pub fn fixed_price(id: &str, amount: Decimal, cadence: InvoiceCadence) -> Price {
    Price {
        id: id.to_string(),
        meter_id: None,
        price_type: PriceType::Fixed,
        billing_model: BillingModel::FlatFee,
        billing_cadence: BillingCadence::Recurring,
        invoice_cadence: cadence,
        billing_period: BillingPeriod::Monthly,
        billing_period_count: 1,
        amount,
        currency: "usd".to_string(),
    }
}

pub fn line_item_for(id: &str, subscription_id: &str, price: &Price, quantity: Decimal) -> SubscriptionLineItem {
    SubscriptionLineItem {
        id: id.to_string(),
        subscription_id: subscription_id.to_string(),
        price_id: price.id.clone(),
        price_type: price.price_type,
        meter_id: price.meter_id.clone(),
        invoice_cadence: price.invoice_cadence,
        quantity,
        start_date: ts(2024, 1, 1, 0),
        end_date: None,
        commitment: None,
    }
}

/// Monthly subscription started 2024-01-01, currently in the March 2024 period.
pub fn subscription(id: &str, customer_id: &str, line_items: Vec<SubscriptionLineItem>) -> Subscription {
    Subscription {
        id: id.to_string(),
        tenant_id: TENANT.to_string(),
        environment_id: ENVIRONMENT.to_string(),
        customer_id: customer_id.to_string(),
        currency: "usd".to_string(),
        status: SubscriptionStatus::Active,
        start_date: ts(2024, 1, 1, 0),
        end_date: None,
        cancelled_at: None,
        current_period_start: ts(2024, 3, 1, 0),
        current_period_end: ts(2024, 4, 1, 0),
        billing_anchor: None,
        billing_period: BillingPeriod::Monthly,
        billing_period_count: 1,
        line_items,
    }
}

pub fn customer(id: &str, external_id: &str) -> Customer {
    Customer {
        id: id.to_string(),
        tenant_id: TENANT.to_string(),
        environment_id: ENVIRONMENT.to_string(),
        external_id: external_id.to_string(),
    }
}

/// Catalog with one customer (`acme`) subscribed to three metered prices:
/// API calls (COUNT), gpt-4o tokens (SUM, filtered) and unique logins (COUNT_UNIQUE).
pub async fn seeded_catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();

    catalog
        .add_meter(Meter::new("m_calls", "api_call", Aggregation::count()))
        .await;
    catalog
        .add_meter(
            Meter::new(
                "m_tokens",
                "llm_usage",
                Aggregation::on_field(AggregationType::Sum, "tokens"),
            )
            .with_filter("model", &["gpt-4o"]),
        )
        .await;
    catalog
        .add_meter(Meter::new(
            "m_logins",
            "login",
            Aggregation::on_field(AggregationType::CountUnique, "user_id"),
        ))
        .await;

    let calls = usage_price("p_calls", "m_calls", dec!(0.01));
    let tokens = usage_price("p_tokens", "m_tokens", dec!(0.002));
    let logins = usage_price("p_logins", "m_logins", dec!(1));

    let items = vec![
        line_item_for("li_calls", "sub_acme", &calls, Decimal::ZERO),
        line_item_for("li_tokens", "sub_acme", &tokens, Decimal::ZERO),
        line_item_for("li_logins", "sub_acme", &logins, Decimal::ZERO),
    ];

    for price in [calls, tokens, logins] {
        catalog.add_price(price).await;
    }
    catalog.add_customer(customer("cust_acme", "acme")).await;
    catalog
        .add_subscription(subscription("sub_acme", "cust_acme", items))
        .await;

    catalog
}
