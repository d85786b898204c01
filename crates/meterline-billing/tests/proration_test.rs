mod common;

use common::{fixed_price, line_item_for, subscription, ts, usage_price};
use meterline_billing::domain::{
    BillingCadence, FlatFeeCurve, InvoiceCadence, PlanChangeType, PriceBook, ProrationAction,
    ProrationBehavior, ProrationCalculator, ProrationDefaults, ProrationParams, ProrationStrategy,
    Subscription, TransactionType,
};
use meterline_billing::BillingError;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn price_book() -> PriceBook {
    let mut setup = fixed_price("p_setup", dec!(50), InvoiceCadence::Advance);
    setup.billing_cadence = BillingCadence::Onetime;

    PriceBook::new([
        fixed_price("p_basic", dec!(31), InvoiceCadence::Advance),
        fixed_price("p_pro", dec!(62), InvoiceCadence::Advance),
        fixed_price("p_basic_arrear", dec!(31), InvoiceCadence::Arrear),
        setup,
        usage_price("p_calls", "m_calls", dec!(0.01)),
    ])
}

fn calculator(defaults: ProrationDefaults) -> ProrationCalculator {
    ProrationCalculator::new(Arc::new(price_book()), Arc::new(FlatFeeCurve), defaults)
}

/// March 2024 subscription whose current period runs 2024-03-01 to 2024-03-31.
fn march_subscription() -> Subscription {
    let book = price_book();
    let item = |id: &str, price_id: &str, quantity: Decimal| {
        line_item_for(id, "sub_1", book.get(price_id).unwrap(), quantity)
    };

    let mut sub = subscription(
        "sub_1",
        "cust_1",
        vec![
            item("li_basic", "p_basic", Decimal::ONE),
            item("li_arrear", "p_basic_arrear", Decimal::ONE),
            item("li_setup", "p_setup", Decimal::ONE),
            item("li_calls", "p_calls", Decimal::ZERO),
        ],
    );
    sub.current_period_end = ts(2024, 3, 31, 0);
    sub
}

fn run(params: ProrationParams) -> meterline_billing::Result<Option<meterline_billing::domain::ProrationResult>> {
    calculator(ProrationDefaults::default()).calculate(&march_subscription(), &params)
}

#[test]
fn test_plan_upgrade_credits_used_share_and_charges_new_price() {
    let params = ProrationParams::new(ProrationAction::PlanChange, ts(2024, 3, 11, 0))
        .line_item("li_basic")
        .new_price("p_pro");

    let result = run(params).unwrap().expect("proration enabled");

    assert_eq!(result.credits.len(), 1);
    assert_eq!(result.credits[0].price_id, "p_basic");
    assert_eq!(result.credits[0].amount, dec!(11));
    assert_eq!(result.credits[0].transaction_type, TransactionType::Credit);
    assert_eq!(result.credits[0].plan_change_type, Some(PlanChangeType::Upgrade));

    assert_eq!(result.charges.len(), 1);
    assert_eq!(result.charges[0].price_id, "p_pro");
    assert_eq!(result.charges[0].amount, dec!(22));
    assert_eq!(result.charges[0].transaction_type, TransactionType::Debit);

    assert_eq!(result.net_amount, dec!(11));
    assert_eq!(result.currency, "usd");
    assert_eq!(result.line_item_id.as_deref(), Some("li_basic"));
    assert_eq!(result.current_period_start, ts(2024, 3, 1, 0));
    assert_eq!(result.current_period_end, ts(2024, 3, 31, 0));
}

#[test]
fn test_plan_change_type_compares_daily_unit_cost() {
    let book = price_book();
    let calc = calculator(ProrationDefaults::default());
    let basic = book.get("p_basic").unwrap();
    let pro = book.get("p_pro").unwrap();

    assert_eq!(calc.plan_change_type(basic, pro).unwrap(), PlanChangeType::Upgrade);
    assert_eq!(calc.plan_change_type(pro, basic).unwrap(), PlanChangeType::Downgrade);
    assert_eq!(calc.plan_change_type(basic, basic).unwrap(), PlanChangeType::NoChange);
}

#[test]
fn test_arrear_quantity_change_debits_remaining_share() {
    let params = ProrationParams::new(ProrationAction::QuantityChange, ts(2024, 3, 11, 0))
        .line_item("li_arrear")
        .quantities(None, Some(dec!(3)));

    let result = run(params).unwrap().expect("proration enabled");

    assert!(result.credits.is_empty());
    let amounts: Vec<Decimal> = result.charges.iter().map(|l| l.amount).collect();
    assert_eq!(amounts, vec![dec!(21), dec!(63)]);
    assert_eq!(result.charges[0].quantity, Decimal::ONE);
    assert_eq!(result.charges[1].quantity, dec!(3));
    assert_eq!(result.net_amount, dec!(84));
}

#[test]
fn test_add_item_in_advance_is_charged_now() {
    let params = ProrationParams::new(ProrationAction::AddItem, ts(2024, 3, 11, 0))
        .new_price("p_pro")
        .quantities(None, Some(dec!(2)));

    let result = run(params).unwrap().expect("proration enabled");

    assert_eq!(result.charges.len(), 1);
    assert_eq!(result.charges[0].amount, dec!(44));
    assert_eq!(result.charges[0].plan_change_type, None);
    assert_eq!(result.net_amount, dec!(44));
}

#[test]
fn test_add_item_in_arrear_leaves_zero_placeholder() {
    let params = ProrationParams::new(ProrationAction::AddItem, ts(2024, 3, 11, 0)).new_price("p_basic_arrear");

    let result = run(params).unwrap().expect("proration enabled");

    assert_eq!(result.charges.len(), 1);
    assert_eq!(result.charges[0].amount, Decimal::ZERO);
    assert_eq!(result.charges[0].quantity, Decimal::ONE);
    assert_eq!(result.net_amount, Decimal::ZERO);
}

#[test]
fn test_remove_item_credits_advance_line() {
    let params = ProrationParams::new(ProrationAction::RemoveItem, ts(2024, 3, 11, 0)).line_item("li_basic");

    let result = run(params).unwrap().expect("proration enabled");

    assert!(result.charges.is_empty());
    assert_eq!(result.credits.len(), 1);
    assert_eq!(result.credits[0].amount, dec!(11));
    assert_eq!(result.net_amount, dec!(-11));
}

#[test]
fn test_cancellation_covers_only_fixed_recurring_items() {
    let params = ProrationParams::new(ProrationAction::Cancellation, ts(2024, 3, 11, 0));

    let result = run(params).unwrap().expect("proration enabled");

    let credited: Vec<&str> = result.credits.iter().map(|l| l.price_id.as_str()).collect();
    let charged: Vec<&str> = result.charges.iter().map(|l| l.price_id.as_str()).collect();
    assert_eq!(credited, vec!["p_basic"]);
    assert_eq!(charged, vec!["p_basic_arrear"]);
    assert_eq!(result.credits[0].amount, dec!(11));
    assert_eq!(result.charges[0].amount, dec!(21));
    assert_eq!(result.net_amount, dec!(10));
}

#[test]
fn test_disabled_behavior_returns_nothing() {
    let params = ProrationParams::new(ProrationAction::RemoveItem, ts(2024, 3, 11, 0))
        .line_item("li_basic")
        .behavior(ProrationBehavior::None);
    assert!(run(params).unwrap().is_none());

    let disabled = calculator(ProrationDefaults {
        strategy: ProrationStrategy::DayBased,
        behavior: ProrationBehavior::None,
    });
    let params = ProrationParams::new(ProrationAction::Cancellation, ts(2024, 3, 11, 0));
    assert!(disabled.calculate(&march_subscription(), &params).unwrap().is_none());

    let params = ProrationParams::new(ProrationAction::Cancellation, ts(2024, 3, 11, 0))
        .behavior(ProrationBehavior::CreateProrations);
    assert!(disabled.calculate(&march_subscription(), &params).unwrap().is_some());
}

#[test]
fn test_invalid_requests_are_rejected() {
    let at = ts(2024, 3, 11, 0);

    let outside = ProrationParams::new(ProrationAction::RemoveItem, ts(2024, 4, 2, 0)).line_item("li_basic");
    assert!(matches!(run(outside), Err(BillingError::ValidationError { ref field, .. }) if field == "proration_date"));

    let unknown_item = ProrationParams::new(ProrationAction::RemoveItem, at).line_item("li_missing");
    assert!(matches!(run(unknown_item), Err(BillingError::LineItemNotFound { .. })));

    let usage_item = ProrationParams::new(ProrationAction::RemoveItem, at).line_item("li_calls");
    assert!(matches!(run(usage_item), Err(BillingError::ValidationError { .. })));

    let no_item = ProrationParams::new(ProrationAction::QuantityChange, at).quantities(None, Some(dec!(2)));
    assert!(matches!(run(no_item), Err(BillingError::ValidationError { ref field, .. }) if field == "line_item_id"));

    let no_new_price = ProrationParams::new(ProrationAction::PlanChange, at).line_item("li_basic");
    assert!(matches!(run(no_new_price), Err(BillingError::ValidationError { ref field, .. }) if field == "new_price_id"));

    let onetime_target = ProrationParams::new(ProrationAction::PlanChange, at)
        .line_item("li_basic")
        .new_price("p_setup");
    assert!(matches!(run(onetime_target), Err(BillingError::ValidationError { .. })));

    let missing_price = ProrationParams::new(ProrationAction::AddItem, at).new_price("p_gone");
    assert!(matches!(run(missing_price), Err(BillingError::PriceNotFound { .. })));

    let no_quantity = ProrationParams::new(ProrationAction::QuantityChange, at).line_item("li_basic");
    assert!(matches!(run(no_quantity), Err(BillingError::ValidationError { ref field, .. }) if field == "new_quantity"));

    let negative = ProrationParams::new(ProrationAction::QuantityChange, at)
        .line_item("li_basic")
        .quantities(None, Some(dec!(-1)));
    assert!(matches!(run(negative), Err(BillingError::ValidationError { .. })));
}

#[test]
fn test_empty_current_period_is_invalid() {
    let mut sub = march_subscription();
    sub.current_period_end = sub.current_period_start;
    let params = ProrationParams::new(ProrationAction::Cancellation, sub.current_period_start);

    let result = calculator(ProrationDefaults::default()).calculate(&sub, &params);
    assert!(matches!(result, Err(BillingError::InvalidPeriod { .. })));
}

proptest! {
    #[test]
    fn prop_midpoint_quantity_change_nets_half_the_difference(
        amount_cents in 100i64..1_000_000,
        old_quantity in 1u32..50,
        new_quantity in 1u32..50,
    ) {
        let amount = Decimal::new(amount_cents, 2);
        let mut book = price_book();
        book.insert(fixed_price("p_seat", amount, InvoiceCadence::Advance));
        let calc = ProrationCalculator::new(Arc::new(book), Arc::new(FlatFeeCurve), ProrationDefaults::default());

        let mut sub = march_subscription();
        let seat = fixed_price("p_seat", amount, InvoiceCadence::Advance);
        sub.line_items.push(line_item_for("li_seat", "sub_1", &seat, Decimal::from(old_quantity)));

        // 2024-03-01 to 2024-03-31 is 30 days, so the 16th is the exact midpoint
        let params = ProrationParams::new(ProrationAction::QuantityChange, ts(2024, 3, 16, 0))
            .line_item("li_seat")
            .quantities(None, Some(Decimal::from(new_quantity)))
            .strategy(ProrationStrategy::SecondBased);
        let result = calc.calculate(&sub, &params).unwrap().unwrap();

        let expected = (amount * Decimal::from(new_quantity) - amount * Decimal::from(old_quantity)) / dec!(2);
        prop_assert!((result.net_amount - expected).abs() <= dec!(0.01));
    }
}
