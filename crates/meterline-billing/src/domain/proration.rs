//! Mid-period proration for fixed recurring prices.
//!
//! Each action is a pure transform of a subscription snapshot into credit and
//! charge lines over `[current_period_start, current_period_end]`. The
//! coefficient depends on the invoice cadence: ADVANCE uses the elapsed share
//! of the period and produces credits, ARREAR uses the remaining share and
//! produces debits. Lines for a newly priced or newly added item are always
//! charges.

use crate::domain::catalog::{Price, Subscription, SubscriptionLineItem};
use crate::domain::pricing::{CostCurve, PriceBook};
use crate::domain::types::{InvoiceCadence, TransactionType};
use crate::error::{BillingError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProrationAction {
    PlanChange,
    QuantityChange,
    AddItem,
    RemoveItem,
    Cancellation,
}

impl fmt::Display for ProrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProrationAction::PlanChange => "plan_change",
            ProrationAction::QuantityChange => "quantity_change",
            ProrationAction::AddItem => "add_item",
            ProrationAction::RemoveItem => "remove_item",
            ProrationAction::Cancellation => "cancellation",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProrationStrategy {
    #[default]
    DayBased,
    SecondBased,
}

/// What the caller does with the result; `None` disables proration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProrationBehavior {
    CreateProrations,
    #[default]
    AlwaysInvoice,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanChangeType {
    Upgrade,
    Downgrade,
    NoChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationParams {
    pub action: ProrationAction,
    #[serde(default)]
    pub line_item_id: Option<String>,
    #[serde(default)]
    pub old_price_id: Option<String>,
    #[serde(default)]
    pub new_price_id: Option<String>,
    #[serde(default)]
    pub old_quantity: Option<Decimal>,
    #[serde(default)]
    pub new_quantity: Option<Decimal>,
    pub proration_date: DateTime<Utc>,
    #[serde(default)]
    pub strategy: Option<ProrationStrategy>,
    #[serde(default)]
    pub behavior: Option<ProrationBehavior>,
}

impl ProrationParams {
    pub fn new(action: ProrationAction, proration_date: DateTime<Utc>) -> Self {
        Self {
            action,
            line_item_id: None,
            old_price_id: None,
            new_price_id: None,
            old_quantity: None,
            new_quantity: None,
            proration_date,
            strategy: None,
            behavior: None,
        }
    }

    pub fn line_item(mut self, id: impl Into<String>) -> Self {
        self.line_item_id = Some(id.into());
        self
    }

    pub fn new_price(mut self, id: impl Into<String>) -> Self {
        self.new_price_id = Some(id.into());
        self
    }

    pub fn quantities(mut self, old: Option<Decimal>, new: Option<Decimal>) -> Self {
        self.old_quantity = old;
        self.new_quantity = new;
        self
    }

    pub fn strategy(mut self, strategy: ProrationStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn behavior(mut self, behavior: ProrationBehavior) -> Self {
        self.behavior = Some(behavior);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationLineItem {
    pub description: String,
    /// Always non-negative; direction is carried by `transaction_type`
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub price_id: String,
    pub quantity: Decimal,
    pub unit_amount: Decimal,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub plan_change_type: Option<PlanChangeType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationResult {
    pub credits: Vec<ProrationLineItem>,
    pub charges: Vec<ProrationLineItem>,
    /// Sum of charges minus sum of credits
    pub net_amount: Decimal,
    pub currency: String,
    pub action: ProrationAction,
    pub proration_date: DateTime<Utc>,
    pub line_item_id: Option<String>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
}

impl ProrationResult {
    fn push(&mut self, line: ProrationLineItem) {
        match line.transaction_type {
            TransactionType::Debit => self.charges.push(line),
            TransactionType::Credit => self.credits.push(line),
        }
    }

    fn settle(&mut self) {
        let charged: Decimal = self.charges.iter().map(|l| l.amount).sum();
        let credited: Decimal = self.credits.iter().map(|l| l.amount).sum();
        self.net_amount = charged - credited;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationDefaults {
    pub strategy: ProrationStrategy,
    pub behavior: ProrationBehavior,
}

/// Calendar days from `start` to `end`, both days inclusive, compared at UTC midnight.
pub fn days_between(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end.date_naive() - start.date_naive()).num_days() + 1
}

/// Prorated share of `total` and the direction it moves money in.
pub fn proportional_amount(
    total: Decimal,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    proration_date: DateTime<Utc>,
    strategy: ProrationStrategy,
    cadence: InvoiceCadence,
) -> Result<(Decimal, TransactionType)> {
    let (part, whole) = match strategy {
        ProrationStrategy::SecondBased => {
            let whole = (period_end - period_start).num_seconds();
            let part = match cadence {
                InvoiceCadence::Arrear => (period_end - proration_date).num_seconds(),
                InvoiceCadence::Advance => (proration_date - period_start).num_seconds(),
            };
            (part, whole)
        }
        ProrationStrategy::DayBased => {
            let whole = days_between(period_start, period_end);
            let part = match cadence {
                InvoiceCadence::Arrear => days_between(proration_date, period_end),
                InvoiceCadence::Advance => days_between(period_start, proration_date),
            };
            (part, whole)
        }
    };

    let coefficient = Decimal::from(part)
        .checked_div(Decimal::from(whole))
        .ok_or_else(|| BillingError::InvalidPeriod {
            message: format!("billing period {} - {} has no length", period_start, period_end),
        })?;

    let amount = total
        .checked_mul(coefficient)
        .ok_or_else(|| BillingError::overflow(format!("proration of {} by {}", total, coefficient)))?
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let direction = match cadence {
        InvoiceCadence::Arrear => TransactionType::Debit,
        InvoiceCadence::Advance => TransactionType::Credit,
    };

    Ok((amount, direction))
}

fn require_fixed_recurring(price: &Price) -> Result<()> {
    if !price.is_fixed_recurring() {
        return Err(BillingError::validation(
            "price_id",
            format!("proration requires a fixed recurring price, {} is not", price.id),
        ));
    }
    Ok(())
}

fn require_non_negative(field: &str, quantity: Decimal) -> Result<()> {
    if quantity < Decimal::ZERO {
        return Err(BillingError::validation(field, "quantity cannot be negative"));
    }
    Ok(())
}

/// Computes proration results against a fixed price catalog
pub struct ProrationCalculator {
    prices: Arc<PriceBook>,
    curve: Arc<dyn CostCurve>,
    defaults: ProrationDefaults,
}

impl ProrationCalculator {
    pub fn new(prices: Arc<PriceBook>, curve: Arc<dyn CostCurve>, defaults: ProrationDefaults) -> Self {
        Self {
            prices,
            curve,
            defaults,
        }
    }

    /// Proration for one subscription change; `Ok(None)` when proration is disabled.
    pub fn calculate(
        &self,
        subscription: &Subscription,
        params: &ProrationParams,
    ) -> Result<Option<ProrationResult>> {
        let behavior = params.behavior.unwrap_or(self.defaults.behavior);
        if behavior == ProrationBehavior::None {
            debug!(
                "Proration disabled for {} on subscription {}",
                params.action, subscription.id
            );
            return Ok(None);
        }

        self.validate(subscription, params)?;
        let strategy = params.strategy.unwrap_or(self.defaults.strategy);

        let mut result = ProrationResult {
            credits: Vec::new(),
            charges: Vec::new(),
            net_amount: Decimal::ZERO,
            currency: subscription.currency.clone(),
            action: params.action,
            proration_date: params.proration_date,
            line_item_id: params.line_item_id.clone(),
            current_period_start: subscription.current_period_start,
            current_period_end: subscription.current_period_end,
        };

        let window = ProrationWindow {
            start: subscription.current_period_start,
            end: subscription.current_period_end,
            at: params.proration_date,
            strategy,
        };

        match params.action {
            ProrationAction::PlanChange | ProrationAction::QuantityChange => {
                let line_item = self.target_line_item(subscription, params)?;
                self.change_price_or_quantity(line_item, params, &window, &mut result)?;
            }
            ProrationAction::AddItem => self.add_item(params, &window, &mut result)?,
            ProrationAction::RemoveItem => {
                let line_item = self.target_line_item(subscription, params)?;
                self.remove_item(line_item, &window, &mut result, "removed")?;
            }
            ProrationAction::Cancellation => {
                for line_item in &subscription.line_items {
                    let price = self.prices.get(&line_item.price_id)?;
                    if !price.is_fixed_recurring() {
                        continue;
                    }
                    self.remove_item(line_item, &window, &mut result, "cancelled")?;
                }
            }
        }

        result.settle();

        info!(
            "Calculated {} proration for subscription {}: {} charges, {} credits, net {} {}",
            params.action,
            subscription.id,
            result.charges.len(),
            result.credits.len(),
            result.net_amount,
            result.currency
        );

        Ok(Some(result))
    }

    fn validate(&self, subscription: &Subscription, params: &ProrationParams) -> Result<()> {
        let start = subscription.current_period_start;
        let end = subscription.current_period_end;
        if end <= start {
            return Err(BillingError::InvalidPeriod {
                message: format!(
                    "current period of subscription {} ends before it starts",
                    subscription.id
                ),
            });
        }
        if params.proration_date < start || params.proration_date > end {
            return Err(BillingError::validation(
                "proration_date",
                format!("{} is outside the current period {} - {}", params.proration_date, start, end),
            ));
        }

        let needs_line_item = matches!(
            params.action,
            ProrationAction::PlanChange | ProrationAction::QuantityChange | ProrationAction::RemoveItem
        );
        if needs_line_item && params.line_item_id.is_none() {
            return Err(BillingError::validation(
                "line_item_id",
                format!("{} requires a line item", params.action),
            ));
        }

        if params.action != ProrationAction::AddItem {
            if let Some(id) = params.line_item_id.as_deref() {
                let line_item = subscription.line_item(id)?;
                require_fixed_recurring(self.prices.get(&line_item.price_id)?)?;
            }
        }

        if let Some(quantity) = params.old_quantity {
            require_non_negative("old_quantity", quantity)?;
        }
        if let Some(quantity) = params.new_quantity {
            require_non_negative("new_quantity", quantity)?;
        }

        match params.action {
            ProrationAction::PlanChange | ProrationAction::AddItem => {
                let id = params.new_price_id.as_deref().ok_or_else(|| {
                    BillingError::validation(
                        "new_price_id",
                        format!("{} requires a new price", params.action),
                    )
                })?;
                require_fixed_recurring(self.prices.get(id)?)?;
            }
            ProrationAction::QuantityChange => {
                if params.new_quantity.is_none() {
                    return Err(BillingError::validation(
                        "new_quantity",
                        "quantity change requires a new quantity",
                    ));
                }
                if let Some(id) = params.new_price_id.as_deref() {
                    require_fixed_recurring(self.prices.get(id)?)?;
                }
            }
            ProrationAction::RemoveItem | ProrationAction::Cancellation => {}
        }

        Ok(())
    }

    fn target_line_item<'s>(
        &self,
        subscription: &'s Subscription,
        params: &ProrationParams,
    ) -> Result<&'s SubscriptionLineItem> {
        let id = params.line_item_id.as_deref().ok_or_else(|| {
            BillingError::validation("line_item_id", format!("{} requires a line item", params.action))
        })?;
        subscription.line_item(id)
    }

    fn change_price_or_quantity(
        &self,
        line_item: &SubscriptionLineItem,
        params: &ProrationParams,
        window: &ProrationWindow,
        result: &mut ProrationResult,
    ) -> Result<()> {
        let old_price = self
            .prices
            .get(params.old_price_id.as_deref().unwrap_or(&line_item.price_id))?;
        let new_price = match params.new_price_id.as_deref() {
            Some(id) => self.prices.get(id)?,
            None => old_price,
        };

        let old_quantity = params.old_quantity.unwrap_or(line_item.quantity);
        let new_quantity = params.new_quantity.unwrap_or(old_quantity);
        let change_type = self.plan_change_type(old_price, new_price)?;

        let old_total = self.curve.calculate_cost(old_price, old_quantity)?;
        let (old_amount, old_direction) = window.prorate(old_total, old_price.invoice_cadence)?;
        if old_amount > Decimal::ZERO {
            result.push(ProrationLineItem {
                description: format!("Unused portion of {} x {}", old_price.id, old_quantity),
                amount: old_amount,
                transaction_type: old_direction,
                price_id: old_price.id.clone(),
                quantity: old_quantity,
                unit_amount: old_price.amount,
                period_start: window.at,
                period_end: window.end,
                plan_change_type: Some(change_type),
            });
        }

        let new_total = self.curve.calculate_cost(new_price, new_quantity)?;
        let (new_amount, _) = window.prorate(new_total, new_price.invoice_cadence)?;
        if new_amount > Decimal::ZERO {
            result.push(ProrationLineItem {
                description: format!("Prorated {} x {}", new_price.id, new_quantity),
                amount: new_amount,
                transaction_type: TransactionType::Debit,
                price_id: new_price.id.clone(),
                quantity: new_quantity,
                unit_amount: new_price.amount,
                period_start: window.at,
                period_end: window.end,
                plan_change_type: Some(change_type),
            });
        }

        Ok(())
    }

    /// ADVANCE additions are charged with the same elapsed-share coefficient as
    /// every other ADVANCE line, not the remaining share.
    fn add_item(
        &self,
        params: &ProrationParams,
        window: &ProrationWindow,
        result: &mut ProrationResult,
    ) -> Result<()> {
        let id = params.new_price_id.as_deref().ok_or_else(|| {
            BillingError::validation("new_price_id", "add_item requires a new price")
        })?;
        let price = self.prices.get(id)?;
        let quantity = params.new_quantity.unwrap_or(Decimal::ONE);

        match price.invoice_cadence {
            InvoiceCadence::Advance => {
                let total = self.curve.calculate_cost(price, quantity)?;
                let (amount, _) = window.prorate(total, price.invoice_cadence)?;
                if amount > Decimal::ZERO {
                    result.push(ProrationLineItem {
                        description: format!("Prorated addition of {} x {}", price.id, quantity),
                        amount,
                        transaction_type: TransactionType::Debit,
                        price_id: price.id.clone(),
                        quantity,
                        unit_amount: price.amount,
                        period_start: window.at,
                        period_end: window.end,
                        plan_change_type: None,
                    });
                }
            }
            InvoiceCadence::Arrear => {
                // Billed with the next invoice; keep a zero line so the addition is visible
                result.push(ProrationLineItem {
                    description: format!("{} x {} added, billed at period end", price.id, quantity),
                    amount: Decimal::ZERO,
                    transaction_type: TransactionType::Debit,
                    price_id: price.id.clone(),
                    quantity,
                    unit_amount: price.amount,
                    period_start: window.at,
                    period_end: window.end,
                    plan_change_type: None,
                });
            }
        }

        Ok(())
    }

    fn remove_item(
        &self,
        line_item: &SubscriptionLineItem,
        window: &ProrationWindow,
        result: &mut ProrationResult,
        verb: &str,
    ) -> Result<()> {
        let price = self.prices.get(&line_item.price_id)?;
        let total = self.curve.calculate_cost(price, line_item.quantity)?;
        let (amount, direction) = window.prorate(total, line_item.invoice_cadence)?;

        if amount > Decimal::ZERO {
            result.push(ProrationLineItem {
                description: format!("Prorated {} {} x {}", verb, price.id, line_item.quantity),
                amount,
                transaction_type: direction,
                price_id: price.id.clone(),
                quantity: line_item.quantity,
                unit_amount: price.amount,
                period_start: window.at,
                period_end: window.end,
                plan_change_type: None,
            });
        }

        Ok(())
    }

    /// Compares the per-day cost of one unit under each price.
    pub fn plan_change_type(&self, old_price: &Price, new_price: &Price) -> Result<PlanChangeType> {
        let old_daily = self.daily_unit_cost(old_price)?;
        let new_daily = self.daily_unit_cost(new_price)?;

        let change = match new_daily.cmp(&old_daily) {
            std::cmp::Ordering::Greater => PlanChangeType::Upgrade,
            std::cmp::Ordering::Less => PlanChangeType::Downgrade,
            std::cmp::Ordering::Equal => PlanChangeType::NoChange,
        };

        debug!(
            "Plan change {} -> {}: daily {} -> {} ({:?})",
            old_price.id, new_price.id, old_daily, new_daily, change
        );

        Ok(change)
    }

    fn daily_unit_cost(&self, price: &Price) -> Result<Decimal> {
        let cost = self.curve.calculate_cost(price, Decimal::ONE)?;
        Ok(cost / Decimal::from(price.days_in_billing_interval().max(1)))
    }
}

struct ProrationWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    at: DateTime<Utc>,
    strategy: ProrationStrategy,
}

impl ProrationWindow {
    fn prorate(&self, total: Decimal, cadence: InvoiceCadence) -> Result<(Decimal, TransactionType)> {
        proportional_amount(total, self.start, self.end, self.at, self.strategy, cadence)
    }
}
