//! Commitment, overage and true-up evaluation for usage line items.
//!
//! Quantity commitments are converted to currency through the cost curve
//! before any comparison. Nothing in here rounds; rounding belongs to
//! whoever renders the amounts.

use crate::domain::buckets::{fill_bucketed_usage, WindowSize};
use crate::domain::catalog::{Commitment, CommitmentKind, CommitmentType, Price, SubscriptionLineItem};
use crate::domain::events::BucketUsage;
use crate::domain::pricing::CostCurve;
use crate::error::{BillingError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Breakdown of how a commitment shaped the final charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentInfo {
    pub commitment_type: CommitmentType,
    /// Commitment in currency units; per window when `is_windowed`
    pub amount: Decimal,
    pub quantity: Option<Decimal>,
    pub overage_factor: Decimal,
    pub true_up_enabled: bool,
    pub is_windowed: bool,
    pub utilized_amount: Decimal,
    pub overage_amount: Decimal,
    pub true_up_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentOutcome {
    pub final_charge: Decimal,
    pub info: CommitmentInfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct WindowCharge {
    charge: Decimal,
    utilized: Decimal,
    overage: Decimal,
    true_up: Decimal,
}

impl WindowCharge {
    fn checked_add(self, rhs: Self) -> Option<Self> {
        Some(Self {
            charge: self.charge.checked_add(rhs.charge)?,
            utilized: self.utilized.checked_add(rhs.utilized)?,
            overage: self.overage.checked_add(rhs.overage)?,
            true_up: self.true_up.checked_add(rhs.true_up)?,
        })
    }
}

fn charge_window(usage_cost: Decimal, commitment: Decimal, terms: &Commitment) -> Result<WindowCharge> {
    if usage_cost >= commitment {
        let overage = usage_cost
            .checked_sub(commitment)
            .and_then(|excess| excess.checked_mul(terms.overage_factor))
            .ok_or_else(|| BillingError::overflow("commitment overage"))?;
        let charge = commitment
            .checked_add(overage)
            .ok_or_else(|| BillingError::overflow("commitment overage"))?;
        Ok(WindowCharge {
            charge,
            utilized: commitment,
            overage,
            true_up: Decimal::ZERO,
        })
    } else if terms.true_up_enabled {
        Ok(WindowCharge {
            charge: commitment,
            utilized: usage_cost,
            overage: Decimal::ZERO,
            true_up: commitment
                .checked_sub(usage_cost)
                .ok_or_else(|| BillingError::overflow("commitment true-up"))?,
        })
    } else {
        Ok(WindowCharge {
            charge: usage_cost,
            utilized: usage_cost,
            overage: Decimal::ZERO,
            true_up: Decimal::ZERO,
        })
    }
}

pub struct CommitmentCalculator {
    curve: Arc<dyn CostCurve>,
}

impl CommitmentCalculator {
    pub fn new(curve: Arc<dyn CostCurve>) -> Self {
        Self { curve }
    }

    /// Commitment of the line item expressed in currency units.
    pub fn normalize(&self, line_item: &SubscriptionLineItem, price: &Price) -> Result<Decimal> {
        let commitment = line_item.commitment()?;
        commitment.validate()?;

        match commitment.kind {
            CommitmentKind::Amount { amount } => Ok(amount),
            CommitmentKind::Quantity { quantity } => {
                let amount = self.curve.calculate_cost(price, quantity)?;
                debug!(
                    "Normalized quantity commitment {} to amount {} for line item {} (price {})",
                    quantity, amount, line_item.id, price.id
                );
                Ok(amount)
            }
        }
    }

    /// Apply the commitment once to the whole period's usage cost.
    pub fn apply_flat(
        &self,
        line_item: &SubscriptionLineItem,
        usage_cost: Decimal,
        price: &Price,
    ) -> Result<CommitmentOutcome> {
        let commitment_amount = self.normalize(line_item, price)?;
        let terms = line_item.commitment()?;
        let window = charge_window(usage_cost, commitment_amount, terms)?;

        debug!(
            "Applied commitment {} to usage cost {} for line item {}: charge {}, overage {}, true-up {}",
            commitment_amount, usage_cost, line_item.id, window.charge, window.overage, window.true_up
        );

        Ok(self.outcome(terms, commitment_amount, false, window))
    }

    /// Apply the commitment independently to each window's usage cost and sum the results.
    pub fn apply_windowed(
        &self,
        line_item: &SubscriptionLineItem,
        window_costs: &[Decimal],
        price: &Price,
    ) -> Result<CommitmentOutcome> {
        let commitment_per_window = self.normalize(line_item, price)?;
        let terms = line_item.commitment()?;

        let mut total = WindowCharge::default();
        let mut windows_with_overage = 0usize;
        let mut windows_with_true_up = 0usize;

        for (index, cost) in window_costs.iter().enumerate() {
            let window = charge_window(*cost, commitment_per_window, terms)?;
            if *cost >= commitment_per_window {
                windows_with_overage += 1;
            } else if terms.true_up_enabled {
                windows_with_true_up += 1;
            }
            debug!(
                "Window {} of line item {}: cost {}, charge {}",
                index, line_item.id, cost, window.charge
            );
            total = total
                .checked_add(window)
                .ok_or_else(|| BillingError::overflow("windowed commitment total"))?;
        }

        info!(
            "Windowed commitment applied to line item {}: {} windows, {} per window, total {} ({} over, {} trued up)",
            line_item.id,
            window_costs.len(),
            commitment_per_window,
            total.charge,
            windows_with_overage,
            windows_with_true_up
        );

        Ok(self.outcome(terms, commitment_per_window, true, total))
    }

    /// Price each window's quantity through the cost curve, then apply the windowed commitment.
    pub fn apply_windowed_usage(
        &self,
        line_item: &SubscriptionLineItem,
        window_quantities: &[Decimal],
        price: &Price,
    ) -> Result<CommitmentOutcome> {
        let costs = window_quantities
            .iter()
            .map(|quantity| self.curve.calculate_cost(price, *quantity))
            .collect::<Result<Vec<_>>>()?;
        self.apply_windowed(line_item, &costs, price)
    }

    /// Evaluate a line item's commitment for one billing period.
    ///
    /// Windowed commitments zero-fill the sparse `usage` over every window of
    /// the period; otherwise the usage is summed and the commitment applied once.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate_period(
        &self,
        line_item: &SubscriptionLineItem,
        price: &Price,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        window_size: WindowSize,
        billing_anchor: Option<DateTime<Utc>>,
        usage: &[BucketUsage],
    ) -> Result<CommitmentOutcome> {
        let terms = line_item.commitment()?;

        if terms.windowed {
            let quantities = fill_bucketed_usage(
                period_start,
                period_end,
                window_size,
                billing_anchor,
                usage,
            )?;
            return self.apply_windowed_usage(line_item, &quantities, price);
        }

        let total_quantity: Decimal = usage
            .iter()
            .filter(|u| u.window_start >= period_start && u.window_start < period_end)
            .map(|u| u.value)
            .sum();
        let usage_cost = self.curve.calculate_cost(price, total_quantity)?;
        self.apply_flat(line_item, usage_cost, price)
    }

    fn outcome(
        &self,
        terms: &Commitment,
        amount: Decimal,
        is_windowed: bool,
        totals: WindowCharge,
    ) -> CommitmentOutcome {
        let quantity = match terms.kind {
            CommitmentKind::Quantity { quantity } => Some(quantity),
            CommitmentKind::Amount { .. } => None,
        };

        CommitmentOutcome {
            final_charge: totals.charge,
            info: CommitmentInfo {
                commitment_type: terms.kind.commitment_type(),
                amount,
                quantity,
                overage_factor: terms.overage_factor,
                true_up_enabled: terms.true_up_enabled,
                is_windowed,
                utilized_amount: totals.utilized,
                overage_amount: totals.overage,
                true_up_amount: totals.true_up,
            },
        }
    }
}
