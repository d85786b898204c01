use crate::domain::catalog::{BillingModel, Price};
use crate::error::{BillingError, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// Cost of a quantity under a price's billing model.
///
/// Implementations must return zero for a zero quantity and be monotonic
/// non-decreasing in quantity.
pub trait CostCurve: Send + Sync {
    fn calculate_cost(&self, price: &Price, quantity: Decimal) -> Result<Decimal>;
}

/// Evaluates FLAT_FEE prices as `amount × quantity`.
///
/// Tiered and package prices need an external evaluator.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatFeeCurve;

impl CostCurve for FlatFeeCurve {
    fn calculate_cost(&self, price: &Price, quantity: Decimal) -> Result<Decimal> {
        match price.billing_model {
            BillingModel::FlatFee => {
                if quantity.is_zero() {
                    return Ok(Decimal::ZERO);
                }
                price
                    .amount
                    .checked_mul(quantity)
                    .ok_or_else(|| BillingError::CostCurveError {
                        price_id: price.id.clone(),
                        source: format!("{} x {} overflows", price.amount, quantity).into(),
                    })
            }
            ref other => Err(BillingError::UnsupportedBillingModel {
                price_id: price.id.clone(),
                model: other.to_string(),
            }),
        }
    }
}

impl<T: CostCurve + ?Sized> CostCurve for Arc<T> {
    fn calculate_cost(&self, price: &Price, quantity: Decimal) -> Result<Decimal> {
        (**self).calculate_cost(price, quantity)
    }
}

/// Prices indexed by id
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    prices: HashMap<String, Price>,
}

impl PriceBook {
    pub fn new(prices: impl IntoIterator<Item = Price>) -> Self {
        Self {
            prices: prices.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn insert(&mut self, price: Price) {
        self.prices.insert(price.id.clone(), price);
    }

    pub fn get(&self, id: &str) -> Result<&Price> {
        self.prices
            .get(id)
            .ok_or_else(|| BillingError::PriceNotFound { id: id.to_string() })
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{PackageRounding, TierMode};
    use crate::domain::types::{BillingCadence, BillingPeriod, InvoiceCadence, PriceType};
    use rust_decimal_macros::dec;

    fn price(model: BillingModel) -> Price {
        Price {
            id: "p1".to_string(),
            meter_id: Some("m1".to_string()),
            price_type: PriceType::Usage,
            billing_model: model,
            billing_cadence: BillingCadence::Recurring,
            invoice_cadence: InvoiceCadence::Arrear,
            billing_period: BillingPeriod::Monthly,
            billing_period_count: 1,
            amount: dec!(0.02),
            currency: "usd".to_string(),
        }
    }

    #[test]
    fn test_flat_fee_cost() {
        let curve = FlatFeeCurve;
        assert_eq!(curve.calculate_cost(&price(BillingModel::FlatFee), dec!(150)).unwrap(), dec!(3.00));
        assert_eq!(curve.calculate_cost(&price(BillingModel::FlatFee), dec!(0)).unwrap(), dec!(0));
    }

    #[test]
    fn test_non_flat_models_are_rejected() {
        let curve = FlatFeeCurve;
        let tiered = price(BillingModel::Tiered {
            mode: TierMode::Volume,
            tiers: Vec::new(),
        });
        let package = price(BillingModel::Package {
            divide_by: 100,
            round: PackageRounding::Up,
        });

        assert!(matches!(
            curve.calculate_cost(&tiered, dec!(1)),
            Err(BillingError::UnsupportedBillingModel { .. })
        ));
        assert!(matches!(
            curve.calculate_cost(&package, dec!(1)),
            Err(BillingError::UnsupportedBillingModel { .. })
        ));
    }

    #[test]
    fn test_price_book_lookup() {
        let book = PriceBook::new(vec![price(BillingModel::FlatFee)]);
        assert_eq!(book.len(), 1);
        assert!(book.get("p1").is_ok());
        assert!(matches!(book.get("nope"), Err(BillingError::PriceNotFound { .. })));
    }
}
