use crate::domain::catalog::{Customer, Meter, Price, Subscription};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Read access to the published catalog and customer state.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find_customer(
        &self,
        tenant_id: &str,
        environment_id: &str,
        external_id: &str,
    ) -> Result<Option<Customer>>;

    /// Subscriptions of the customer whose status accrues usage.
    async fn active_subscriptions(&self, customer_id: &str) -> Result<Vec<Subscription>>;

    /// Prices for the given ids; unknown ids are omitted.
    async fn prices_by_ids(&self, ids: &[String]) -> Result<Vec<Price>>;

    /// Meters for the given ids; unknown ids are omitted.
    async fn meters_by_ids(&self, ids: &[String]) -> Result<Vec<Meter>>;
}

/// Serializable catalog contents, used to seed an in-memory catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub customers: Vec<Customer>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub prices: Vec<Price>,
    #[serde(default)]
    pub meters: Vec<Meter>,
}

#[derive(Default)]
struct CatalogState {
    customers: HashMap<String, Customer>,
    subscriptions: HashMap<String, Subscription>,
    prices: HashMap<String, Price>,
    meters: HashMap<String, Meter>,
}

pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(CatalogState::default())),
        }
    }

    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let state = CatalogState {
            customers: snapshot
                .customers
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect(),
            subscriptions: snapshot
                .subscriptions
                .into_iter()
                .map(|s| (s.id.clone(), s))
                .collect(),
            prices: snapshot
                .prices
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
            meters: snapshot
                .meters
                .into_iter()
                .map(|m| (m.id.clone(), m))
                .collect(),
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn add_customer(&self, customer: Customer) {
        let mut state = self.state.write().await;
        state.customers.insert(customer.id.clone(), customer);
    }

    pub async fn add_subscription(&self, subscription: Subscription) {
        let mut state = self.state.write().await;
        state
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    pub async fn add_price(&self, price: Price) {
        let mut state = self.state.write().await;
        state.prices.insert(price.id.clone(), price);
    }

    pub async fn add_meter(&self, meter: Meter) {
        let mut state = self.state.write().await;
        state.meters.insert(meter.id.clone(), meter);
    }

    pub async fn prices(&self) -> Vec<Price> {
        let state = self.state.read().await;
        state.prices.values().cloned().collect()
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalog {
    async fn find_customer(
        &self,
        tenant_id: &str,
        environment_id: &str,
        external_id: &str,
    ) -> Result<Option<Customer>> {
        let state = self.state.read().await;
        Ok(state
            .customers
            .values()
            .find(|c| {
                c.tenant_id == tenant_id
                    && c.environment_id == environment_id
                    && c.external_id == external_id
            })
            .cloned())
    }

    async fn active_subscriptions(&self, customer_id: &str) -> Result<Vec<Subscription>> {
        let state = self.state.read().await;
        let mut subscriptions: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| s.customer_id == customer_id && s.status.accrues_usage())
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(subscriptions)
    }

    async fn prices_by_ids(&self, ids: &[String]) -> Result<Vec<Price>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.prices.get(id).cloned()).collect())
    }

    async fn meters_by_ids(&self, ids: &[String]) -> Result<Vec<Meter>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.meters.get(id).cloned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::Aggregation;

    #[tokio::test]
    async fn test_customer_lookup_is_scoped() {
        let catalog = InMemoryCatalog::new();
        catalog
            .add_customer(Customer {
                id: "cust_1".to_string(),
                tenant_id: "t1".to_string(),
                environment_id: "prod".to_string(),
                external_id: "acme".to_string(),
            })
            .await;

        assert!(catalog.find_customer("t1", "prod", "acme").await.unwrap().is_some());
        assert!(catalog.find_customer("t2", "prod", "acme").await.unwrap().is_none());
        assert!(catalog.find_customer("t1", "dev", "acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bulk_lookups_skip_unknown_ids() {
        let catalog = InMemoryCatalog::new();
        catalog
            .add_meter(Meter::new("m1", "api_call", Aggregation::count()))
            .await;

        let meters = catalog
            .meters_by_ids(&["m1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(meters.len(), 1);
        assert!(catalog.prices_by_ids(&["p1".to_string()]).await.unwrap().is_empty());
    }
}
