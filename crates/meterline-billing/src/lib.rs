//! Computation core of usage-based billing: event matching, quantity
//! extraction, commitment evaluation and proration.

pub mod aggregator;
pub mod config;
pub mod domain;
pub mod error;
pub mod storage;

pub use config::BillingConfig;
pub use error::{BillingError, Result};
