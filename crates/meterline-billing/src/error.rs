use thiserror::Error;

pub type Result<T> = std::result::Result<T, BillingError>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Validation error on {field}: {message}")]
    ValidationError { field: String, message: String },

    #[error("Line item {id} not found in subscription {subscription_id}")]
    LineItemNotFound { id: String, subscription_id: String },

    #[error("Price not found: {id}")]
    PriceNotFound { id: String },

    #[error("Price {price_id} has unsupported billing model {model} for this operation")]
    UnsupportedBillingModel { price_id: String, model: String },

    #[error("Invalid billing period: {message}")]
    InvalidPeriod { message: String },

    #[error("Lookup failed during {operation}: {source}")]
    LookupError {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Cost evaluation failed for price {price_id}: {source}")]
    CostCurveError {
        price_id: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Arithmetic overflow in {operation}")]
    Overflow { operation: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl BillingError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        BillingError::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn overflow(operation: impl Into<String>) -> Self {
        BillingError::Overflow {
            operation: operation.into(),
        }
    }

    /// Errors the caller must fix before retrying; the core never retries them.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BillingError::ValidationError { .. }
                | BillingError::LineItemNotFound { .. }
                | BillingError::PriceNotFound { .. }
                | BillingError::UnsupportedBillingModel { .. }
                | BillingError::InvalidPeriod { .. }
                | BillingError::Overflow { .. }
        )
    }
}
