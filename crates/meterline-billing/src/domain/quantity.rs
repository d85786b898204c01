use crate::domain::catalog::Meter;
use crate::domain::events::Event;
use crate::domain::property::PropertyValue;
use crate::domain::types::AggregationType;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Quantity contributed by a single event together with the raw field value it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedQuantity {
    pub quantity: Decimal,
    pub field_value: String,
}

impl ExtractedQuantity {
    fn zero(field_value: impl Into<String>) -> Self {
        Self {
            quantity: Decimal::ZERO,
            field_value: field_value.into(),
        }
    }
}

/// Billable quantity of `event` for `meter`.
///
/// Never fails: missing or unparsable values degrade to zero with the raw
/// value kept for diagnostics, and negative sums are clamped to zero.
pub fn extract_quantity(event: &Event, meter: &Meter) -> ExtractedQuantity {
    match meter.aggregation.aggregation_type {
        AggregationType::Count => ExtractedQuantity {
            quantity: Decimal::ONE,
            field_value: String::new(),
        },
        AggregationType::Sum => extract_sum(event, meter),
        other => {
            debug!(
                "Unsupported aggregation {} for meter {} on event {}",
                other, meter.id, event.id
            );
            ExtractedQuantity::zero("")
        }
    }
}

fn extract_sum(event: &Event, meter: &Meter) -> ExtractedQuantity {
    let field = meter.aggregation.field.as_str();
    if field.is_empty() {
        debug!("Sum meter {} has no field configured", meter.id);
        return ExtractedQuantity::zero("");
    }

    let Some(value) = event.property(field) else {
        debug!(
            "Event {} has no property {} required by meter {}",
            event.id, field, meter.id
        );
        return ExtractedQuantity::zero("");
    };

    let raw = value.raw_string();
    let parsed = match value {
        PropertyValue::Null
        | PropertyValue::Bool(_)
        | PropertyValue::List(_)
        | PropertyValue::Map(_) => None,
        numeric => numeric.to_decimal(),
    };

    match parsed {
        Some(quantity) if quantity.is_sign_negative() && !quantity.is_zero() => {
            warn!(
                "Clamping negative quantity {} to zero for event {} on meter {}",
                quantity, event.id, meter.id
            );
            ExtractedQuantity::zero(raw)
        }
        Some(quantity) => ExtractedQuantity {
            quantity,
            field_value: raw,
        },
        None => {
            debug!(
                "Property {} of event {} is not numeric: {}",
                field, event.id, raw
            );
            ExtractedQuantity::zero(raw)
        }
    }
}

/// Deduplication key of an event for a meter.
///
/// COUNT_UNIQUE meters fold the canonical field value into the key so that
/// equal values collapse to one record regardless of formatting.
pub fn generate_unique_hash(event: &Event, meter: &Meter) -> String {
    let mut key = String::with_capacity(event.event_name.len() + event.id.len() + 64);
    key.push_str(&event.event_name);
    key.push(':');
    key.push_str(&event.id);

    let field = meter.aggregation.field.as_str();
    if meter.aggregation.aggregation_type == AggregationType::CountUnique && !field.is_empty() {
        if let Some(value) = event.property(field) {
            key.push(':');
            key.push_str(field);
            key.push(':');
            key.push_str(&value.canonical_string());
        }
    }

    hex::encode(Sha256::digest(key.as_bytes()))
}
