use crate::domain::catalog::{Meter, MeterFilter, Price};
use crate::domain::events::Event;
use std::collections::HashMap;
use tracing::warn;

/// A price whose meter accepts the event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult<'a> {
    pub price: &'a Price,
    pub meter: &'a Meter,
}

/// Prices the event counts towards, most specific meter first, then by price id.
pub fn match_event<'a, I>(
    event: &Event,
    prices: I,
    meters: &'a HashMap<String, Meter>,
) -> Vec<MatchResult<'a>>
where
    I: IntoIterator<Item = &'a Price>,
{
    let mut filter_cache: HashMap<&str, bool> = HashMap::new();
    let mut matches = Vec::new();

    for price in prices {
        let Some(meter_id) = price.meter_id().filter(|_| price.is_usage()) else {
            continue;
        };

        let Some(meter) = meters.get(meter_id) else {
            warn!(
                "Meter {} referenced by price {} not found while matching event {}",
                meter_id, price.id, event.id
            );
            continue;
        };

        if meter.event_name != event.event_name {
            continue;
        }

        let allowed = *filter_cache
            .entry(meter.id.as_str())
            .or_insert_with(|| filters_match(event, &meter.filters));
        if !allowed {
            continue;
        }

        matches.push(MatchResult { price, meter });
    }

    matches.sort_by(|a, b| {
        b.meter
            .filters
            .len()
            .cmp(&a.meter.filters.len())
            .then_with(|| a.price.id.cmp(&b.price.id))
    });

    matches
}

/// Conjunction of all filters; an empty filter list matches everything.
pub fn filters_match(event: &Event, filters: &[MeterFilter]) -> bool {
    filters.iter().all(|filter| {
        event
            .property(&filter.key)
            .is_some_and(|value| filter.values.iter().any(|allowed| value.matches_literal(allowed)))
    })
}
