pub mod processor;

pub use processor::{BatchSummary, EventOutcome, UsageProcessor};
