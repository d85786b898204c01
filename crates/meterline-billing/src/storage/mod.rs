pub mod catalog;
pub mod usage;

pub use catalog::{CatalogRepository, CatalogSnapshot, InMemoryCatalog};
pub use usage::{InMemoryUsageRepository, UsageRecordRepository};
