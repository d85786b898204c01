//! Shared ambient code for meterline crates

pub mod logging;

pub use logging::{init_logging, LogFormat};
