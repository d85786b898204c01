//! Unified logging initialization for meterline binaries
//!
//! The filter is resolved in the following priority order:
//! 1. CLI flags (`-v/-q`) - highest priority
//! 2. RUST_LOG environment variable
//! 3. The configured default filter - lowest priority

use anyhow::Result;
use clap_verbosity_flag::{LogLevel, Verbosity};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Compact => write!(f, "compact"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow::anyhow!("unknown log format: {}", other)),
        }
    }
}

/// Resolve the filter that `init_logging` would install.
pub fn resolve_filter<L: LogLevel>(verbosity: &Verbosity<L>, default_filter: &str) -> Result<EnvFilter> {
    let filter = if let Some(log_level) = verbosity.log_level() {
        EnvFilter::try_new(format!("{}", log_level))?
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };
    Ok(filter)
}

/// Initialize logging with the specified verbosity level, default filter and output format.
///
/// # Example
///
/// ```no_run
/// use clap::Parser;
/// use clap_verbosity_flag::{InfoLevel, Verbosity};
/// use meterline_common::logging::{self, LogFormat};
///
/// #[derive(Parser)]
/// struct Args {
///     #[clap(flatten)]
///     verbosity: Verbosity<InfoLevel>,
/// }
///
/// let args = Args::parse();
/// logging::init_logging(&args.verbosity, "meterline_billing=info", LogFormat::Compact).unwrap();
/// ```
pub fn init_logging<L: LogLevel>(
    verbosity: &Verbosity<L>,
    default_filter: &str,
    format: LogFormat,
) -> Result<()> {
    let filter = resolve_filter(verbosity, default_filter)?;

    match format {
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .json()
                    .with_current_span(false),
            )
            .try_init()?,
    }

    Ok(())
}
