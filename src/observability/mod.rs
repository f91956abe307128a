//! # Observability Infrastructure
//!
//! Structured logging setup for binaries and test harnesses that embed the
//! parser. The parser itself only emits `tracing` events; wiring them to a
//! subscriber is the embedder's choice, and this module provides the default.

use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::Result;

/// Initialize the default logging subscriber.
///
/// `RUST_LOG` takes precedence; `default_directive` is used when it is unset
/// (e.g. `"routeplane=debug"`). Returns an error if a global subscriber is
/// already installed.
pub fn init_logging(default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter_from(default_directive)?,
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| crate::Error::config(format!("Failed to initialize logging: {}", e)))
}

fn filter_from(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| crate::Error::config_with_source("Invalid logging directive", Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_standard_directives() {
        assert!(filter_from("routeplane=debug,info").is_ok());
    }

    #[test]
    fn rejects_malformed_directives() {
        assert!(filter_from("routeplane=not-a-level=").is_err());
    }
}
