//! Tracing subscriber setup
//!
//! Repositories emit `tracing` events with `entity`, `backend` and
//! `operation` fields; this module installs the JSON subscriber that
//! renders them.

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Build the event filter for a log level or filter directive
///
/// An invalid directive falls back to `info`.
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a JSON tracing subscriber for the configured log level
///
/// Installing twice in one process is not an error; the first subscriber
/// stays in place.
pub fn init_tracing(config: &Config) -> Result<()> {
    let installed = tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter(&config.service.log_level))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Tracing initialized for service: {}", config.service.name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        let config = Config::default();
        assert!(init_tracing(&config).is_ok());
        assert!(init_tracing(&config).is_ok());
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        assert_eq!(env_filter("acton_persistence=loud").to_string(), "info");
    }
}
