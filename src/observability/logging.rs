//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Take the level from `RUST_LOG`, falling back to config
//!
//! # Design Decisions
//! - The same level applies to this crate and to tower-http request spans

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::ObservabilityConfig;

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(config: &ObservabilityConfig) -> String {
    format!("render_router={level},tower_http={level}", level = config.log_level)
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_uses_level() {
        let config = ObservabilityConfig {
            log_level: "debug".into(),
            ..Default::default()
        };
        assert_eq!(default_directive(&config), "render_router=debug,tower_http=debug");
        init_logging(&config);
        init_logging(&config);
    }
}
