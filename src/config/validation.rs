//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check route patterns parse and kinds are consistent
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Module resolution is checked later, when the route table is built

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AppConfig;
use crate::routing::path::parse_spec;
use crate::routing::table::RouteKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: `{value}` is not a socket address")]
    Address { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("payload.prefix must not be empty")]
    EmptyPrefix,

    #[error("route `{path}`: {reason}")]
    Route { path: String, reason: String },
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::Address {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }
    if config.payload.channel_capacity == 0 {
        errors.push(ValidationError::Zero("payload.channel_capacity"));
    }
    if config.dev.channel_capacity == 0 {
        errors.push(ValidationError::Zero("dev.channel_capacity"));
    }
    if config.payload.prefix.trim_matches('/').is_empty() {
        errors.push(ValidationError::EmptyPrefix);
    }

    let mut roots = 0;
    for route in &config.routes {
        if let Err(e) = parse_spec(&route.path) {
            errors.push(ValidationError::Route {
                path: route.path.clone(),
                reason: e.to_string(),
            });
        }
        if route.kind == RouteKind::Root {
            roots += 1;
        }
        if route.kind == RouteKind::Api && route.static_paths.is_some() {
            errors.push(ValidationError::Route {
                path: route.path.clone(),
                reason: "API routes cannot declare static paths".into(),
            });
        }
    }
    if roots > 1 {
        errors.push(ValidationError::Route {
            path: "*".into(),
            reason: "more than one root entry".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
