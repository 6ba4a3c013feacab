//! Render error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ProtocolError;

/// Errors raised while serializing or rendering a component tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The subtree intentionally renders nothing on the server.
    /// Swallowed by the renderers; never reaches the client as an error.
    #[error("subtree has no server output")]
    NoServerOutput,

    /// Deliberate short-circuit (redirect, auth) carrying its HTTP status.
    #[error("{0}")]
    Status(StatusError),

    #[error("module `{0}` could not be resolved")]
    UnresolvedModule(String),

    #[error("module `{0}` is not a component")]
    NotAComponent(String),

    #[error("slot name `{0}` starts with the reserved sentinel")]
    ReservedSlot(String),

    #[error("server component nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("component failed: {0}")]
    Component(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("render channel closed before completion")]
    Closed,

    #[error("body read failed: {0}")]
    Read(String),
}

/// Payload of [`RenderError::Status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusError {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl RenderError {
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        RenderError::Status(StatusError {
            status,
            message: message.into(),
            location: None,
        })
    }

    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        let location = location.into();
        RenderError::Status(StatusError {
            status,
            message: format!("redirect to {location}"),
            location: Some(location),
        })
    }

    /// HTTP status carried by a tagged error.
    pub fn status(&self) -> Option<u16> {
        match self {
            RenderError::Status(s) => Some(s.status),
            _ => None,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            RenderError::Status(s) => s.location.as_deref(),
            _ => None,
        }
    }
}
