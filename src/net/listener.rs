//! TCP listener binding with port fallback.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - On `AddrInUse`, try the next ports up to `port_retries` times
//! - Report the address actually bound

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid bind address `{0}`")]
    Address(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("ports {first}..={last} are all in use")]
    Exhausted { first: u16, last: u16 },
}

/// Bind the listener described by `config`, optionally overriding its port.
pub async fn bind(config: &ListenerConfig, port: Option<u16>) -> Result<TcpListener, ListenerError> {
    let mut addr: SocketAddr = config
        .bind_address
        .parse()
        .map_err(|_| ListenerError::Address(config.bind_address.clone()))?;
    if let Some(port) = port {
        addr.set_port(port);
    }
    bind_with_retry(addr, config.port_retries).await
}

/// Try `addr`, then successive ports, while the port is taken.
pub async fn bind_with_retry(addr: SocketAddr, retries: u16) -> Result<TcpListener, ListenerError> {
    let first = addr.port();
    let mut candidate = addr;

    for offset in 0..=retries {
        // Port 0 lets the OS choose; never "retry" it.
        if offset > 0 && first == 0 {
            break;
        }
        let Some(port) = first.checked_add(offset) else {
            break;
        };
        candidate.set_port(port);
        match TcpListener::bind(candidate).await {
            Ok(listener) => {
                let local = listener.local_addr().map_err(|source| ListenerError::Bind {
                    addr: candidate,
                    source,
                })?;
                if offset > 0 {
                    tracing::warn!(requested = first, bound = local.port(), "Port in use; bound next free port");
                }
                tracing::info!(address = %local, "Listener bound");
                return Ok(listener);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port in use");
                continue;
            }
            Err(source) => {
                return Err(ListenerError::Bind {
                    addr: candidate,
                    source,
                })
            }
        }
    }

    Err(ListenerError::Exhausted {
        first,
        last: first.saturating_add(retries),
    })
}
