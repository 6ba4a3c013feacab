//! Dev reload socket.
//!
//! Every connected client receives the text frame `full-reload` whenever
//! the render worker reports that pages changed.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::http::server::AppState;

pub const RELOAD_PATH: &str = "/__dev/reload";
pub const RELOAD_MESSAGE: &str = "full-reload";

pub async fn reload_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let Some(reload) = state.reload.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    ws.on_upgrade(move |socket| forward_reloads(socket, reload.subscribe()))
}

async fn forward_reloads(mut socket: WebSocket, mut reloads: broadcast::Receiver<()>) {
    tracing::debug!("Reload client connected");
    loop {
        tokio::select! {
            reload = reloads.recv() => match reload {
                Ok(()) | Err(RecvError::Lagged(_)) => {
                    if socket.send(Message::Text(RELOAD_MESSAGE.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("Reload client disconnected");
}
