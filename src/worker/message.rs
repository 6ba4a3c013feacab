//! Frames exchanged between host and worker.
//!
//! Newline-delimited JSON, one frame per line:
//!
//! ```text
//! host → worker   {"type":"render","id":7,"input":{"pathname":"/nested/foo"}}
//! worker → host   {"type":"buf","id":7,"data":"<base64>"}
//!                 {"type":"moduleId","id":7,"moduleId":"Counter"}
//!                 {"type":"end","id":7}    or    {"type":"err","id":7,...}
//!                 {"type":"full-reload"}
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{AppError, ProtocolError};
use crate::render::orchestrator::RenderInput;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    Render { id: u64, input: RenderInput },
}

/// Which error class an `err` frame carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Routing,
    Protocol,
    #[default]
    Render,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    Buf {
        id: u64,
        data: String,
    },
    ModuleId {
        id: u64,
        #[serde(rename = "moduleId")]
        module_id: String,
    },
    End {
        id: u64,
    },
    Err {
        id: u64,
        #[serde(default)]
        kind: ErrorKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
        message: String,
    },
    #[serde(rename = "full-reload")]
    FullReload,
}

impl WorkerMessage {
    pub fn buf(id: u64, bytes: &[u8]) -> Self {
        WorkerMessage::Buf {
            id,
            data: STANDARD.encode(bytes),
        }
    }

    /// Error frame for a failed render.
    pub fn error(id: u64, err: &AppError) -> Self {
        let (kind, location) = match err {
            AppError::Routing(_) => (ErrorKind::Routing, None),
            AppError::Protocol(_) => (ErrorKind::Protocol, None),
            AppError::Render(e) => (ErrorKind::Render, e.location().map(str::to_string)),
        };
        WorkerMessage::Err {
            id,
            kind,
            status: Some(err.status().as_u16()),
            location,
            message: err.to_string(),
        }
    }

    /// Render id, absent for broadcast frames.
    pub fn id(&self) -> Option<u64> {
        match self {
            WorkerMessage::Buf { id, .. }
            | WorkerMessage::ModuleId { id, .. }
            | WorkerMessage::End { id }
            | WorkerMessage::Err { id, .. } => Some(*id),
            WorkerMessage::FullReload => None,
        }
    }

    /// `end` and `err` close a render id.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerMessage::End { .. } | WorkerMessage::Err { .. })
    }
}

/// Decode the payload bytes of a `buf` frame.
pub fn decode_data(data: &str) -> Result<Bytes, ProtocolError> {
    STANDARD
        .decode(data)
        .map(Bytes::from)
        .map_err(|e| ProtocolError::Frame(e.to_string()))
}

/// One frame as a JSON line.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut line = serde_json::to_vec(frame).map_err(|e| ProtocolError::Frame(e.to_string()))?;
    line.push(b'\n');
    Ok(line)
}

pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(line).map_err(|e| ProtocolError::Frame(format!("{e}: {line}")))
}

/// Drain `rx` onto `writer`, one frame per line, until every sender is gone.
pub async fn write_frames<W, T>(mut writer: W, mut rx: mpsc::Receiver<T>)
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    while let Some(frame) = rx.recv().await {
        let line = match encode_frame(&frame) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "Frame encode failed");
                continue;
            }
        };
        if let Err(e) = writer.write_all(&line).await {
            tracing::warn!(error = %e, "Frame write failed; channel closed");
            return;
        }
        if rx.is_empty() {
            if let Err(e) = writer.flush().await {
                tracing::warn!(error = %e, "Frame flush failed; channel closed");
                return;
            }
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RoutingError;
    use crate::render::RenderError;

    #[test]
    fn test_wire_shapes() {
        let render = HostMessage::Render {
            id: 7,
            input: RenderInput::new("/nested/foo"),
        };
        assert_eq!(
            String::from_utf8(encode_frame(&render).unwrap()).unwrap(),
            "{\"type\":\"render\",\"id\":7,\"input\":{\"pathname\":\"/nested/foo\"}}\n"
        );

        let module: WorkerMessage = decode_frame(r#"{"type":"moduleId","id":1,"moduleId":"Counter"}"#).unwrap();
        assert_eq!(
            module,
            WorkerMessage::ModuleId {
                id: 1,
                module_id: "Counter".into()
            }
        );
        let reload: WorkerMessage = decode_frame(r#"{"type":"full-reload"}"#).unwrap();
        assert_eq!(reload.id(), None);
    }

    #[test]
    fn test_buf_data_is_base64() {
        let frame = WorkerMessage::buf(3, b"0:null\n");
        let WorkerMessage::Buf { data, .. } = &frame else {
            panic!("expected buf");
        };
        assert_eq!(decode_data(data).unwrap(), Bytes::from_static(b"0:null\n"));
        assert!(decode_data("not base64!").is_err());
    }

    #[test]
    fn test_error_frames_keep_kind_and_status() {
        let routing = WorkerMessage::error(
            1,
            &AppError::from(RoutingError {
                pathname: "/x".into(),
            }),
        );
        assert!(matches!(
            routing,
            WorkerMessage::Err {
                kind: ErrorKind::Routing,
                status: Some(404),
                ..
            }
        ));
        assert!(routing.is_terminal());

        let redirect = WorkerMessage::error(2, &AppError::from(RenderError::redirect(307, "/login")));
        assert!(matches!(
            redirect,
            WorkerMessage::Err { status: Some(307), location: Some(ref l), .. } if l == "/login"
        ));
    }

    #[test]
    fn test_garbage_line_is_frame_error() {
        let err = decode_frame::<WorkerMessage>("{nope").unwrap_err();
        assert!(matches!(err, ProtocolError::Frame(_)));
    }
}
