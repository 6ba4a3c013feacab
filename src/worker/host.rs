//! Host side of the worker channel.
//!
//! One read loop demultiplexes worker frames by render id into per-render
//! queues. Frames for different ids may interleave freely; within one id
//! the order is the worker's send order.
//!
//! The read loop never waits on a consumer: a render whose stream is not
//! being polled queues its own frames and leaves every other id flowing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{broadcast, mpsc};

use crate::error::{AppError, ProtocolError, RoutingError};
use crate::observability::metrics;
use crate::render::orchestrator::{PayloadSource, RenderInput};
use crate::render::stream::{PayloadEvent, PayloadStream};
use crate::render::RenderError;
use crate::worker::message::{decode_data, decode_frame, write_frames, ErrorKind, HostMessage, WorkerMessage};

type Pending = Arc<DashMap<u64, mpsc::UnboundedSender<WorkerMessage>>>;

pub struct WorkerHost {
    next_id: AtomicU64,
    pending: Pending,
    outbound: mpsc::Sender<HostMessage>,
    reload: broadcast::Sender<()>,
}

impl WorkerHost {
    /// Attach to a worker over a byte channel and start the read/write loops.
    /// `capacity` bounds the queue of render requests waiting to be written.
    pub fn connect<R, W>(reader: R, writer: W, capacity: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: Pending = Arc::new(DashMap::new());
        let (outbound, outbound_rx) = mpsc::channel(capacity.max(1));
        let (reload, _) = broadcast::channel(16);

        tokio::spawn(write_frames(writer, outbound_rx));
        tokio::spawn(read_loop(reader, pending.clone(), reload.clone()));

        Self {
            next_id: AtomicU64::new(1),
            pending,
            outbound,
            reload,
        }
    }

    /// Fires once per `full-reload` frame.
    pub fn reload_sender(&self) -> broadcast::Sender<()> {
        self.reload.clone()
    }

    /// Renders awaiting their terminal frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

async fn read_loop<R: AsyncRead + Unpin>(reader: R, pending: Pending, reload: broadcast::Sender<()>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Worker channel read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match decode_frame::<WorkerMessage>(&line) {
            Ok(frame) => dispatch(&pending, &reload, frame),
            Err(e) => tracing::warn!(error = %e, "Malformed worker frame dropped"),
        }
    }

    // Dropping the senders ends every outstanding render with `Closed`.
    let outstanding = pending.len();
    pending.clear();
    metrics::record_worker_pending(0);
    tracing::warn!(outstanding, "Worker channel closed");
}

fn dispatch(pending: &Pending, reload: &broadcast::Sender<()>, frame: WorkerMessage) {
    let Some(id) = frame.id() else {
        let clients = reload.send(()).unwrap_or(0);
        tracing::info!(clients, "Worker requested full reload");
        return;
    };

    let terminal = frame.is_terminal();
    // The shard guard must be gone before `remove` below.
    let delivered = match pending.get(&id) {
        Some(entry) => entry.value().send(frame).is_ok(),
        None => {
            tracing::debug!(render_id = id, "Frame for unknown render id dropped");
            return;
        }
    };
    if terminal || !delivered {
        pending.remove(&id);
        metrics::record_worker_pending(pending.len());
        if !delivered {
            tracing::debug!(render_id = id, "Render consumer gone; ignoring further frames");
        }
    }
}

/// Rebuild the error a worker reported before its first byte.
fn remote_error(kind: ErrorKind, status: Option<u16>, location: Option<String>, message: String, pathname: &str) -> AppError {
    match kind {
        ErrorKind::Routing => RoutingError {
            pathname: pathname.to_string(),
        }
        .into(),
        ErrorKind::Protocol => ProtocolError::Frame(message).into(),
        ErrorKind::Render => remote_render_error(status, location, message).into(),
    }
}

fn remote_render_error(status: Option<u16>, location: Option<String>, message: String) -> RenderError {
    match (status, location) {
        (Some(status), Some(location)) => RenderError::redirect(status, location),
        (Some(status), None) if status != 500 => RenderError::with_status(status, message),
        _ => RenderError::Component(message),
    }
}

struct Inbound {
    id: u64,
    rx: mpsc::UnboundedReceiver<WorkerMessage>,
    first: Option<WorkerMessage>,
    done: bool,
}

impl Inbound {
    async fn next_event(&mut self) -> Option<Result<PayloadEvent, RenderError>> {
        loop {
            if self.done {
                return None;
            }
            let frame = match self.first.take() {
                Some(frame) => frame,
                None => match self.rx.recv().await {
                    Some(frame) => frame,
                    None => {
                        self.done = true;
                        tracing::warn!(render_id = self.id, "Worker channel closed mid-render");
                        return Some(Err(RenderError::Closed));
                    }
                },
            };
            match frame {
                WorkerMessage::Buf { data, .. } => {
                    return Some(decode_data(&data).map(PayloadEvent::Chunk).map_err(RenderError::from))
                }
                WorkerMessage::ModuleId { module_id, .. } => return Some(Ok(PayloadEvent::Module(module_id))),
                WorkerMessage::End { .. } => {
                    self.done = true;
                    return None;
                }
                WorkerMessage::Err {
                    status,
                    location,
                    message,
                    ..
                } => {
                    self.done = true;
                    return Some(Err(remote_render_error(status, location, message)));
                }
                WorkerMessage::FullReload => continue,
            }
        }
    }
}

#[async_trait]
impl PayloadSource for WorkerHost {
    async fn render(&self, input: RenderInput) -> Result<PayloadStream, AppError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pathname = input.pathname.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.pending.insert(id, tx);
        metrics::record_worker_pending(self.pending.len());

        tracing::debug!(render_id = id, pathname = %pathname, "Render sent to worker");
        if self.outbound.send(HostMessage::Render { id, input }).await.is_err() {
            self.pending.remove(&id);
            return Err(RenderError::Closed.into());
        }

        let first = rx.recv().await.ok_or(RenderError::Closed)?;
        if let WorkerMessage::Err {
            kind,
            status,
            location,
            message,
            ..
        } = first
        {
            return Err(remote_error(kind, status, location, message, &pathname));
        }

        let inbound = Inbound {
            id,
            rx,
            first: Some(first),
            done: false,
        };
        Ok(stream::unfold(inbound, |mut inbound| async move {
            let event = inbound.next_event().await?;
            Some((event, inbound))
        })
        .boxed())
    }
}
