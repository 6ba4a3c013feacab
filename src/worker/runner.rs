//! Worker side of the channel: renders on its own thread and runtime.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::StreamExt;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{broadcast, mpsc};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::lifecycle::startup::{load_renderer, Registrar, StartupError};
use crate::lifecycle::Shutdown;
use crate::render::orchestrator::{RenderInput, Renderer};
use crate::render::stream::PayloadEvent;
use crate::worker::host::WorkerHost;
use crate::worker::message::{decode_frame, write_frames, HostMessage, WorkerMessage};
use crate::worker::WorkerError;

/// Bytes buffered in each direction of the in-process channel.
const CHANNEL_BUFFER: usize = 256 * 1024;

/// Renders requests from the host with whatever modules were loaded last.
#[derive(Clone)]
pub struct Worker {
    config: Arc<AppConfig>,
    registrar: Registrar,
    renderer: Arc<ArcSwap<Renderer>>,
}

impl Worker {
    pub fn new(config: Arc<AppConfig>, registrar: Registrar) -> Result<Self, StartupError> {
        let renderer = load_renderer(&config, &registrar)?;
        Ok(Self {
            config,
            registrar,
            renderer: Arc::new(ArcSwap::from_pointee(renderer)),
        })
    }

    /// Rescan pages and swap in a fresh renderer. In-flight renders keep
    /// the one they started with.
    pub fn reload(&self) -> Result<(), StartupError> {
        let renderer = load_renderer(&self.config, &self.registrar)?;
        self.renderer.store(Arc::new(renderer));
        Ok(())
    }

    /// Serve frames until the host hangs up or shutdown fires.
    pub async fn serve<R, W>(self, reader: R, writer: W, mut shutdown: broadcast::Receiver<()>)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out, out_rx) = mpsc::channel(self.config.dev.channel_capacity.max(1));
        let writer_task = tokio::spawn(write_frames(writer, out_rx));

        let (changes_tx, changes) = mpsc::unbounded_channel();
        let _watcher = match watch_pages(self.config.paths.pages_dir.clone(), changes_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Page watcher unavailable; hot reload disabled");
                None
            }
        };
        let reloader = tokio::spawn(self.clone().reload_loop(changes, out.clone()));

        let mut lines = BufReader::new(reader).lines();
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match decode_frame::<HostMessage>(&line) {
                        Ok(HostMessage::Render { id, input }) => self.spawn_render(id, input, out.clone()),
                        Err(e) => tracing::warn!(error = %e, "Malformed host frame dropped"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Host channel read failed");
                        break;
                    }
                },
            }
        }

        reloader.abort();
        drop(out);
        let _ = writer_task.await;
        tracing::info!("Render worker stopped");
    }

    /// Render one request in its own task. The task keeps producing until
    /// it finishes or the channel to the host is gone.
    fn spawn_render(&self, id: u64, input: RenderInput, out: mpsc::Sender<WorkerMessage>) {
        let renderer = self.renderer.load_full();
        tokio::spawn(async move {
            tracing::debug!(render_id = id, pathname = %input.pathname, "Worker render started");
            let mut stream = match renderer.render_payload(&input).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = out.send(WorkerMessage::error(id, &e)).await;
                    return;
                }
            };
            while let Some(event) = stream.next().await {
                let frame = match event {
                    Ok(PayloadEvent::Chunk(bytes)) => WorkerMessage::buf(id, &bytes),
                    Ok(PayloadEvent::Module(module_id)) => WorkerMessage::ModuleId { id, module_id },
                    Err(e) => {
                        let _ = out.send(WorkerMessage::error(id, &AppError::from(e))).await;
                        return;
                    }
                };
                if out.send(frame).await.is_err() {
                    return;
                }
            }
            let _ = out.send(WorkerMessage::End { id }).await;
        });
    }

    async fn reload_loop(self, mut changes: mpsc::UnboundedReceiver<()>, out: mpsc::Sender<WorkerMessage>) {
        let debounce = Duration::from_millis(self.config.dev.debounce_ms);
        while changes.recv().await.is_some() {
            tokio::time::sleep(debounce).await;
            while changes.try_recv().is_ok() {}

            match self.reload() {
                Ok(()) => {
                    tracing::info!("Pages changed; modules reloaded");
                    if out.send(WorkerMessage::FullReload).await.is_err() {
                        return;
                    }
                }
                Err(e) => tracing::error!(error = %e, "Reload failed; keeping current modules"),
            }
        }
    }
}

fn watch_pages(dir: PathBuf, changes: mpsc::UnboundedSender<()>) -> Result<RecommendedWatcher, notify::Error> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                    tracing::debug!(paths = ?event.paths, "Page change detected");
                    let _ = changes.send(());
                }
            }
            Err(e) => tracing::error!(error = ?e, "Watch error"),
        },
        Config::default().with_poll_interval(Duration::from_secs(2)),
    )?;
    watcher.watch(&dir, RecursiveMode::Recursive)?;
    tracing::info!(path = ?dir, "Page watcher started");
    Ok(watcher)
}

/// Start a worker on a dedicated thread with its own runtime and return
/// the host end of the channel.
pub fn spawn_worker(config: Arc<AppConfig>, registrar: Registrar, shutdown: &Shutdown) -> Result<WorkerHost, StartupError> {
    let worker = Worker::new(config.clone(), registrar)?;
    let (host_io, worker_io) = tokio::io::duplex(CHANNEL_BUFFER);
    let shutdown_rx = shutdown.subscribe();

    std::thread::Builder::new()
        .name("render-worker".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!(error = %e, "Worker runtime failed to start");
                    return;
                }
            };
            let (reader, writer) = tokio::io::split(worker_io);
            runtime.block_on(worker.serve(reader, writer, shutdown_rx));
        })
        .map_err(WorkerError::Spawn)?;

    let (reader, writer) = tokio::io::split(host_io);
    tracing::info!("Render worker started");
    Ok(WorkerHost::connect(reader, writer, config.dev.channel_capacity))
}
