//! Byte and payload stream plumbing.
//!
//! Every render writes into a bounded `mpsc` channel and hands the receiver
//! out as a stream. A slow consumer fills the channel and the producer's
//! `send().await` parks, so backpressure reaches the serializer. Dropping
//! the stream closes the channel and the producer stops at its next send.

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::render::error::RenderError;

/// Response body stream.
pub type ByteStream = BoxStream<'static, Result<Bytes, RenderError>>;

/// One item produced by the payload serializer.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadEvent {
    /// Wire rows, UTF-8.
    Chunk(Bytes),
    /// A client module referenced by this render (prefetch manifest input).
    Module(String),
}

pub type PayloadStream = BoxStream<'static, Result<PayloadEvent, RenderError>>;

/// Sending half used by producers.
pub type EventSender<T> = mpsc::Sender<Result<T, RenderError>>;

/// Turn a channel receiver into a boxed stream.
pub fn receiver_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

/// Drop module notifications, keep the wire bytes.
pub fn payload_bytes(payload: PayloadStream) -> ByteStream {
    payload
        .filter_map(|event| async move {
            match event {
                Ok(PayloadEvent::Chunk(bytes)) => Some(Ok(bytes)),
                Ok(PayloadEvent::Module(_)) => None,
                Err(e) => Some(Err(e)),
            }
        })
        .boxed()
}

/// Wait for the first item so that an early failure becomes an `Err`
/// instead of a stream that aborts after headers are committed.
pub async fn settle<T: Send + 'static>(
    mut stream: BoxStream<'static, Result<T, RenderError>>,
) -> Result<BoxStream<'static, Result<T, RenderError>>, RenderError> {
    match stream.next().await {
        None => Ok(stream::empty().boxed()),
        Some(Err(e)) => Err(e),
        Some(Ok(first)) => Ok(stream::once(async move { Ok(first) }).chain(stream).boxed()),
    }
}

/// Read size for file bodies.
const FILE_CHUNK: usize = 16 * 1024;

/// Stream an open file in chunks of at most [`FILE_CHUNK`] bytes.
pub fn file_bytes(file: File) -> ByteStream {
    stream::unfold(Some(file), |file| async move {
        let mut file = file?;
        let mut buf = BytesMut::with_capacity(FILE_CHUNK);
        match file.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.freeze()), Some(file))),
            Err(e) => Some((Err(RenderError::Read(e.to_string())), None)),
        }
    })
    .boxed()
}

/// A stream of one in-memory body.
pub fn once_bytes(bytes: impl Into<Bytes>) -> ByteStream {
    let bytes = bytes.into();
    stream::once(async move { Ok(bytes) }).boxed()
}
