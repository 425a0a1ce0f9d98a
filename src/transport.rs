//! `Content-Length`-framed JSON transport.
//!
//! Generalizes `lsp_transport::transport::LspTransport::read_loop`
//! (background reader task decoding header-prefixed JSON off a child
//! process's stdout) and `debug::client::DebugClient::read_response`
//! (byte-at-a-time `Content-Length` header scan) into an async,
//! buffer-reassembling reader over any `AsyncRead`, so a message delivered
//! across an arbitrary split of read chunks decodes identically to one
//! delivered whole.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::message::Message;

/// One frame-processing outcome: either a successfully decoded message,
/// or a framing/decode problem that the caller should log and continue
/// from. A malformed header forces a full buffer discard (resync is
/// undefined); a malformed body does not.
#[derive(Debug)]
pub enum FrameEvent {
    Message(Message),
    InvalidMessage(String),
}

/// A framed bidirectional channel: `send` writes one message atomically,
/// a background task feeds decoded frames to the supplied handler.
pub struct Transport {
    writer: AsyncMutex<Option<Box<dyn AsyncWrite + Unpin + Send>>>,
    closed: Arc<AtomicBool>,
    reader_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Spawns the background reader loop over `reader`, and holds
    /// `writer` for outbound `send`s. `handler` is invoked once per
    /// decoded frame (message or framing error), in wire order.
    pub fn spawn<R, W, H>(reader: R, writer: W, mut handler: H) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        H: FnMut(FrameEvent) + Send + 'static,
    {
        let closed = Arc::new(AtomicBool::new(false));
        let task_closed = closed.clone();
        let reader_task = tokio::spawn(async move {
            read_loop(reader, &mut handler, &task_closed).await;
        });

        Self {
            writer: AsyncMutex::new(Some(Box::new(writer))),
            closed,
            reader_task: AsyncMutex::new(Some(reader_task)),
        }
    }

    /// Encodes and writes `message` as one `Content-Length`-framed body.
    /// Writes are serialized against concurrent `send`s.
    pub async fn send(&self, message: &Message) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TransportFailure("transport is closed".into()));
        }
        let body = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(Error::TransportFailure("transport is closed".into()));
        };
        let write_result = async {
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = write_result {
            error!("transport write failed, closing: {e}");
            self.closed.store(true, Ordering::SeqCst);
            *guard = None;
            return Err(Error::TransportFailure(format!("write failed: {e}")));
        }
        debug!("sent message seq={}", message.seq());
        Ok(())
    }

    /// Idempotent. Drops the writer half and aborts the reader task; no
    /// further handler invocations occur and further `send`s fail.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.writer.lock().await = None;
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn read_loop<R, H>(mut reader: R, handler: &mut H, closed: &AtomicBool)
where
    R: AsyncRead + Unpin + Send,
    H: FnMut(FrameEvent) + Send,
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        for event in drain_frames(&mut buffer) {
            handler(event);
        }

        if closed.load(Ordering::SeqCst) {
            return;
        }

        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!("transport reader reached EOF");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("transport read error: {e}");
                return;
            }
        };
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// Extracts as many complete frames as `buffer` currently holds,
/// draining consumed bytes. A malformed header discards the rest of the
/// buffer outright (protocol resync is undefined); a malformed body does
/// not — framing stays valid and the loop keeps going.
fn drain_frames(buffer: &mut Vec<u8>) -> Vec<FrameEvent> {
    let mut events = Vec::new();

    loop {
        let Some(header_end) = find_subsequence(buffer, b"\r\n\r\n") else {
            break;
        };

        let content_length = match parse_content_length(&buffer[..header_end]) {
            Some(n) => n,
            None => {
                events.push(FrameEvent::InvalidMessage(
                    "missing or malformed Content-Length header".into(),
                ));
                buffer.clear();
                break;
            }
        };

        let body_start = header_end + 4;
        let body_end = body_start + content_length;
        if buffer.len() < body_end {
            break;
        }

        match serde_json::from_slice::<Message>(&buffer[body_start..body_end]) {
            Ok(message) => events.push(FrameEvent::Message(message)),
            Err(e) => events.push(FrameEvent::InvalidMessage(format!(
                "failed to decode message body: {e}"
            ))),
        }

        buffer.drain(..body_end);
    }

    events
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_content_length(header_block: &[u8]) -> Option<usize> {
    let header_str = std::str::from_utf8(header_block).ok()?;
    for line in header_str.split("\r\n") {
        let mut parts = line.splitn(2, ':');
        let name = parts.next()?.trim();
        let value = parts.next()?.trim();
        if name.eq_ignore_ascii_case("content-length") {
            return value.parse::<usize>().ok();
        }
    }
    None
}
