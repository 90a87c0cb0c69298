//! Per-client session state and socket pumps.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use swiftlink_protocol::{Command, FrameBuffer, SharedKey, TransferToken, encode};
use swiftlink_transfer::JobPool;

use crate::registry::ClientInfo;
use crate::{READ_BUFFER_SIZE, WRITE_TIMEOUT, reason};

/// Completion delivered by a reader task to the coordinating loop.
#[derive(Debug)]
pub(crate) enum SessionInput {
    Data { id: String, bytes: Vec<u8> },
    Closed { id: String, reason: String },
}

/// State of one connected client, owned by the coordinating loop.
pub(crate) struct Session {
    pub info: ClientInfo,
    pub frames: FrameBuffer,
    pub pool: JobPool,
    pub keep_alive_deadline: Instant,
    outbound: mpsc::Sender<Vec<u8>>,
    reader_cancel: CancellationToken,
}

impl Session {
    pub fn new(
        info: ClientInfo,
        pool: JobPool,
        outbound: mpsc::Sender<Vec<u8>>,
        reader_cancel: CancellationToken,
        keep_alive_deadline: Instant,
    ) -> Self {
        Self {
            info,
            frames: FrameBuffer::new(),
            pool,
            keep_alive_deadline,
            outbound,
            reader_cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.info.addr
    }

    /// Encodes and queues `payload` for the writer. Never blocks.
    pub fn send(&self, payload: &[u8], key: Option<&SharedKey>) -> bool {
        let frame = match encode(payload, key) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(client = %self.id(), "failed to encode frame: {e}");
                return false;
            }
        };
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(client = %self.id(), "send buffer full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(client = %self.id(), "writer closed, dropping frame");
                false
            }
        }
    }

    pub fn send_command(&self, command: &Command, key: Option<&SharedKey>) -> bool {
        self.send(command.to_string().as_bytes(), key)
    }

    pub fn send_tokens(&self, tokens: &[TransferToken], key: Option<&SharedKey>) {
        for token in tokens {
            self.send(token.to_string().as_bytes(), key);
        }
    }

    /// Stops the reader and releases the writer, which flushes what is
    /// queued and shuts the socket down.
    pub fn close(self) {
        self.reader_cancel.cancel();
    }
}

/// Reads from the socket until EOF, error or cancellation.
///
/// EOF and read errors are reported as [`SessionInput::Closed`]; a
/// cancelled reader reports nothing.
pub(crate) async fn read_pump(
    id: String,
    mut read: OwnedReadHalf,
    inbound: mpsc::Sender<SessionInput>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = read.read(&mut buf) => result,
        };

        let input = match result {
            Ok(0) => {
                debug!(client = %id, "peer closed connection");
                SessionInput::Closed {
                    id: id.clone(),
                    reason: reason::CONNECTION_CLOSED.into(),
                }
            }
            Ok(n) => {
                trace!(client = %id, bytes = n, "read");
                SessionInput::Data {
                    id: id.clone(),
                    bytes: buf[..n].to_vec(),
                }
            }
            Err(e) => {
                debug!(client = %id, "read error: {e}");
                SessionInput::Closed {
                    id: id.clone(),
                    reason: reason::CONNECTION_CLOSED.into(),
                }
            }
        };

        let closed = matches!(input, SessionInput::Closed { .. });
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = inbound.send(input) => {
                if sent.is_err() || closed {
                    return;
                }
            }
        }
    }
}

/// Writes queued frames in order. Exits when every sender is dropped or a
/// write fails, then shuts the socket down.
pub(crate) async fn write_pump(
    id: String,
    mut write: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(frame) = outbound.recv().await {
        match tokio::time::timeout(WRITE_TIMEOUT, write.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(client = %id, "write error: {e}");
                break;
            }
            Err(_) => {
                warn!(client = %id, "write timed out");
                break;
            }
        }
    }
    let _ = write.shutdown().await;
    trace!(client = %id, "writer stopped");
}
