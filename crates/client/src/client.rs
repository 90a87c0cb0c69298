//! Client connection.
//!
//! A single task owns the socket and the job pool. It reads frames, sends
//! keep-alives, ticks the pool, and serves requests from the
//! [`SwiftClient`] handle through a control channel.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use swiftlink_protocol::{Command, CommandType, FrameBuffer, SharedKey, TransferToken, encode};
use swiftlink_transfer::{JobEvent, JobPool, JobSnapshot, PoolConfig, TransferJob};

use crate::{
    CLIENT_DISCONNECT, CONNECT_RETRY_DELAY, CONNECTION_CLOSED, ClientConfig, ClientError,
    ClientEvent, WRITE_TIMEOUT,
};

const READ_BUFFER_SIZE: usize = 64 * 1024;

enum Control {
    Send {
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    SendFile {
        job: TransferJob,
        reply: oneshot::Sender<Result<String, ClientError>>,
    },
    AddReceive {
        destination: Option<PathBuf>,
        reply: oneshot::Sender<()>,
    },
    Jobs {
        reply: oneshot::Sender<Vec<JobSnapshot>>,
    },
    Disconnect,
}

/// State readable from the handle while the task runs.
#[derive(Default)]
struct Shared {
    client_id: Mutex<Option<String>>,
    connected: AtomicBool,
}

/// Handle to a connected SwiftLink client.
///
/// Dropping the handle closes the connection without sending `DISCONNECT`.
pub struct SwiftClient {
    shared: Arc<Shared>,
    control_tx: mpsc::Sender<Control>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SwiftClient {
    /// Connects to `config.address` and starts the connection task.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let stream = connect_with_retry(&config).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY: {e}");
        }
        let peer = stream.peer_addr()?;
        let (read, write) = stream.into_split();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(64);
        let shared = Arc::new(Shared::default());
        shared.connected.store(true, Ordering::Release);

        let mut pool = JobPool::new(PoolConfig {
            receive_dir: config.receive_dir.clone(),
            auto_receive: config.auto_receive,
            ..PoolConfig::default()
        });
        let transfer_events = event_tx.clone();
        pool.set_observer(Arc::new(move |event: &JobEvent| {
            let _ = transfer_events.send(ClientEvent::Transfer(event.clone()));
        }));

        let connection = Connection {
            read,
            write,
            frames: FrameBuffer::new(),
            pool,
            key: SharedKey::from_optional(config.shared_secret.as_deref()),
            shared: Arc::clone(&shared),
            events: event_tx,
        };
        info!(%peer, encrypted = connection.key.is_some(), "connected to server");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(connection.run(
            control_rx,
            cancel.clone(),
            config.keep_alive_interval,
            config.poll_interval,
        ));

        Ok(Self {
            shared,
            control_tx,
            event_rx: Mutex::new(Some(event_rx)),
            cancel,
            task: tokio::sync::Mutex::new(Some(task)),
        })
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// ID assigned by the server, once `CONNECTED` has arrived.
    pub fn client_id(&self) -> Option<String> {
        self.shared
            .client_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Sends a raw payload to the server.
    pub async fn send_message(&self, payload: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        let payload = payload.into();
        self.request(|reply| Control::Send { payload, reply }).await?
    }

    /// Starts sending `path` under its file name. Returns the job ID.
    pub async fn send_file(&self, path: impl Into<PathBuf>) -> Result<String, ClientError> {
        let job = TransferJob::transmit(path);
        self.request(|reply| Control::SendFile { job, reply }).await?
    }

    /// Starts sending `path`, announced as `remote_path` on the server.
    pub async fn send_file_as(
        &self,
        path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
    ) -> Result<String, ClientError> {
        let job = TransferJob::transmit_as(path, remote_path);
        self.request(|reply| Control::SendFile { job, reply }).await?
    }

    /// Registers a receive job for the next file the server announces.
    ///
    /// With `Some(destination)` the file is stored there instead of under
    /// the receive directory.
    pub async fn add_receive_job(&self, destination: Option<PathBuf>) -> Result<(), ClientError> {
        self.request(|reply| Control::AddReceive { destination, reply })
            .await
    }

    pub async fn jobs(&self) -> Result<Vec<JobSnapshot>, ClientError> {
        self.request(|reply| Control::Jobs { reply }).await
    }

    /// Sends `DISCONNECT` and waits for the connection task to finish.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let handle = self.task.lock().await.take();
        let Some(handle) = handle else {
            return Err(ClientError::NotConnected);
        };
        if self.control_tx.send(Control::Disconnect).await.is_err() {
            self.cancel.cancel();
        }
        if let Err(e) = handle.await {
            warn!("connection task failed: {e}");
        }
        Ok(())
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Control,
    ) -> Result<T, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| ClientError::NotConnected)?;
        reply_rx.await.map_err(|_| ClientError::NotConnected)
    }
}

impl Drop for SwiftClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn connect_with_retry(config: &ClientConfig) -> Result<TcpStream, ClientError> {
    let attempts = config.connect_attempts.max(1);
    for attempt in 1..=attempts {
        match tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.address.as_str())).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => warn!(address = %config.address, attempt, "connect failed: {e}"),
            Err(_) => warn!(address = %config.address, attempt, "connect timed out"),
        }
        if attempt < attempts {
            tokio::time::sleep(CONNECT_RETRY_DELAY).await;
        }
    }
    Err(ClientError::Connect {
        address: config.address.clone(),
        attempts,
    })
}

/// Socket halves and protocol state owned by the connection task.
struct Connection {
    read: OwnedReadHalf,
    write: OwnedWriteHalf,
    frames: FrameBuffer,
    pool: JobPool,
    key: Option<SharedKey>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Connection {
    async fn run(
        mut self,
        control_rx: mpsc::Receiver<Control>,
        cancel: CancellationToken,
        keep_alive_interval: Duration,
        poll_interval: Duration,
    ) {
        let reason = self
            .serve(control_rx, &cancel, keep_alive_interval, poll_interval)
            .await;

        self.shared.connected.store(false, Ordering::Release);
        let _ = self.write.shutdown().await;
        info!(reason = %reason, "disconnected from server");
        self.emit(ClientEvent::Disconnected { reason });
    }

    /// Runs until the connection ends and returns the reason.
    async fn serve(
        &mut self,
        mut control_rx: mpsc::Receiver<Control>,
        cancel: &CancellationToken,
        keep_alive_interval: Duration,
        poll_interval: Duration,
    ) -> String {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let mut keep_alive =
            tokio::time::interval_at(Instant::now() + keep_alive_interval, keep_alive_interval);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll = tokio::time::interval(poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return CLIENT_DISCONNECT.to_string(),

                result = self.read.read(&mut buf) => match result {
                    Ok(0) => return CONNECTION_CLOSED.to_string(),
                    Ok(n) => {
                        trace!(bytes = n, "read");
                        if let Some(reason) = self.on_data(&buf[..n]).await {
                            return reason;
                        }
                    }
                    Err(e) => {
                        debug!("read error: {e}");
                        return CONNECTION_CLOSED.to_string();
                    }
                },

                Some(control) = control_rx.recv() => {
                    if let Some(reason) = self.on_control(control).await {
                        return reason;
                    }
                }

                _ = keep_alive.tick() => {
                    if let Err(e) = self.send_command(CommandType::KeepAlive, "").await {
                        return e.to_string();
                    }
                }

                _ = poll.tick() => {
                    let tokens = self.pool.poll();
                    if let Err(e) = self.send_tokens(&tokens).await {
                        return e.to_string();
                    }
                }
            }
        }
    }

    /// Handles bytes from the server. Returns a reason when the
    /// connection must end.
    async fn on_data(&mut self, bytes: &[u8]) -> Option<String> {
        self.frames.push(bytes);
        for payload in self.frames.drain(self.key.as_ref()) {
            let text = String::from_utf8_lossy(&payload);

            if Command::is_command(&text) {
                let Some(cmd) = Command::parse(&text) else {
                    debug!(command = %text, "unparseable command");
                    continue;
                };
                match cmd.kind {
                    CommandType::Connected => {
                        info!(client = %cmd.message, "server assigned client id");
                        *self
                            .shared
                            .client_id
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner) = Some(cmd.message.clone());
                        self.emit(ClientEvent::Connected {
                            client_id: cmd.message,
                        });
                    }
                    CommandType::Kick | CommandType::Disconnect => {
                        warn!(kind = ?cmd.kind, reason = %cmd.message, "server ended the session");
                        return Some(cmd.message);
                    }
                    CommandType::Success | CommandType::Failure | CommandType::KeepAlive => {
                        debug!(kind = ?cmd.kind, "command reply");
                    }
                }
                continue;
            }

            if let Some(token) = TransferToken::parse(&text) {
                let replies = self.pool.dispatch(std::slice::from_ref(&token));
                if let Err(e) = self.send_tokens(&replies).await {
                    return Some(e.to_string());
                }
            }
            self.emit(ClientEvent::MessageReceived {
                message: text.into_owned(),
            });
        }
        None
    }

    async fn on_control(&mut self, control: Control) -> Option<String> {
        match control {
            Control::Send { payload, reply } => match self.write_frame(&payload).await {
                Ok(()) => {
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    let reason = e.to_string();
                    let _ = reply.send(Err(e));
                    return Some(reason);
                }
            },
            Control::SendFile { job, reply } => match self.pool.submit(job) {
                Ok((job_id, mut tokens)) => {
                    tokens.extend(self.pool.poll());
                    info!(job = %job_id, "file transfer queued");
                    let sent = self.send_tokens(&tokens).await;
                    let _ = reply.send(Ok(job_id));
                    if let Err(e) = sent {
                        return Some(e.to_string());
                    }
                }
                Err(e) => {
                    let _ = reply.send(Err(e.into()));
                }
            },
            Control::AddReceive { destination, reply } => {
                self.pool.register_receive(destination);
                let _ = reply.send(());
            }
            Control::Jobs { reply } => {
                let _ = reply.send(self.pool.jobs());
            }
            Control::Disconnect => {
                if let Err(e) = self.send_command(CommandType::Disconnect, "").await {
                    debug!("failed to send disconnect: {e}");
                }
                return Some(CLIENT_DISCONNECT.to_string());
            }
        }
        None
    }

    async fn send_command(&mut self, kind: CommandType, message: &str) -> Result<(), ClientError> {
        self.write_frame(Command::new(kind, message).to_string().as_bytes())
            .await
    }

    async fn send_tokens(&mut self, tokens: &[TransferToken]) -> Result<(), ClientError> {
        for token in tokens {
            self.write_frame(token.to_string().as_bytes()).await?;
        }
        Ok(())
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        let frame = encode(payload, self.key.as_ref())?;
        tokio::time::timeout(WRITE_TIMEOUT, self.write.write_all(&frame))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))??;
        Ok(())
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}
