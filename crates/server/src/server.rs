//! Connection manager.
//!
//! One coordinating loop owns every session. Accepts, reader completions,
//! API requests and the periodic sweep all arrive as `select!` branches, so
//! session state is never shared across tasks. Each client has a reader task
//! feeding the loop and a writer task draining its outbound queue.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use swiftlink_protocol::{Command, CommandType, SharedKey, TransferToken};
use swiftlink_transfer::{JobEvent, JobPool, JobSnapshot, PoolConfig, TransferJob};

use crate::events::ServerEvent;
use crate::registry::{ClientInfo, SessionRegistry};
use crate::session::{self, Session, SessionInput};
use crate::{SEND_BUFFER_SIZE, ServerConfig, ServerError, reason};

/// Requests from API callers to the coordinating loop.
enum Control {
    Kick {
        id: String,
        reason: String,
        reply: oneshot::Sender<bool>,
    },
    Send {
        id: String,
        payload: Vec<u8>,
        reply: oneshot::Sender<bool>,
    },
    SendFile {
        id: String,
        job: TransferJob,
        reply: oneshot::Sender<Option<Result<String, ServerError>>>,
    },
    Jobs {
        id: String,
        reply: oneshot::Sender<Option<Vec<JobSnapshot>>>,
    },
}

/// State owned by the running loop.
struct LoopState {
    sessions: HashMap<String, Session>,
    inbound_tx: mpsc::Sender<SessionInput>,
}

/// Multi-client SwiftLink server.
pub struct ConnectionManager {
    config: ServerConfig,
    key: Option<SharedKey>,
    registry: SessionRegistry,
    cancel: CancellationToken,
    running: AtomicBool,
    local_addr: tokio::sync::Mutex<Option<SocketAddr>>,
    control_tx: mpsc::Sender<Control>,
    control_rx: Mutex<Option<mpsc::Receiver<Control>>>,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ServerEvent>>>,
}

impl ConnectionManager {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let key = SharedKey::from_optional(config.shared_secret.as_deref());
        let (control_tx, control_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            key,
            registry: SessionRegistry::new(),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
            local_addr: tokio::sync::Mutex::new(None),
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        self.registry.snapshot()
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    pub fn find_client(&self, id: &str) -> Option<ClientInfo> {
        self.registry.get(id)
    }

    /// Kicks every client and stops the loop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Sends `KICK` with `reason` and drops the client.
    pub async fn kick(&self, id: &str, reason: &str) -> Result<(), ServerError> {
        let found = self
            .request(|reply| Control::Kick {
                id: id.to_string(),
                reason: reason.to_string(),
                reply,
            })
            .await?;
        found
            .then_some(())
            .ok_or_else(|| ServerError::ClientNotFound(id.to_string()))
    }

    /// Sends a raw payload to one client.
    pub async fn send_message(&self, id: &str, payload: impl Into<Vec<u8>>) -> Result<(), ServerError> {
        let found = self
            .request(|reply| Control::Send {
                id: id.to_string(),
                payload: payload.into(),
                reply,
            })
            .await?;
        found
            .then_some(())
            .ok_or_else(|| ServerError::ClientNotFound(id.to_string()))
    }

    /// Starts sending `path` to a client. Returns the transfer job ID.
    pub async fn send_file(&self, id: &str, path: impl Into<PathBuf>) -> Result<String, ServerError> {
        let job = TransferJob::transmit(path);
        self.request(|reply| Control::SendFile {
            id: id.to_string(),
            job,
            reply,
        })
        .await?
        .ok_or_else(|| ServerError::ClientNotFound(id.to_string()))?
    }

    /// Snapshots of a client's transfer jobs.
    pub async fn jobs(&self, id: &str) -> Result<Vec<JobSnapshot>, ServerError> {
        self.request(|reply| Control::Jobs {
            id: id.to_string(),
            reply,
        })
        .await?
        .ok_or_else(|| ServerError::ClientNotFound(id.to_string()))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Control,
    ) -> Result<T, ServerError> {
        if !self.is_running() {
            return Err(ServerError::NotRunning);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| ServerError::NotRunning)?;
        reply_rx.await.map_err(|_| ServerError::NotRunning)
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    /// Runs the server until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let mut control_rx = self
            .control_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ServerError::AlreadyRunning)?;

        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        self.running.store(true, Ordering::Release);
        info!(
            %local_addr,
            key = ?self.key.as_ref().map(SharedKey::fingerprint),
            max_clients = self.config.max_clients,
            "server listening"
        );

        let (inbound_tx, mut inbound_rx) = mpsc::channel(SEND_BUFFER_SIZE);
        let mut state = LoopState {
            sessions: HashMap::new(),
            inbound_tx,
        };

        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!(clients = state.sessions.len(), "server shutting down");
                    let ids: Vec<String> = state.sessions.keys().cloned().collect();
                    for id in ids {
                        self.kick_session(&mut state, &id, reason::SHUTTING_DOWN);
                    }
                    break;
                }

                // Streaming clients keep the inbound branch ready, so it
                // is polled after the timer and accepts.
                _ = sweep.tick() => {
                    self.on_sweep(&mut state);
                }

                Some(control) = control_rx.recv() => {
                    self.on_control(&mut state, control);
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.on_accept(&mut state, stream, peer_addr),
                        Err(e) => error!("accept error: {e}"),
                    }
                }

                Some(input) = inbound_rx.recv() => {
                    match input {
                        SessionInput::Data { id, bytes } => self.on_data(&mut state, &id, &bytes),
                        SessionInput::Closed { id, reason } => self.on_closed(&mut state, &id, &reason),
                    }
                }
            }
        }

        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn on_accept(&self, state: &mut LoopState, stream: TcpStream, peer_addr: SocketAddr) {
        let info = match self.registry.allocate_id(peer_addr) {
            Ok(info) => info,
            Err(e) => {
                error!(%peer_addr, "dropping connection: {e}");
                return;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer_addr, "failed to set TCP_NODELAY: {e}");
        }

        let id = info.id.clone();
        let (read, write) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel(SEND_BUFFER_SIZE);
        tokio::spawn(session::write_pump(id.clone(), write, out_rx));

        let reader_cancel = self.cancel.child_token();
        tokio::spawn(session::read_pump(
            id.clone(),
            read,
            state.inbound_tx.clone(),
            reader_cancel.clone(),
        ));

        let session = Session::new(
            info.clone(),
            self.new_pool(&id),
            out_tx,
            reader_cancel,
            Instant::now() + self.config.keep_alive,
        );
        session.send_command(&Command::new(CommandType::Connected, id.clone()), self.key.as_ref());
        state.sessions.insert(id.clone(), session);

        info!(client = %id, %peer_addr, "client connected");
        self.emit(ServerEvent::ClientConnected(info));

        if state.sessions.len() > self.config.max_clients {
            self.kick_session(state, &id, reason::TOO_MANY_CLIENTS);
        }
    }

    fn new_pool(&self, client_id: &str) -> JobPool {
        let mut pool = JobPool::new(PoolConfig {
            receive_dir: self.config.receive_dir.clone(),
            auto_receive: self.config.auto_receive,
            max_jobs: self.config.max_jobs,
            ..PoolConfig::default()
        });

        let events = self.event_tx.clone();
        let client_id = client_id.to_string();
        pool.set_observer(Arc::new(move |event: &JobEvent| {
            let _ = events.send(ServerEvent::Transfer {
                client_id: client_id.clone(),
                event: event.clone(),
            });
        }));
        pool
    }

    fn on_data(&self, state: &mut LoopState, id: &str, bytes: &[u8]) {
        let Some(session) = state.sessions.get_mut(id) else {
            debug!(client = %id, "data for unknown session ignored");
            return;
        };
        let key = self.key.as_ref();

        session.frames.push(bytes);
        let payloads = session.frames.drain(key);
        if payloads.is_empty() {
            return;
        }
        session.keep_alive_deadline = Instant::now() + self.config.keep_alive;

        let mut disconnect = false;
        for payload in payloads {
            let text = String::from_utf8_lossy(&payload);

            if Command::is_command(&text) {
                match Command::parse(&text) {
                    Some(cmd) if cmd.kind == CommandType::KeepAlive => {
                        session.send_command(&Command::new(CommandType::Success, ""), key);
                    }
                    Some(cmd) if cmd.kind == CommandType::Disconnect => {
                        disconnect = true;
                        break;
                    }
                    _ => {
                        debug!(client = %id, command = %text, "unsupported command");
                        session.send_command(&Command::new(CommandType::Failure, ""), key);
                    }
                }
                continue;
            }

            if let Some(token) = TransferToken::parse(&text) {
                let replies = session.pool.dispatch(std::slice::from_ref(&token));
                session.send_tokens(&replies, key);
            }
            self.emit(ServerEvent::MessageReceived {
                client_id: id.to_string(),
                message: text.into_owned(),
            });
        }

        if disconnect {
            self.kick_session(state, id, reason::REQUESTED);
        }
    }

    fn on_closed(&self, state: &mut LoopState, id: &str, reason: &str) {
        if let Some(session) = state.sessions.remove(id) {
            info!(client = %id, addr = %session.addr(), reason, "client disconnected");
            self.finish_session(session, reason);
        }
    }

    fn on_control(&self, state: &mut LoopState, control: Control) {
        let key = self.key.as_ref();
        match control {
            Control::Kick { id, reason, reply } => {
                let _ = reply.send(self.kick_session(state, &id, &reason));
            }
            Control::Send { id, payload, reply } => {
                let sent = state
                    .sessions
                    .get(&id)
                    .is_some_and(|session| session.send(&payload, key));
                let _ = reply.send(sent);
            }
            Control::SendFile { id, job, reply } => {
                let result = state.sessions.get_mut(&id).map(|session| {
                    let (job_id, mut tokens) = session.pool.submit(job)?;
                    tokens.extend(session.pool.poll());
                    session.send_tokens(&tokens, key);
                    info!(client = %id, job = %job_id, "file transfer queued");
                    Ok(job_id)
                });
                let _ = reply.send(result);
            }
            Control::Jobs { id, reply } => {
                let _ = reply.send(state.sessions.get(&id).map(|s| s.pool.jobs()));
            }
        }
    }

    fn on_sweep(&self, state: &mut LoopState) {
        let now = Instant::now();
        let expired: Vec<String> = state
            .sessions
            .values()
            .filter(|session| now >= session.keep_alive_deadline)
            .map(|session| session.id().to_string())
            .collect();
        for id in expired {
            self.kick_session(state, &id, reason::KEEP_ALIVE_TIMEOUT);
        }

        let key = self.key.as_ref();
        for session in state.sessions.values_mut() {
            let tokens = session.pool.poll();
            session.send_tokens(&tokens, key);
        }
    }

    /// Removes a session after a best-effort `KICK`. Returns false if the
    /// client was not connected.
    fn kick_session(&self, state: &mut LoopState, id: &str, reason: &str) -> bool {
        let Some(session) = state.sessions.remove(id) else {
            return false;
        };
        warn!(client = %id, addr = %session.addr(), reason, "kicking client");
        session.send_command(&Command::new(CommandType::Kick, reason), self.key.as_ref());
        self.finish_session(session, reason);
        true
    }

    fn finish_session(&self, session: Session, reason: &str) {
        let client = self
            .registry
            .remove(session.id())
            .unwrap_or_else(|| session.info.clone());
        session.close();
        self.emit(ServerEvent::ClientDisconnected {
            client,
            reason: reason.to_string(),
        });
    }

    fn emit(&self, event: ServerEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use swiftlink_protocol::{FrameBuffer, encode};
    use swiftlink_transfer::JobStatus;

    use super::*;

    const SECRET: &str = "Testing123";

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            shared_secret: Some(SECRET.into()),
            ..ServerConfig::default()
        }
    }

    async fn start(config: ServerConfig) -> (Arc<ConnectionManager>, SocketAddr) {
        let server = ConnectionManager::new(config);
        let s = Arc::clone(&server);
        tokio::spawn(async move { s.run().await });
        for _ in 0..100 {
            if let Some(addr) = server.local_addr().await {
                return (server, ([127, 0, 0, 1], addr.port()).into());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server did not start");
    }

    /// Minimal peer speaking the wire format directly.
    struct Peer {
        stream: TcpStream,
        frames: FrameBuffer,
        key: Option<SharedKey>,
        queue: Vec<String>,
    }

    impl Peer {
        async fn connect(addr: SocketAddr) -> Self {
            Self {
                stream: TcpStream::connect(addr).await.unwrap(),
                frames: FrameBuffer::new(),
                key: Some(SharedKey::from_secret(SECRET)),
                queue: Vec::new(),
            }
        }

        async fn send(&mut self, text: &str) {
            let frame = encode(text.as_bytes(), self.key.as_ref()).unwrap();
            self.stream.write_all(&frame).await.unwrap();
        }

        /// Next payload, or `None` on EOF or after two seconds.
        async fn recv(&mut self) -> Option<String> {
            let mut buf = vec![0u8; 65536];
            loop {
                if !self.queue.is_empty() {
                    return Some(self.queue.remove(0));
                }
                let n = tokio::time::timeout(Duration::from_secs(2), self.stream.read(&mut buf))
                    .await
                    .ok()?
                    .ok()?;
                if n == 0 {
                    return None;
                }
                self.frames.push(&buf[..n]);
                for payload in self.frames.drain(self.key.as_ref()) {
                    self.queue.push(String::from_utf8(payload).unwrap());
                }
            }
        }

        async fn recv_command(&mut self) -> Command {
            let text = self.recv().await.expect("expected a payload");
            Command::parse(&text).expect("expected a command")
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event timeout")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn connect_assigns_id() {
        let (server, addr) = start(test_config()).await;
        let mut events = server.take_events().unwrap();
        assert!(server.take_events().is_none());

        let mut peer = Peer::connect(addr).await;
        let cmd = peer.recv_command().await;
        assert_eq!(cmd.kind, CommandType::Connected);
        assert_eq!(cmd.message.len(), 4);

        let ServerEvent::ClientConnected(info) = next_event(&mut events).await else {
            panic!("expected ClientConnected");
        };
        assert_eq!(info.id, cmd.message);
        assert_eq!(server.client_count(), 1);
        assert!(server.find_client(&info.id).is_some());
        assert_eq!(server.clients()[0].id, info.id);

        server.shutdown();
    }

    #[tokio::test]
    async fn keep_alive_gets_success_and_unknown_gets_failure() {
        let (server, addr) = start(test_config()).await;
        let mut peer = Peer::connect(addr).await;
        peer.recv_command().await;

        peer.send("SWIFTCMD-1|").await;
        assert_eq!(peer.recv_command().await.kind, CommandType::Success);

        peer.send("SWIFTCMD-400|").await;
        assert_eq!(peer.recv_command().await.kind, CommandType::Failure);

        peer.send("SWIFTCMD-999|bogus").await;
        assert_eq!(peer.recv_command().await.kind, CommandType::Failure);

        server.shutdown();
    }

    #[tokio::test]
    async fn silent_client_is_evicted_once() {
        let config = ServerConfig {
            keep_alive: Duration::from_millis(200),
            sweep_interval: Duration::from_millis(50),
            ..test_config()
        };
        let (server, addr) = start(config).await;
        let mut events = server.take_events().unwrap();
        let mut peer = Peer::connect(addr).await;
        peer.recv_command().await;

        let kick = peer.recv_command().await;
        assert_eq!(kick.kind, CommandType::Kick);
        assert_eq!(kick.message, reason::KEEP_ALIVE_TIMEOUT);
        assert!(peer.recv().await.is_none());

        assert!(matches!(next_event(&mut events).await, ServerEvent::ClientConnected(_)));
        let ServerEvent::ClientDisconnected { reason: why, .. } = next_event(&mut events).await else {
            panic!("expected ClientDisconnected");
        };
        assert_eq!(why, reason::KEEP_ALIVE_TIMEOUT);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(server.client_count(), 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn keep_alives_prevent_eviction() {
        let config = ServerConfig {
            keep_alive: Duration::from_millis(300),
            sweep_interval: Duration::from_millis(50),
            ..test_config()
        };
        let (server, addr) = start(config).await;
        let mut peer = Peer::connect(addr).await;
        peer.recv_command().await;

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            peer.send("SWIFTCMD-1|").await;
            assert_eq!(peer.recv_command().await.kind, CommandType::Success);
        }
        assert_eq!(server.client_count(), 1);

        server.shutdown();
    }

    #[tokio::test]
    async fn disconnect_command_kicks_with_requested() {
        let (server, addr) = start(test_config()).await;
        let mut events = server.take_events().unwrap();
        let mut peer = Peer::connect(addr).await;
        peer.recv_command().await;

        peer.send("SWIFTCMD-201|").await;
        let kick = peer.recv_command().await;
        assert_eq!(kick.kind, CommandType::Kick);
        assert_eq!(kick.message, reason::REQUESTED);

        next_event(&mut events).await;
        let ServerEvent::ClientDisconnected { reason: why, .. } = next_event(&mut events).await else {
            panic!("expected ClientDisconnected");
        };
        assert_eq!(why, reason::REQUESTED);

        server.shutdown();
    }

    #[tokio::test]
    async fn disconnect_is_reported_after_event_backlog() {
        let (server, addr) = start(test_config()).await;
        let mut events = server.take_events().unwrap();
        let mut peer = Peer::connect(addr).await;
        peer.recv_command().await;

        for n in 0..600 {
            peer.send(&format!("message {n}")).await;
        }
        peer.send("SWIFTCMD-201|").await;
        assert_eq!(peer.recv_command().await.kind, CommandType::Kick);

        let mut messages = 0;
        let mut disconnects = 0;
        loop {
            match next_event(&mut events).await {
                ServerEvent::MessageReceived { .. } => messages += 1,
                ServerEvent::ClientDisconnected { reason: why, .. } => {
                    assert_eq!(why, reason::REQUESTED);
                    disconnects += 1;
                    break;
                }
                _ => {}
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, ServerEvent::ClientDisconnected { .. }));
        }
        assert_eq!(messages, 600);
        assert_eq!(disconnects, 1);
        assert_eq!(server.client_count(), 0);

        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn silent_client_is_evicted_while_another_streams() {
        let config = ServerConfig {
            keep_alive: Duration::from_millis(200),
            sweep_interval: Duration::from_millis(50),
            ..test_config()
        };
        let (server, addr) = start(config).await;
        let mut events = server.take_events().unwrap();

        let mut busy = Peer::connect(addr).await;
        let busy_id = busy.recv_command().await.message;
        let mut silent = Peer::connect(addr).await;
        let silent_id = silent.recv_command().await.message;

        let streamer = tokio::spawn(async move {
            let deadline = Instant::now() + Duration::from_secs(1);
            while Instant::now() < deadline {
                busy.send("chunk of chatter").await;
            }
            busy
        });

        let kick = silent.recv_command().await;
        assert_eq!(kick.kind, CommandType::Kick);
        assert_eq!(kick.message, reason::KEEP_ALIVE_TIMEOUT);

        let evicted = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(ServerEvent::ClientDisconnected { client, .. }) = events.recv().await {
                    return client.id;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(evicted, silent_id);
        assert!(server.find_client(&busy_id).is_some());

        let _busy = streamer.await.unwrap();
        server.shutdown();
    }

    #[tokio::test]
    async fn peer_close_is_reported() {
        let (server, addr) = start(test_config()).await;
        let mut events = server.take_events().unwrap();
        let mut peer = Peer::connect(addr).await;
        peer.recv_command().await;
        next_event(&mut events).await;

        drop(peer);
        let ServerEvent::ClientDisconnected { reason: why, .. } = next_event(&mut events).await else {
            panic!("expected ClientDisconnected");
        };
        assert_eq!(why, reason::CONNECTION_CLOSED);
        assert_eq!(server.client_count(), 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn clients_over_limit_are_kicked() {
        let config = ServerConfig {
            max_clients: 1,
            ..test_config()
        };
        let (server, addr) = start(config).await;

        let mut first = Peer::connect(addr).await;
        first.recv_command().await;

        let mut second = Peer::connect(addr).await;
        assert_eq!(second.recv_command().await.kind, CommandType::Connected);
        let kick = second.recv_command().await;
        assert_eq!(kick.kind, CommandType::Kick);
        assert_eq!(kick.message, reason::TOO_MANY_CLIENTS);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.client_count(), 1);

        server.shutdown();
    }

    #[tokio::test]
    async fn messages_are_reported_and_sent() {
        let (server, addr) = start(test_config()).await;
        let mut events = server.take_events().unwrap();
        let mut peer = Peer::connect(addr).await;
        let id = peer.recv_command().await.message;
        next_event(&mut events).await;

        peer.send("hello server").await;
        let ServerEvent::MessageReceived { client_id, message } = next_event(&mut events).await
        else {
            panic!("expected MessageReceived");
        };
        assert_eq!(client_id, id);
        assert_eq!(message, "hello server");

        server.send_message(&id, "hello client").await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("hello client"));

        assert!(matches!(
            server.send_message("nope", "x").await,
            Err(ServerError::ClientNotFound(_))
        ));

        server.shutdown();
    }

    #[tokio::test]
    async fn api_kick_and_shutdown() {
        let (server, addr) = start(test_config()).await;
        let mut a = Peer::connect(addr).await;
        let a_id = a.recv_command().await.message;
        let mut b = Peer::connect(addr).await;
        b.recv_command().await;

        server.kick(&a_id, "bye").await.unwrap();
        let kick = a.recv_command().await;
        assert_eq!(kick.kind, CommandType::Kick);
        assert_eq!(kick.message, "bye");
        assert!(server.kick(&a_id, "again").await.is_err());

        server.shutdown();
        let kick = b.recv_command().await;
        assert_eq!(kick.message, reason::SHUTTING_DOWN);
    }

    #[tokio::test]
    async fn api_before_run_is_rejected() {
        let server = ConnectionManager::new(test_config());
        assert!(matches!(server.jobs("Ab12").await, Err(ServerError::NotRunning)));
        assert!(server.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn incoming_file_is_received() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ServerConfig {
            receive_dir: dir.path().to_path_buf(),
            ..test_config()
        };
        let (server, addr) = start(config).await;
        let mut peer = Peer::connect(addr).await;
        let client_id = peer.recv_command().await.message;

        peer.send("SWHD^^hello.txt^^Ab12^^5").await;
        peer.send(&TransferToken::data("Ab12", b"hello").to_string()).await;
        assert_eq!(peer.recv().await.as_deref(), Some("SWAK^^Ab12"));
        peer.send("SWDD^^Ab12^^1").await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let jobs = server.jobs(&client_id).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Success);
        assert_eq!(std::fs::read(dir.path().join("hello.txt")).unwrap(), b"hello");

        server.shutdown();
    }

    #[tokio::test]
    async fn send_file_to_client() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"payload").unwrap();

        let (server, addr) = start(test_config()).await;
        let mut peer = Peer::connect(addr).await;
        let client_id = peer.recv_command().await.message;

        let job_id = server.send_file(&client_id, &path).await.unwrap();
        assert_eq!(peer.recv().await, Some(format!("SWHD^^out.bin^^{job_id}^^7")));
        let data = peer.recv().await.unwrap();
        assert!(data.starts_with(&format!("SWFD^^{job_id}^^")));

        peer.send(&format!("SWAK^^{job_id}")).await;
        assert_eq!(peer.recv().await, Some(format!("SWDD^^{job_id}^^1")));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let jobs = server.jobs(&client_id).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Success);

        server.shutdown();
    }
}
