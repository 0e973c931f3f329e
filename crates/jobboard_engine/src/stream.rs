use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use board_logging::{board_debug, board_info, board_trace, board_warn};
use futures_util::{SinkExt, StreamExt};
use jobboard_core::{
    decode_event_frame, decode_job_stream_frame, ConnectionState, FrameError, JobEvent, JobId,
    JobStreamFrame,
};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::sink::EventSink;

/// Text frame sent on every heartbeat tick.
pub const PING_FRAME: &str = r#"{"type":"ping"}"#;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Fixed pause between a failed or closed session and the next attempt.
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    /// Global job event stream.
    Events,
    /// Log and tool-use stream of one job.
    Job(JobId),
}

impl StreamTarget {
    pub fn path(&self) -> String {
        match self {
            StreamTarget::Events => "/ws/events".to_string(),
            StreamTarget::Job(id) => format!("/ws/jobs/{id}"),
        }
    }
}

/// Turns text frames into items. `Ok(None)` marks a protocol frame that is
/// consumed silently.
pub trait FrameDecoder: Send + Sync + 'static {
    type Item: Send + 'static;

    fn decode(&self, text: &str) -> Result<Option<Self::Item>, FrameError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JobEventDecoder;

impl FrameDecoder for JobEventDecoder {
    type Item = JobEvent;

    fn decode(&self, text: &str) -> Result<Option<JobEvent>, FrameError> {
        decode_event_frame(text)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JobStreamDecoder;

impl FrameDecoder for JobStreamDecoder {
    type Item = JobStreamFrame;

    fn decode(&self, text: &str) -> Result<Option<JobStreamFrame>, FrameError> {
        decode_job_stream_frame(text)
    }
}

/// Self-healing WebSocket connection.
///
/// Failures never reach the caller: they show up as [`ConnectionState`]
/// changes, followed by a new attempt after
/// [`StreamSettings::reconnect_delay`], until [`StreamConnection::disconnect`]
/// is called. Decoded items go to the sink in receipt order.
pub struct StreamConnection<D: FrameDecoder> {
    shared: Arc<Shared<D>>,
    session: Mutex<Option<CancellationToken>>,
}

struct Shared<D: FrameDecoder> {
    config: Config,
    target: StreamTarget,
    settings: StreamSettings,
    decoder: D,
    sink: Arc<dyn EventSink<D::Item>>,
    state: watch::Sender<ConnectionState>,
}

enum SessionEnd {
    Cancelled,
    Closed,
    Failed,
}

impl StreamConnection<JobEventDecoder> {
    /// Connection to the global `/ws/events` stream.
    pub fn events(
        config: Config,
        settings: StreamSettings,
        sink: Arc<dyn EventSink<JobEvent>>,
    ) -> Self {
        Self::new(config, StreamTarget::Events, settings, JobEventDecoder, sink)
    }
}

impl StreamConnection<JobStreamDecoder> {
    /// Connection to the `/ws/jobs/<id>` stream of one job.
    pub fn job(
        config: Config,
        job_id: JobId,
        settings: StreamSettings,
        sink: Arc<dyn EventSink<JobStreamFrame>>,
    ) -> Self {
        Self::new(
            config,
            StreamTarget::Job(job_id),
            settings,
            JobStreamDecoder,
            sink,
        )
    }
}

impl<D: FrameDecoder> StreamConnection<D> {
    pub fn new(
        config: Config,
        target: StreamTarget,
        settings: StreamSettings,
        decoder: D,
        sink: Arc<dyn EventSink<D::Item>>,
    ) -> Self {
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                target,
                settings,
                decoder,
                sink,
                state,
            }),
            session: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &StreamTarget {
        &self.shared.target
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Starts a session task unless one is connecting or connected already.
    /// A session waiting out its reconnect delay is replaced by a fresh attempt.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut session = self.lock_session();
        if session.is_some()
            && matches!(
                self.state(),
                ConnectionState::Connected | ConnectionState::Connecting
            )
        {
            return;
        }
        if let Some(previous) = session.take() {
            previous.cancel();
        }

        let token = CancellationToken::new();
        *session = Some(token.clone());
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.run(token).await });
    }

    /// Stops the session: cancels heartbeat, pending reconnect and socket,
    /// lands on `Disconnected`, and keeps it there until the next `connect`.
    pub fn disconnect(&self) {
        let mut session = self.lock_session();
        if let Some(token) = session.take() {
            token.cancel();
        }
        self.shared.state.send_if_modified(|state| {
            let changed = *state != ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            changed
        });
        board_info!("Stream {} disconnected on request", self.shared.target.path());
    }

    /// Whether a session task is alive (connected or waiting to reconnect).
    pub fn is_active(&self) -> bool {
        self.lock_session().is_some()
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D: FrameDecoder> Drop for StreamConnection<D> {
    fn drop(&mut self) {
        if let Some(token) = self.lock_session().take() {
            token.cancel();
        }
    }
}

impl<D: FrameDecoder> Shared<D> {
    async fn run(&self, token: CancellationToken) {
        let path = self.target.path();
        loop {
            if !self.publish(&token, ConnectionState::Connecting) {
                return;
            }

            match self.open(&path, &token).await {
                Ok(Some(socket)) => {
                    board_info!("Stream {} connected", path);
                    self.publish(&token, ConnectionState::Connected);
                    match self.pump(socket, &token).await {
                        SessionEnd::Cancelled => return,
                        SessionEnd::Closed => {
                            self.publish(&token, ConnectionState::Disconnected);
                        }
                        SessionEnd::Failed => {
                            self.publish(&token, ConnectionState::Error);
                        }
                    }
                }
                Ok(None) => return,
                Err(reason) => {
                    board_warn!("Stream {} failed to connect: {}", path, reason);
                    self.publish(&token, ConnectionState::Error);
                }
            }

            board_debug!(
                "Stream {} reconnecting in {:?}",
                path,
                self.settings.reconnect_delay
            );
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
        }
    }

    /// `Ok(None)` when cancelled while connecting.
    async fn open(&self, path: &str, token: &CancellationToken) -> Result<Option<Socket>, String> {
        let url = self.config.stream_url(path).map_err(|err| err.to_string())?;
        let attempt = tokio::time::timeout(
            self.settings.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        );
        tokio::select! {
            _ = token.cancelled() => Ok(None),
            result = attempt => match result {
                Ok(Ok((socket, _response))) => Ok(Some(socket)),
                Ok(Err(err)) => Err(err.to_string()),
                Err(_) => Err(format!("no handshake within {:?}", self.settings.connect_timeout)),
            },
        }
    }

    async fn pump(&self, socket: Socket, token: &CancellationToken) -> SessionEnd {
        let (mut writer, mut reader) = socket.split();
        let period = self.settings.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let close = writer.send(Message::Close(None));
                    let _ = tokio::time::timeout(Duration::from_secs(1), close).await;
                    return SessionEnd::Cancelled;
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = writer.send(Message::text(PING_FRAME)).await {
                        board_warn!("Stream heartbeat failed: {}", err);
                        return SessionEnd::Failed;
                    }
                    board_trace!("Stream heartbeat sent");
                }
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.handle_text(text),
                        Err(_) => board_warn!("Dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        board_info!("Stream closed by server: {:?}", frame);
                        return SessionEnd::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        board_warn!("Stream read failed: {}", err);
                        return SessionEnd::Failed;
                    }
                    None => return SessionEnd::Closed,
                },
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match self.decoder.decode(text) {
            Ok(Some(item)) => self.sink.emit(item),
            Ok(None) => board_trace!("Swallowed protocol frame"),
            Err(err) => board_warn!("Dropping malformed frame: {}", err),
        }
    }

    /// Moves to `next` unless the session was cancelled; a cancelled session
    /// no longer owns the state. Returns whether the session is still live.
    fn publish(&self, token: &CancellationToken, next: ConnectionState) -> bool {
        let mut live = false;
        self.state.send_if_modified(|state| {
            if token.is_cancelled() {
                return false;
            }
            live = true;
            if *state == next {
                return false;
            }
            board_debug!("Stream {} -> {}", state, next);
            *state = next;
            true
        });
        live
    }
}
