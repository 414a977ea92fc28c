//! Gateway session handle and connection worker.
//!
//! `GatewaySession::connect` opens the websocket and spawns a worker task
//! that owns it. The worker reads frames, runs the heartbeat, forwards
//! dispatches to the sink and follows server-signaled reconnects on its own.
//! Everything else (transport errors, zombie connections) ends the worker and
//! is reported through [`GatewaySession::wait`]; the owner decides whether to
//! connect again.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::gateway::heartbeat::{next_tick, HeartbeatAction};
use crate::gateway::proto::{ClientFrame, ConnectionProperties, GatewayFrame, IdentifyMsg, ResumeMsg};
use crate::gateway::sink::EventSink;
use crate::gateway::state::{ConnectionState, FrameAction, SessionSnapshot, SessionState};
use crate::intents::Intents;

type GatewaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GatewayDefaults;

impl GatewayDefaults {
    pub const ENDPOINT: &'static str = "wss://gateway.discord.gg/?v=10&encoding=json";
    /// Wait before following a server reconnect request.
    pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);
    /// Wait before identifying again after a rejected session.
    pub const INVALID_SESSION_DELAY: Duration = Duration::from_secs(5);
}

/// Credentials and tuning for a gateway session.
#[derive(Clone)]
pub struct GatewayConfig {
    token: SecretString,
    pub intents: Intents,
    pub endpoint: String,
    pub reconnect_delay: Duration,
    pub invalid_session_delay: Duration,
    pub properties: ConnectionProperties,
}

impl GatewayConfig {
    pub fn new(token: SecretString, intents: Intents) -> Self {
        Self {
            token,
            intents,
            endpoint: GatewayDefaults::ENDPOINT.to_string(),
            reconnect_delay: GatewayDefaults::RECONNECT_DELAY,
            invalid_session_delay: GatewayDefaults::INVALID_SESSION_DELAY,
            properties: ConnectionProperties::default(),
        }
    }

    /// Sets an explicit gateway endpoint, e.g. a local test server.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end().to_string();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_invalid_session_delay(mut self, delay: Duration) -> Self {
        self.invalid_session_delay = delay;
        self
    }

    pub fn with_properties(mut self, properties: ConnectionProperties) -> Self {
        self.properties = properties;
        self
    }

    pub(crate) fn identify_frame(&self) -> ClientFrame {
        ClientFrame::Identify(IdentifyMsg {
            token: self.token.expose_secret().clone(),
            intents: self.intents,
            properties: self.properties.clone(),
        })
    }

    pub(crate) fn resume_frame(&self, session_id: String, seq: u64) -> ClientFrame {
        ClientFrame::Resume(ResumeMsg {
            token: self.token.expose_secret().clone(),
            session_id,
            seq,
        })
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("intents", &self.intents)
            .field("endpoint", &self.endpoint)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("invalid_session_delay", &self.invalid_session_delay)
            .finish_non_exhaustive()
    }
}

/// Errors produced by the gateway transport and protocol handling.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The websocket could not be opened.
    #[error("failed to connect to gateway: {0}")]
    Connect(#[source] WsError),

    /// The connection ended while the session was live.
    #[error("gateway connection closed (code {code:?}): {reason}")]
    ConnectionClosed { code: Option<u16>, reason: String },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// `connect` was called while a worker still owns a connection.
    #[error("gateway session is already connected")]
    AlreadyConnected,

    /// Gateway protocol contract error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            code: None,
            reason: reason.into(),
        }
    }

    /// Whether reconnecting may fix this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::ConnectionClosed { .. })
    }
}

struct Worker {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<WorkerExit>,
}

struct WorkerExit {
    state: SessionState,
    result: Result<(), GatewayError>,
}

/// One logical gateway session, possibly spanning several transports.
pub struct GatewaySession {
    config: GatewayConfig,
    sink: Arc<dyn EventSink>,
    state: SessionState,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    worker: Option<Worker>,
}

impl GatewaySession {
    pub fn new<S: EventSink>(config: GatewayConfig, sink: S) -> Self {
        Self::with_shared_sink(config, Arc::new(sink))
    }

    pub fn with_shared_sink(config: GatewayConfig, sink: Arc<dyn EventSink>) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            config,
            sink,
            state: SessionState::new(),
            snapshot: Arc::new(snapshot),
            worker: None,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn sequence(&self) -> Option<u64> {
        self.snapshot.borrow().sequence
    }

    pub fn session_id(&self) -> Option<String> {
        self.snapshot.borrow().session_id.clone()
    }

    /// Bot user object captured from the last ready event.
    pub fn current_user(&self) -> Option<Arc<Value>> {
        self.snapshot.borrow().current_user.clone()
    }

    /// Watches state transitions, sequence updates and session id changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Opens the websocket and hands it to a fresh worker.
    ///
    /// `resume` is only honored when a session id and sequence number from a
    /// previous connection are known; otherwise the worker identifies.
    pub async fn connect(&mut self, resume: bool) -> Result<(), GatewayError> {
        if self.is_connected() {
            return Err(GatewayError::AlreadyConnected);
        }
        // A finished worker still holds the session state; take it back.
        if self.worker.is_some() {
            if let Err(err) = self.join_worker().await {
                debug!(event = "gateway_previous_worker_error", error = %err);
            }
        }

        self.state.set_connection(ConnectionState::Connecting);
        publish(&self.snapshot, &self.state);

        let url = self.state.connect_url(resume, &self.config.endpoint);
        let socket = match open_socket(&url).await {
            Ok(socket) => socket,
            Err(err) => {
                self.state.set_connection(ConnectionState::Disconnected);
                publish(&self.snapshot, &self.state);
                return Err(err);
            }
        };

        self.state.begin_connection(resume);
        publish(&self.snapshot, &self.state);
        info!(event = "gateway_connected", resume, url = %url);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(connection_worker(
            socket,
            std::mem::take(&mut self.state),
            self.config.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.snapshot),
            shutdown_rx,
        ));
        self.worker = Some(Worker {
            shutdown: Some(shutdown_tx),
            handle,
        });
        Ok(())
    }

    /// Waits until the worker stops and returns why it stopped.
    ///
    /// Returns immediately with `Ok(())` when no worker is running. Dropping
    /// the returned future leaves the worker running and owned by the session.
    pub async fn wait(&mut self) -> Result<(), GatewayError> {
        self.join_worker().await
    }

    /// Stops the heartbeat, closes the transport and marks the session
    /// disconnected. Idempotent; safe to call when never connected.
    pub async fn close(&mut self) {
        let Some(worker) = self.worker.as_mut() else {
            self.state.set_connection(ConnectionState::Disconnected);
            publish(&self.snapshot, &self.state);
            return;
        };

        self.snapshot
            .send_modify(|snapshot| snapshot.state = ConnectionState::Closing);
        if let Some(shutdown) = worker.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(err) = self.join_worker().await {
            debug!(event = "gateway_close_worker_error", error = %err);
        }
        info!(event = "gateway_closed");
    }

    async fn join_worker(&mut self) -> Result<(), GatewayError> {
        let Some(worker) = self.worker.as_mut() else {
            return Ok(());
        };
        let joined = (&mut worker.handle).await;
        self.worker = None;

        let result = match joined {
            Ok(exit) => {
                self.state = exit.state;
                exit.result
            }
            Err(join_err) => {
                self.state = SessionState::new();
                Err(GatewayError::Protocol(format!(
                    "gateway worker stopped abnormally: {join_err}"
                )))
            }
        };
        self.state.set_connection(ConnectionState::Disconnected);
        publish(&self.snapshot, &self.state);
        result
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.handle.abort();
        }
    }
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("config", &self.config)
            .field("snapshot", &*self.snapshot.borrow())
            .finish_non_exhaustive()
    }
}

fn publish(snapshot: &watch::Sender<SessionSnapshot>, state: &SessionState) {
    let next = state.snapshot();
    snapshot.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
}

enum ConnectionOutcome {
    Shutdown,
    Reconnect { resume: bool, delay: Duration },
    Zombie,
}

async fn connection_worker(
    mut socket: GatewaySocket,
    mut state: SessionState,
    config: GatewayConfig,
    sink: Arc<dyn EventSink>,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> WorkerExit {
    loop {
        let outcome = run_connection(
            &mut socket,
            &mut state,
            &config,
            sink.as_ref(),
            &snapshot,
            &mut shutdown_rx,
        )
        .await;

        let (resume, delay) = match outcome {
            Ok(ConnectionOutcome::Shutdown) => {
                let _ = socket.close(None).await;
                return WorkerExit {
                    state,
                    result: Ok(()),
                };
            }
            Ok(ConnectionOutcome::Reconnect { resume, delay }) => (resume, delay),
            Ok(ConnectionOutcome::Zombie) => {
                warn!(event = "gateway_zombie_connection");
                let _ = socket.close(None).await;
                return WorkerExit {
                    state,
                    result: Err(GatewayError::closed("heartbeat was not acknowledged")),
                };
            }
            Err(err) => {
                let _ = socket.close(None).await;
                return WorkerExit {
                    state,
                    result: Err(err),
                };
            }
        };

        let _ = socket.close(None).await;
        state.set_connection(ConnectionState::Connecting);
        publish(&snapshot, &state);
        info!(
            event = "gateway_reconnecting",
            resume,
            delay_ms = delay.as_millis() as u64
        );

        let url = state.connect_url(resume, &config.endpoint);
        let reopened = tokio::select! {
            _ = &mut shutdown_rx => None,
            reopened = async {
                tokio::time::sleep(delay).await;
                open_socket(&url).await
            } => Some(reopened),
        };

        match reopened {
            None => {
                return WorkerExit {
                    state,
                    result: Ok(()),
                }
            }
            Some(Ok(next)) => socket = next,
            Some(Err(err)) => {
                return WorkerExit {
                    state,
                    result: Err(err),
                }
            }
        }

        state.begin_connection(resume);
        publish(&snapshot, &state);
    }
}

async fn run_connection(
    socket: &mut GatewaySocket,
    state: &mut SessionState,
    config: &GatewayConfig,
    sink: &dyn EventSink,
    snapshot: &watch::Sender<SessionSnapshot>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> Result<ConnectionOutcome, GatewayError> {
    let mut ticker = None;

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => return Ok(ConnectionOutcome::Shutdown),
            _ = next_tick(&mut ticker) => {
                match state.heartbeat_tick() {
                    HeartbeatAction::Beat(frame) => {
                        debug!(event = "gateway_heartbeat", seq = ?state.sequence());
                        send_frame(socket, &frame).await?;
                    }
                    HeartbeatAction::Zombie => return Ok(ConnectionOutcome::Zombie),
                }
            }
            maybe_inbound = socket.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match GatewayFrame::from_text(&text) {
                            Ok(frame) => frame,
                            Err(err) => {
                                debug!(event = "gateway_frame_decode_failed", error = %err);
                                continue;
                            }
                        };
                        for action in state.apply(frame, config)? {
                            match action {
                                FrameAction::Send(frame) => send_frame(socket, &frame).await?,
                                FrameAction::StartHeartbeat(interval) => {
                                    debug!(
                                        event = "gateway_heartbeat_started",
                                        interval_ms = interval.as_millis() as u64
                                    );
                                    ticker = state.heartbeat().map(|heartbeat| heartbeat.ticker());
                                }
                                FrameAction::Dispatch(event) => sink.dispatch(event),
                                FrameAction::Reconnect { resume, delay } => {
                                    publish(snapshot, state);
                                    return Ok(ConnectionOutcome::Reconnect { resume, delay });
                                }
                            }
                        }
                        publish(snapshot, state);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        socket
                            .send(Message::Pong(payload))
                            .await
                            .map_err(|err| GatewayError::closed(err.to_string()))?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(match frame {
                            Some(frame) => GatewayError::ConnectionClosed {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.into_owned(),
                            },
                            None => GatewayError::closed("gateway closed by server"),
                        });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(GatewayError::closed(err.to_string())),
                    None => return Err(GatewayError::closed("gateway stream ended")),
                }
            }
        }
    }
}

async fn open_socket(url: &str) -> Result<GatewaySocket, GatewayError> {
    let (socket, _) = connect_async(url).await.map_err(GatewayError::Connect)?;
    Ok(socket)
}

async fn send_frame(socket: &mut GatewaySocket, frame: &ClientFrame) -> Result<(), GatewayError> {
    let text = frame.to_text()?;
    socket
        .send(Message::Text(text))
        .await
        .map_err(|err| GatewayError::closed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;
    use tokio::sync::mpsc;

    use super::{GatewayConfig, GatewayDefaults, GatewayError, GatewaySession};
    use crate::gateway::state::ConnectionState;
    use crate::intents::Intents;

    fn config() -> GatewayConfig {
        GatewayConfig::new(SecretString::new("test-token".to_string()), Intents::none())
    }

    #[test]
    fn config_uses_default_endpoint_and_delays() {
        let config = config();
        assert_eq!(config.endpoint, GatewayDefaults::ENDPOINT);
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.invalid_session_delay, Duration::from_secs(5));
    }

    #[test]
    fn endpoint_override_is_trimmed() {
        let config = config().with_endpoint("ws://127.0.0.1:9/gateway  \n");
        assert_eq!(config.endpoint, "ws://127.0.0.1:9/gateway");
    }

    #[test]
    fn config_debug_hides_token() {
        assert!(!format!("{:?}", config()).contains("test-token"));
    }

    #[tokio::test]
    async fn close_is_idempotent_when_never_connected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = GatewaySession::new(config(), tx);
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.wait().await.is_ok());
    }

    #[tokio::test]
    async fn connect_failure_leaves_session_disconnected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session =
            GatewaySession::new(config().with_endpoint(format!("ws://{addr}/")), tx);
        let err = session.connect(false).await.expect_err("nothing listening");
        assert!(matches!(err, GatewayError::Connect(_)));
        assert!(err.is_retryable());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.is_connected());
    }
}
