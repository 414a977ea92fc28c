//! Session state machine.
//!
//! `SessionState` consumes decoded inbound frames and answers with the
//! actions the connection worker must perform. It owns the authoritative
//! sequence number, session id and heartbeat liveness flag; nothing else
//! writes them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::gateway::heartbeat::{Heartbeat, HeartbeatAction};
use crate::gateway::proto::{ClientFrame, GatewayFrame, HelloMsg, OpCode, ReadyMsg, READY_EVENT};
use crate::gateway::session::{GatewayConfig, GatewayError};
use crate::gateway::sink::DispatchEvent;

const RESUMED_EVENT: &str = "RESUMED";

/// Lifecycle of a gateway session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingHello,
    Identifying,
    Resuming,
    Ready,
    Closing,
}

/// Work produced by applying an inbound frame.
#[derive(Debug, PartialEq)]
pub enum FrameAction {
    Send(ClientFrame),
    StartHeartbeat(Duration),
    Dispatch(DispatchEvent),
    Reconnect { resume: bool, delay: Duration },
}

/// Read-only view of a session published to observers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub sequence: Option<u64>,
    pub session_id: Option<String>,
    pub current_user: Option<Arc<Value>>,
}

#[derive(Clone, Debug, Default)]
pub struct SessionState {
    connection: ConnectionState,
    sequence: Option<u64>,
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    current_user: Option<Arc<Value>>,
    heartbeat: Option<Heartbeat>,
    resume_requested: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn heartbeat(&self) -> Option<&Heartbeat> {
        self.heartbeat.as_ref()
    }

    /// Session id and sequence are only usable together.
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.connection,
            sequence: self.sequence,
            session_id: self.session_id.clone(),
            current_user: self.current_user.clone(),
        }
    }

    pub(crate) fn set_connection(&mut self, connection: ConnectionState) {
        self.connection = connection;
    }

    /// Marks the start of a new transport. Resume is only kept when the
    /// session can actually be resumed.
    pub(crate) fn begin_connection(&mut self, resume: bool) {
        self.connection = ConnectionState::AwaitingHello;
        self.heartbeat = None;
        self.resume_requested = resume && self.can_resume();
    }

    /// URL to dial for the next connection attempt.
    pub(crate) fn connect_url(&self, resume: bool, endpoint: &str) -> String {
        match self.resume_gateway_url.as_deref() {
            Some(base) if resume && self.can_resume() => {
                let query = endpoint.split_once('?').map(|(_, query)| query);
                match query {
                    Some(query) => format!("{}/?{query}", base.trim_end_matches('/')),
                    None => base.to_string(),
                }
            }
            _ => endpoint.to_string(),
        }
    }

    fn forget_session(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_gateway_url = None;
    }

    pub fn apply(
        &mut self,
        frame: GatewayFrame,
        config: &GatewayConfig,
    ) -> Result<Vec<FrameAction>, GatewayError> {
        if let Some(seq) = frame.s {
            self.sequence = Some(self.sequence.map_or(seq, |current| current.max(seq)));
        }

        let Some(opcode) = frame.opcode() else {
            debug!(event = "gateway_unknown_opcode", op = frame.op);
            return Ok(Vec::new());
        };

        match opcode {
            OpCode::Hello => self.on_hello(frame.d, config),
            OpCode::HeartbeatAck => {
                if let Some(heartbeat) = self.heartbeat.as_mut() {
                    heartbeat.acknowledge();
                }
                Ok(Vec::new())
            }
            OpCode::Heartbeat => Ok(vec![FrameAction::Send(ClientFrame::Heartbeat {
                seq: self.sequence,
            })]),
            OpCode::Dispatch => self.on_dispatch(frame),
            OpCode::Reconnect => {
                warn!(event = "gateway_reconnect_requested");
                Ok(vec![FrameAction::Reconnect {
                    resume: true,
                    delay: config.reconnect_delay,
                }])
            }
            OpCode::InvalidSession => {
                warn!(event = "gateway_invalid_session");
                self.forget_session();
                Ok(vec![FrameAction::Reconnect {
                    resume: false,
                    delay: config.invalid_session_delay,
                }])
            }
            OpCode::Identify | OpCode::Resume => {
                debug!(event = "gateway_unexpected_client_opcode", op = frame.op);
                Ok(Vec::new())
            }
        }
    }

    fn on_hello(
        &mut self,
        payload: Value,
        config: &GatewayConfig,
    ) -> Result<Vec<FrameAction>, GatewayError> {
        let hello: HelloMsg = serde_json::from_value(payload)?;
        let heartbeat = Heartbeat::new(hello.heartbeat_interval);
        let interval = heartbeat.interval();
        self.heartbeat = Some(heartbeat);

        let resumable = match (&self.session_id, self.sequence) {
            (Some(session_id), Some(seq)) if self.resume_requested => {
                Some((session_id.clone(), seq))
            }
            _ => None,
        };

        let handshake = match resumable {
            Some((session_id, seq)) => {
                info!(event = "gateway_resuming", session_id = %session_id, seq);
                self.connection = ConnectionState::Resuming;
                config.resume_frame(session_id, seq)
            }
            None => {
                info!(event = "gateway_identifying");
                self.forget_session();
                self.connection = ConnectionState::Identifying;
                config.identify_frame()
            }
        };

        Ok(vec![
            FrameAction::Send(handshake),
            FrameAction::StartHeartbeat(interval),
        ])
    }

    fn on_dispatch(&mut self, frame: GatewayFrame) -> Result<Vec<FrameAction>, GatewayError> {
        let Some(event_name) = frame.t else {
            debug!(event = "gateway_dispatch_without_name");
            return Ok(Vec::new());
        };

        if event_name == READY_EVENT {
            match serde_json::from_value::<ReadyMsg>(frame.d.clone()) {
                Ok(ready) => {
                    info!(event = "gateway_ready", session_id = %ready.session_id);
                    self.session_id = Some(ready.session_id);
                    self.resume_gateway_url = ready.resume_gateway_url;
                    self.current_user = ready.user.map(Arc::new);
                }
                Err(err) => {
                    // Without a session id the next connection must identify.
                    warn!(event = "gateway_ready_decode_failed", error = %err);
                    self.session_id = None;
                    self.resume_gateway_url = None;
                }
            }
            self.connection = ConnectionState::Ready;
        } else if event_name == RESUMED_EVENT {
            info!(event = "gateway_resumed", seq = ?self.sequence);
            self.connection = ConnectionState::Ready;
        }

        Ok(vec![FrameAction::Dispatch(DispatchEvent {
            name: event_name.to_ascii_lowercase(),
            payload: frame.d,
            sequence: frame.s,
        })])
    }

    /// Runs one heartbeat tick against the current liveness flag.
    pub(crate) fn heartbeat_tick(&mut self) -> HeartbeatAction {
        match self.heartbeat.as_mut() {
            Some(heartbeat) => heartbeat.tick(self.sequence),
            None => HeartbeatAction::Beat(ClientFrame::Heartbeat {
                seq: self.sequence,
            }),
        }
    }
}
