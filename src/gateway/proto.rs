use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::intents::Intents;

/// Control opcodes carried in the `op` field of every gateway frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    Dispatch,
    Heartbeat,
    Identify,
    Resume,
    Reconnect,
    InvalidSession,
    Hello,
    HeartbeatAck,
}

impl OpCode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Dispatch => 0,
            Self::Heartbeat => 1,
            Self::Identify => 2,
            Self::Resume => 6,
            Self::Reconnect => 7,
            Self::InvalidSession => 9,
            Self::Hello => 10,
            Self::HeartbeatAck => 11,
        }
    }
}

/// Event name the server uses to signal a successful identify.
pub const READY_EVENT: &str = "READY";

/// Decoded inbound frame: `{op, d, t?, s?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
}

impl GatewayFrame {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_code(self.op)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HelloMsg {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReadyMsg {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub user: Option<Value>,
}

/// Client properties reported in the Identify payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

#[derive(Clone, Serialize, PartialEq)]
pub struct IdentifyMsg {
    pub token: String,
    pub intents: Intents,
    pub properties: ConnectionProperties,
}

#[derive(Clone, Serialize, PartialEq)]
pub struct ResumeMsg {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// Frames the client sends to the gateway.
#[derive(Clone, PartialEq)]
pub enum ClientFrame {
    Heartbeat { seq: Option<u64> },
    Identify(IdentifyMsg),
    Resume(ResumeMsg),
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    op: u8,
    d: &'a T,
}

impl ClientFrame {
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::Heartbeat { .. } => OpCode::Heartbeat,
            Self::Identify(_) => OpCode::Identify,
            Self::Resume(_) => OpCode::Resume,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        let op = self.opcode().code();
        match self {
            Self::Heartbeat { seq } => serde_json::to_string(&Envelope { op, d: seq }),
            Self::Identify(identify) => serde_json::to_string(&Envelope { op, d: identify }),
            Self::Resume(resume) => serde_json::to_string(&Envelope { op, d: resume }),
        }
    }
}

// Tokens never reach log output.
impl std::fmt::Debug for ClientFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Heartbeat { seq } => f.debug_struct("Heartbeat").field("seq", seq).finish(),
            Self::Identify(identify) => f
                .debug_struct("Identify")
                .field("intents", &identify.intents)
                .field("properties", &identify.properties)
                .finish_non_exhaustive(),
            Self::Resume(resume) => f
                .debug_struct("Resume")
                .field("session_id", &resume.session_id)
                .field("seq", &resume.seq)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{ClientFrame, ConnectionProperties, GatewayFrame, IdentifyMsg, OpCode, ResumeMsg};
    use crate::intents::Intents;

    #[test]
    fn parses_dispatch_frame_with_sequence() {
        let frame = GatewayFrame::from_text(r#"{"op":0,"d":{"id":"1"},"t":"MESSAGE_CREATE","s":7}"#)
            .expect("parse dispatch");
        assert_eq!(frame.opcode(), Some(OpCode::Dispatch));
        assert_eq!(frame.t.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(frame.s, Some(7));
    }

    #[test]
    fn parses_frame_with_null_fields() {
        let frame = GatewayFrame::from_text(r#"{"op":11,"d":null,"t":null,"s":null}"#)
            .expect("parse ack");
        assert_eq!(frame.opcode(), Some(OpCode::HeartbeatAck));
        assert_eq!(frame.s, None);
        assert_eq!(frame.d, Value::Null);
    }

    #[test]
    fn unknown_opcode_is_none() {
        assert_eq!(OpCode::from_code(42), None);
    }

    #[test]
    fn heartbeat_carries_sequence_or_null() {
        let with_seq = ClientFrame::Heartbeat { seq: Some(5) }.to_text().expect("encode");
        assert_eq!(
            serde_json::from_str::<Value>(&with_seq).expect("json"),
            json!({"op": 1, "d": 5})
        );

        let without = ClientFrame::Heartbeat { seq: None }.to_text().expect("encode");
        assert_eq!(
            serde_json::from_str::<Value>(&without).expect("json"),
            json!({"op": 1, "d": null})
        );
    }

    #[test]
    fn identify_and_resume_wire_shape() {
        let identify = ClientFrame::Identify(IdentifyMsg {
            token: "secret".to_string(),
            intents: Intents::GUILDS,
            properties: ConnectionProperties {
                os: "linux".to_string(),
                browser: "cordwire".to_string(),
                device: "cordwire".to_string(),
            },
        });
        let value: Value = serde_json::from_str(&identify.to_text().expect("encode")).expect("json");
        assert_eq!(value["op"], 2);
        assert_eq!(value["d"]["token"], "secret");
        assert_eq!(value["d"]["intents"], 1);
        assert_eq!(value["d"]["properties"]["os"], "linux");

        let resume = ClientFrame::Resume(ResumeMsg {
            token: "secret".to_string(),
            session_id: "abc".to_string(),
            seq: 9,
        });
        let value: Value = serde_json::from_str(&resume.to_text().expect("encode")).expect("json");
        assert_eq!(value, json!({"op": 6, "d": {"token": "secret", "session_id": "abc", "seq": 9}}));
    }

    #[test]
    fn debug_output_hides_token() {
        let frame = ClientFrame::Resume(ResumeMsg {
            token: "secret".to_string(),
            session_id: "abc".to_string(),
            seq: 1,
        });
        assert!(!format!("{frame:?}").contains("secret"));
    }
}
