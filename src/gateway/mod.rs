//! Realtime gateway modules.
//!
//! - `session`: connection lifecycle, worker task and reconnect handling.
//! - `state`: frame-driven session state machine.
//! - `heartbeat`: liveness supervision for a single connection.
//! - `proto`: gateway frames and opcodes.
//! - `sink`: delivery contract for dispatch events.

/// Heartbeat interval and acknowledgement tracking.
pub mod heartbeat;
/// Gateway wire frames.
pub mod proto;
/// Session handle, configuration and connection worker.
pub mod session;
/// Dispatch event sink contract.
pub mod sink;
/// Session state machine.
pub mod state;

pub use session::{GatewayConfig, GatewayDefaults, GatewayError, GatewaySession};
pub use sink::{DispatchEvent, EventSink, FnSink};
pub use state::{ConnectionState, SessionSnapshot};
