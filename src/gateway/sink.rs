//! Delivery contract for dispatch events.
//!
//! The session calls the sink once per dispatch frame and never waits on it
//! beyond that call. Routing, command parsing and model construction belong
//! to whatever sits behind the sink.

use serde_json::Value;
use tokio::sync::mpsc;

/// Application event decoded from a dispatch frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchEvent {
    /// Lower-cased event name, e.g. `message_create`.
    pub name: String,
    /// Raw `d` payload of the frame.
    pub payload: Value,
    /// Sequence number carried by the frame, if any.
    pub sequence: Option<u64>,
}

/// Receiver of dispatch events.
pub trait EventSink: Send + Sync + 'static {
    fn dispatch(&self, event: DispatchEvent);
}

impl EventSink for mpsc::UnboundedSender<DispatchEvent> {
    fn dispatch(&self, event: DispatchEvent) {
        // A dropped receiver means nobody is listening; delivery is best-effort.
        let _ = self.send(event);
    }
}

/// Adapts a plain closure into an [`EventSink`].
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(DispatchEvent) + Send + Sync + 'static,
{
    fn dispatch(&self, event: DispatchEvent) {
        (self.0)(event)
    }
}
