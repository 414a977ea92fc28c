//! Heartbeat supervision for a single gateway connection.
//!
//! The server dictates the interval in its Hello frame. Every tick checks
//! that the previous heartbeat was acknowledged; an unacknowledged beat means
//! the connection is a zombie and must be torn down instead of beating again.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::gateway::proto::ClientFrame;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Decision taken on a heartbeat tick.
#[derive(Debug, PartialEq)]
pub enum HeartbeatAction {
    /// Send this heartbeat frame; the acknowledgement flag is now cleared.
    Beat(ClientFrame),
    /// The last heartbeat was never acknowledged.
    Zombie,
}

/// Liveness state for one connection. Created from Hello, never renegotiated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    interval: Duration,
    acknowledged: bool,
}

impl Heartbeat {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms).max(MIN_INTERVAL),
            acknowledged: true,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    pub fn acknowledge(&mut self) {
        self.acknowledged = true;
    }

    pub fn tick(&mut self, seq: Option<u64>) -> HeartbeatAction {
        if !self.acknowledged {
            return HeartbeatAction::Zombie;
        }
        self.acknowledged = false;
        HeartbeatAction::Beat(ClientFrame::Heartbeat { seq })
    }

    /// Timer whose first tick fires one full interval from now.
    pub(crate) fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

/// Waits for the next tick, or forever when no heartbeat is running yet.
pub(crate) async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
