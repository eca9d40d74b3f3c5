//! Player sessions and the outbound delivery seam

pub mod heartbeat;

pub use heartbeat::HeartbeatMonitor;

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

pub type SessionId = Uuid;
pub type RoomId = Uuid;

/// Per-connection outbound queue, drained by the socket writer task
pub type Outbound = mpsc::Sender<ServerMsg>;

/// Outbound queue depth per connection
pub const OUTBOUND_CAPACITY: usize = 256;

/// One live (or recently dropped) player connection
#[derive(Debug)]
pub struct PlayerSession {
    pub id: SessionId,
    pub nickname: String,
    pub outbound: Outbound,
    pub ready: bool,
    pub online: bool,
    pub last_heartbeat: Instant,
    pub current_room: Option<RoomId>,
}

impl PlayerSession {
    pub fn new(nickname: impl Into<String>, outbound: Outbound) -> Self {
        Self {
            id: Uuid::new_v4(),
            nickname: nickname.into(),
            outbound,
            ready: false,
            online: true,
            last_heartbeat: Instant::now(),
            current_room: None,
        }
    }

    /// Attach a new connection to this session after a reconnect.
    /// The online flag is the room registry's to set.
    pub fn rebind(&mut self, outbound: Outbound) {
        self.outbound = outbound;
        self.last_heartbeat = Instant::now();
    }

    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat)
    }
}

/// Delivers server messages to sessions.
///
/// Implementations must not block: they are called while the room registry
/// is locked, which is what keeps per-room message order total.
pub trait Broadcaster: Send + Sync {
    fn send(&self, session: &PlayerSession, msg: &ServerMsg);
}

/// Pushes messages onto each session's outbound channel
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelBroadcaster;

impl Broadcaster for ChannelBroadcaster {
    fn send(&self, session: &PlayerSession, msg: &ServerMsg) {
        match session.outbound.try_send(msg.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(session_id = %session.id, "Outbound queue full, dropping message");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(session_id = %session.id, "Outbound queue closed");
            }
        }
    }
}
