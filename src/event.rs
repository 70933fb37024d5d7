use crate::scheduler::TickHandle;
use crate::transport::TransportEvent;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Inbox entry. Collaborators post these; the session handles them one at a time.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Transport(TransportEvent),
    Tick { handle: TickHandle, delta: Duration },
}

impl From<TransportEvent> for SessionEvent {
    fn from(event: TransportEvent) -> Self {
        SessionEvent::Transport(event)
    }
}

/// Sending half of a session inbox.
pub type EventSink = UnboundedSender<SessionEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outward status notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Completed { session: SessionId, success: bool },
    Paused { session: SessionId },
    Resumed { session: SessionId },
    Canceled { session: SessionId },
}

impl Notification {
    pub fn session(&self) -> SessionId {
        match *self {
            Notification::Completed { session, .. }
            | Notification::Paused { session }
            | Notification::Resumed { session }
            | Notification::Canceled { session } => session,
        }
    }
}
