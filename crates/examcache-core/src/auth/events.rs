use tokio::sync::broadcast;
use tracing::debug;

/// Buffer for undelivered session events per subscriber.
/// Events are rare (one per 401), so a small buffer never lags in practice.
const EVENT_BUFFER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The server rejected the stored token; local session state has been cleared.
    Expired,
}

/// Single producer, many subscribers. Every subscriber alive at send time
/// receives every event.
#[derive(Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Announce an expired session. Returns how many subscribers were notified;
    /// zero subscribers is fine.
    pub fn notify_expired(&self) -> usize {
        match self.tx.send(SessionEvent::Expired) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("Session expired with no listeners");
                0
            }
        }
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}
