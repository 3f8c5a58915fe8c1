use crate::service::session::SessionState;
use parking_lot::Mutex;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::warn;

pub const DEFAULT_EVENT_QUEUE: usize = 256;

/// Notifications raised to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    ConnectionStatusChanged {
        peer_id: Option<String>,
        accepted: bool,
    },
    RosterChanged,
    InstanceInfo(Option<String>),
    UploadProgress(u8),
    FileReceived {
        from: Option<String>,
        path: PathBuf,
        bytes: u64,
    },
    SessionFailed(String),
}

pub type EventReceiver = mpsc::Receiver<SessionEvent>;

/// Multi-subscriber event fan-out.
///
/// Every subscriber owns a bounded queue. Publishing never waits: a
/// subscriber whose queue is full misses that event, and subscribers that
/// dropped their receiver are pruned. Delivery follows registration order.
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: SessionEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("⚠️ Event subscriber lagging, dropped {:?}", dropped);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_QUEUE)
    }
}
