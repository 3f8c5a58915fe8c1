use crate::error::TransferError;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Ready,
    Failed(String),
    /// The session went away while the sender was waiting.
    Cancelled,
}

#[derive(Debug)]
enum SlotState {
    Idle,
    AwaitingReady(oneshot::Sender<HandshakeOutcome>),
    /// Outcome delivered; the owning transfer is still running.
    Resolved,
}

/// Single-slot sender handshake: Idle -> AwaitingReady -> Resolved -> Idle.
///
/// Only one outbound transfer can hold the slot; it is returned to `Idle`
/// when the [`HandshakeGuard`] is dropped.
#[derive(Debug)]
pub struct HandshakeSlot {
    state: Mutex<SlotState>,
}

impl Default for HandshakeSlot {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState::Idle),
        }
    }
}

impl HandshakeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot for a new outbound transfer.
    pub fn arm(&self) -> Result<(HandshakeGuard<'_>, oneshot::Receiver<HandshakeOutcome>), TransferError> {
        let mut state = self.state.lock();
        if !matches!(*state, SlotState::Idle) {
            return Err(TransferError::Busy);
        }
        let (tx, rx) = oneshot::channel();
        *state = SlotState::AwaitingReady(tx);
        Ok((HandshakeGuard { slot: self }, rx))
    }

    /// Delivers `outcome` to a waiting sender. Returns false when nothing was
    /// waiting.
    pub fn resolve(&self, outcome: HandshakeOutcome) -> bool {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Resolved) {
            SlotState::AwaitingReady(tx) => {
                debug!("Sender handshake resolved: {:?}", outcome);
                let _ = tx.send(outcome);
                true
            }
            previous => {
                *state = previous;
                false
            }
        }
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(*self.state.lock(), SlotState::AwaitingReady(_))
    }

    pub fn is_idle(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Idle)
    }

    fn release(&self) {
        *self.state.lock() = SlotState::Idle;
    }
}

/// Holds the [`HandshakeSlot`] for the duration of one outbound transfer.
pub struct HandshakeGuard<'a> {
    slot: &'a HandshakeSlot,
}

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        self.slot.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_wakes_waiter() {
        let slot = HandshakeSlot::new();
        let (_guard, rx) = slot.arm().unwrap();
        assert!(slot.is_awaiting());

        assert!(slot.resolve(HandshakeOutcome::Ready));
        assert_eq!(rx.await.unwrap(), HandshakeOutcome::Ready);
        assert!(!slot.is_awaiting());
    }

    #[test]
    fn test_second_arm_is_busy_until_guard_dropped() {
        let slot = HandshakeSlot::new();
        let (guard, _rx) = slot.arm().unwrap();
        assert!(matches!(slot.arm(), Err(TransferError::Busy)));

        slot.resolve(HandshakeOutcome::Ready);
        assert!(matches!(slot.arm(), Err(TransferError::Busy)));

        drop(guard);
        assert!(slot.is_idle());
        assert!(slot.arm().is_ok());
    }

    #[test]
    fn test_resolve_without_waiter_is_noop() {
        let slot = HandshakeSlot::new();
        assert!(!slot.resolve(HandshakeOutcome::Failed("late".to_string())));
        assert!(slot.is_idle());
    }
}
