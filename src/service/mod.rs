pub mod dispatcher;
pub mod events;
pub mod file_transfer;
pub mod handshake;
pub mod roster;
pub mod session;

pub use dispatcher::InboundTransfer;
pub use events::{EventBus, EventReceiver, SessionEvent};
pub use file_transfer::{progress_percent, TransferReport};
pub use handshake::{HandshakeOutcome, HandshakeSlot};
pub use roster::{PeerLink, PeerLinkSlot, Roster, RosterSnapshot};
pub use session::{SessionEngine, SessionState};
