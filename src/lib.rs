pub mod config;
pub mod error;
pub mod network;
pub mod service;
pub mod utils;

pub use config::Settings;
pub use error::{AuthError, ConnectError, ProtocolError, RelayshareError, Result, TransferError};
pub use service::{SessionEngine, SessionEvent, SessionState};
pub use utils::ParticipantId;
