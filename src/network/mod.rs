pub mod directory;
pub mod protocol;
pub mod shard;
pub mod transport;

pub use directory::{DirectoryClient, TokenProvider};
pub use protocol::{decode_text, Envelope, Inbound, LegacySignal, UserEntry};
pub use shard::ShardSelector;
pub use transport::{Connector, Frame, FrameLink, LinkTasks, WebSocketConnector};
