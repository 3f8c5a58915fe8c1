use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayshareError>;

#[derive(Error, Debug)]
pub enum RelayshareError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Not connected to a relay")]
    NotConnected,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of the directory token exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("directory response carried no token")]
    NoToken,

    #[error("directory unreachable: {0}")]
    Unreachable(String),

    #[error("directory returned an error: {0}")]
    ServerError(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("all {attempts} connection attempts failed: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("relay closed the connection during the handshake: {0}")]
    HandshakeFailed(String),

    #[error("connection attempt superseded or stopped")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("not connected to a relay")]
    NotConnected,

    #[error("timed out waiting for the receiver to become ready")]
    HandshakeTimeout,

    #[error("receiver rejected the transfer")]
    HandshakeRejected,

    #[error("connection dropped during transfer")]
    MidStreamDisconnect,

    #[error("another outbound transfer is already in progress")]
    Busy,
}

/// A single inbound message that could not be interpreted. The message is
/// skipped and the session continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed '{kind}' envelope: {reason}")]
    Malformed { kind: String, reason: String },

    #[error("invalid envelope: {0}")]
    InvalidJson(String),
}

impl From<toml::de::Error> for RelayshareError {
    fn from(err: toml::de::Error) -> Self {
        RelayshareError::Config(format!("Failed to parse config: {}", err))
    }
}

impl From<toml::ser::Error> for RelayshareError {
    fn from(err: toml::ser::Error) -> Self {
        RelayshareError::Config(format!("Failed to serialize config: {}", err))
    }
}
