pub mod settings;

pub use settings::{IdentitySettings, IdentityStrategy, NetworkSettings, Settings, TransferSettings};
