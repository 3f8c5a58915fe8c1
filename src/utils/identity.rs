use crate::config::{IdentitySettings, IdentityStrategy};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Identifier of the local participant. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Derives a stable id from the host name and the configured display name.
    pub fn host_derived(display_name: &str) -> Self {
        let host = gethostname::gethostname().to_string_lossy().to_string();
        Self::derive(&host, display_name)
    }

    pub fn derive(host: &str, display_name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(host.as_bytes());
        hasher.update([0u8]);
        hasher.update(display_name.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(digest[..32].to_string())
    }

    pub fn from_settings(settings: &IdentitySettings) -> Self {
        match settings.strategy {
            IdentityStrategy::Random => Self::random(),
            IdentityStrategy::HostDerived => Self::host_derived(&settings.display_name),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(ParticipantId::random(), ParticipantId::random());
    }

    #[test]
    fn test_derived_id_is_stable() {
        let a = ParticipantId::derive("workstation", "alice");
        let b = ParticipantId::derive("workstation", "alice");
        let c = ParticipantId::derive("workstation", "bob");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_strategy_selection() {
        let settings = IdentitySettings {
            strategy: IdentityStrategy::HostDerived,
            display_name: "alice".to_string(),
        };
        assert_eq!(
            ParticipantId::from_settings(&settings),
            ParticipantId::from_settings(&settings)
        );
    }
}
