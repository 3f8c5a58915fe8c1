use crate::config::NetworkSettings;
use crate::utils::{stable_hash, ParticipantId};

/// Maps a participant onto one of a fixed set of relay shards. Shard `i` is
/// served at `<server_address>:<base_port + i><relay_path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSelector {
    server_address: String,
    base_port: u16,
    relay_path: String,
    shard_count: u32,
}

impl ShardSelector {
    pub fn new(server_address: &str, base_port: u16, relay_path: &str, shard_count: u32) -> Self {
        Self {
            server_address: server_address.trim_end_matches('/').to_string(),
            base_port,
            relay_path: relay_path.to_string(),
            shard_count: shard_count.max(1),
        }
    }

    pub fn from_settings(network: &NetworkSettings) -> Self {
        Self::new(
            &network.server_address,
            network.base_port,
            &network.relay_path,
            network.shard_count,
        )
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn shard_index(&self, participant_id: &ParticipantId) -> u32 {
        stable_hash(participant_id.as_str()) % self.shard_count
    }

    pub fn select_endpoint(&self, participant_id: &ParticipantId) -> String {
        self.endpoint_for(self.shard_index(participant_id))
    }

    pub fn endpoint_for(&self, index: u32) -> String {
        let port = u32::from(self.base_port) + index;
        format!("{}:{}{}", self.server_address, port, self.relay_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> ShardSelector {
        ShardSelector::new("ws://62.68.75.23", 5000, "/player", 3)
    }

    #[test]
    fn test_same_id_same_shard() {
        let selector = selector();
        for _ in 0..50 {
            let id = ParticipantId::random();
            let first = selector.select_endpoint(&id);
            assert_eq!(first, selector.select_endpoint(&id));
            assert_eq!(first, selector.clone().select_endpoint(&id));
        }
    }

    #[test]
    fn test_index_within_range() {
        let selector = selector();
        for _ in 0..200 {
            assert!(selector.shard_index(&ParticipantId::random()) < 3);
        }
    }

    #[test]
    fn test_endpoint_format() {
        let selector = selector();
        // "a": (23 * 31 + 97) % 3 == 810 % 3 == 0
        assert_eq!(selector.shard_index(&ParticipantId::from("a")), 0);
        assert_eq!(
            selector.select_endpoint(&ParticipantId::from("a")),
            "ws://62.68.75.23:5000/player"
        );
        assert_eq!(selector.endpoint_for(2), "ws://62.68.75.23:5002/player");
    }

    #[test]
    fn test_zero_shards_clamped() {
        let selector = ShardSelector::new("ws://localhost", 6000, "/ws", 0);
        assert_eq!(selector.shard_count(), 1);
        assert_eq!(
            selector.select_endpoint(&ParticipantId::from("anyone")),
            "ws://localhost:6000/ws"
        );
    }
}
