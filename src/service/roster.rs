use crate::network::UserEntry;
use crate::utils::ParticipantId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable view of the roster: remote participant id to display name.
pub type RosterSnapshot = Arc<BTreeMap<String, String>>;

/// Other online participants, replaced wholesale on every update so readers
/// never observe a partially applied list.
#[derive(Debug, Default)]
pub struct Roster {
    peers: RwLock<RosterSnapshot>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a new roster built from `users`, skipping the local participant
    /// and entries without an id. Returns the number of peers kept.
    pub fn replace(&self, users: &[UserEntry], local_id: &ParticipantId) -> usize {
        let next: BTreeMap<String, String> = users
            .iter()
            .filter(|u| !u.user_id.is_empty() && u.user_id != local_id.as_str())
            .map(|u| {
                let name = u
                    .user_name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| u.user_id.clone());
                (u.user_id.clone(), name)
            })
            .collect();

        let count = next.len();
        *self.peers.write() = Arc::new(next);
        count
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        self.peers.read().clone()
    }

    pub fn clear(&self) {
        *self.peers.write() = Arc::new(BTreeMap::new());
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PeerLink {
    #[default]
    None,
    /// Connect request sent, no answer yet.
    Pending(String),
    Linked(String),
}

impl PeerLink {
    pub fn peer_id(&self) -> Option<&str> {
        match self {
            PeerLink::None => None,
            PeerLink::Pending(id) | PeerLink::Linked(id) => Some(id),
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, PeerLink::Linked(_))
    }
}

/// The single "connected-to" relation of this engine.
#[derive(Debug, Default)]
pub struct PeerLinkSlot {
    link: RwLock<PeerLink>,
}

impl PeerLinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> PeerLink {
        self.link.read().clone()
    }

    pub fn request(&self, peer_id: &str) {
        *self.link.write() = PeerLink::Pending(peer_id.to_string());
    }

    pub fn accept(&self, peer_id: &str) {
        *self.link.write() = PeerLink::Linked(peer_id.to_string());
    }

    /// Drops a pending attempt, or the link to the rejecting peer.
    pub fn reject(&self, peer_id: &str) {
        let mut link = self.link.write();
        let clear = match &*link {
            PeerLink::Pending(_) => true,
            PeerLink::Linked(current) => current == peer_id,
            PeerLink::None => false,
        };
        if clear {
            *link = PeerLink::None;
        }
    }

    /// Clears the link if it names `peer_id`. Returns whether it did.
    pub fn remote_disconnected(&self, peer_id: &str) -> bool {
        let mut link = self.link.write();
        if link.peer_id() == Some(peer_id) {
            *link = PeerLink::None;
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        *self.link.write() = PeerLink::None;
    }
}
