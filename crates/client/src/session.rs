//! The local participant's view of itself.

use crate::entity_store::{EntityStore, Player};
use automatamp_net::{Guid, Welcome};

/// Identity assigned by the server's Welcome.
///
/// Created once per connection and replaced, never mutated, on reconnect.
/// The matching [`Player`] is owned by the [`EntityStore`]; this only
/// remembers its guid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSession {
    guid: Guid,
    is_master_client: bool,
}

impl LocalSession {
    /// Session described by a Welcome.
    pub fn from_welcome(welcome: &Welcome) -> Self {
        Self {
            guid: welcome.guid,
            is_master_client: welcome.is_master_client,
        }
    }

    /// Guid assigned to this client.
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// Whether this client hosts the session.
    pub fn is_master_client(&self) -> bool {
        self.is_master_client
    }

    /// Whether `guid` refers to this client.
    pub fn is_self(&self, guid: Guid) -> bool {
        self.guid == guid
    }

    /// This client's own player, once the server has announced it.
    pub fn self_entity<'a>(&self, store: &'a EntityStore) -> Option<&'a Player> {
        store.get(self.guid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_entity_follows_store() {
        let session = LocalSession::from_welcome(&Welcome {
            guid: 5,
            is_master_client: true,
        });
        let mut store = EntityStore::new();
        assert!(session.self_entity(&store).is_none());

        store.insert(Player::new(5, "2B", 0x10000));
        assert_eq!(session.self_entity(&store).map(|p| p.guid), Some(5));
        assert!(session.is_master_client());

        store.remove(5);
        assert!(session.self_entity(&store).is_none());
    }
}
