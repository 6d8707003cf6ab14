//! Replicated participants known to this client.

use automatamp_net::{Guid, PlayerData, BUTTON_COUNT};
use std::collections::HashMap;

/// A remote (or the local) participant as last described by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    /// Server-assigned identifier, stable for the player's lifetime.
    pub guid: Guid,
    /// Display name, set at creation.
    pub name: String,
    /// Appearance identifier, set at creation.
    pub model: u32,
    /// Most recent movement/animation snapshot.
    pub last_state: Option<PlayerData>,
    /// Most recent raw button state.
    pub last_buttons: Option<[u32; BUTTON_COUNT]>,
    /// Held-button bitmask derived from `last_buttons`.
    pub held_button_flags: u32,
}

impl Player {
    /// Freshly created player with no state received yet.
    pub fn new(guid: Guid, name: impl Into<String>, model: u32) -> Self {
        Self {
            guid,
            name: name.into(),
            model,
            last_state: None,
            last_buttons: None,
            held_button_flags: 0,
        }
    }
}

/// Guid-keyed store; sole owner of every [`Player`].
#[derive(Debug, Default)]
pub struct EntityStore {
    players: HashMap<Guid, Player>,
}

impl EntityStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a player, replacing and returning any previous entry with the
    /// same guid.
    pub fn insert(&mut self, player: Player) -> Option<Player> {
        self.players.insert(player.guid, player)
    }

    /// Remove a player. Absent guids are a no-op.
    pub fn remove(&mut self, guid: Guid) -> Option<Player> {
        self.players.remove(&guid)
    }

    /// Look up a player.
    pub fn get(&self, guid: Guid) -> Option<&Player> {
        self.players.get(&guid)
    }

    /// Look up a player for in-place update.
    pub fn get_mut(&mut self, guid: Guid) -> Option<&mut Player> {
        self.players.get_mut(&guid)
    }

    /// Whether `guid` is currently live.
    pub fn contains(&self, guid: Guid) -> bool {
        self.players.contains_key(&guid)
    }

    /// Number of live players.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether no players are live.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Iterate over live players in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Sorted guids of live players.
    pub fn guids(&self) -> Vec<Guid> {
        let mut guids: Vec<Guid> = self.players.keys().copied().collect();
        guids.sort_unstable();
        guids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup() {
        let mut store = EntityStore::new();
        assert!(store.insert(Player::new(7, "9S", 0x10000)).is_none());

        let player = store.get(7).expect("player present");
        assert_eq!(player.name, "9S");
        assert_eq!(player.model, 0x10000);
        assert!(player.last_state.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn insert_overwrites_same_guid() {
        let mut store = EntityStore::new();
        store.insert(Player::new(7, "old", 1));
        let previous = store.insert(Player::new(7, "new", 2)).expect("replaced");

        assert_eq!(previous.name, "old");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(7).map(|p| p.name.as_str()), Some("new"));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut store = EntityStore::new();
        store.insert(Player::new(1, "a", 0));
        store.insert(Player::new(2, "b", 0));

        assert!(store.remove(1).is_some());
        let after_first = store.guids();
        assert!(store.remove(1).is_none());
        assert_eq!(store.guids(), after_first);
        assert_eq!(store.guids(), vec![2]);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut store = EntityStore::new();
        store.insert(Player::new(1, "a", 0));
        assert!(store.remove(99).is_none());
        assert_eq!(store.guids(), vec![1]);
    }
}
