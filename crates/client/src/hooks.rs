//! Callbacks from the session engine into game logic.

use crate::entity_store::Player;
use automatamp_net::{AnimationStart, Guid, PlayerData, BUTTON_COUNT};
use tracing::info;

/// Reactive collaborator invoked by the dispatcher and scheduler.
///
/// Every method has a no-op default so implementors only override what they
/// react to.
pub trait SessionHooks {
    /// A participant was created. `is_local` is true for this client's own
    /// player.
    fn on_entity_created(&mut self, _player: &Player, _is_local: bool) {}

    /// A participant was removed from the store.
    fn on_entity_destroyed(&mut self, _guid: Guid) {}

    /// A participant started an animation.
    fn on_animation_start(&mut self, _guid: Guid, _animation: &AnimationStart) {}

    /// A participant's movement snapshot changed.
    fn on_state_updated(&mut self, _guid: Guid, _state: &PlayerData) {}

    /// A participant's controller buttons changed.
    fn on_buttons(&mut self, _guid: Guid, _buttons: &[u32; BUTTON_COUNT], _held_flags: u32) {}

    /// Current snapshot of the local player, sampled on every broadcast.
    /// `None` skips the broadcast.
    fn local_snapshot(&mut self) -> Option<PlayerData> {
        None
    }
}

/// Hooks that only log, standing in for a game that spawns avatars.
#[derive(Debug, Default)]
pub struct LoggingHooks;

impl SessionHooks for LoggingHooks {
    fn on_entity_created(&mut self, player: &Player, is_local: bool) {
        info!(
            guid = player.guid,
            model = player.model,
            is_local,
            "Spawning player {}",
            player.name
        );
    }

    fn on_entity_destroyed(&mut self, guid: Guid) {
        info!(guid, "Destroying player");
    }

    fn on_animation_start(&mut self, guid: Guid, animation: &AnimationStart) {
        info!(
            guid,
            anim = animation.anim,
            variant = animation.variant,
            a3 = animation.a3,
            a4 = animation.a4,
            "Animation start"
        );
    }

    fn on_state_updated(&mut self, guid: Guid, state: &PlayerData) {
        info!(
            guid,
            flashlight = state.flashlight,
            speed = state.speed,
            facing = state.facing,
            x = state.position.x,
            y = state.position.y,
            z = state.position.z,
            "Player data"
        );
    }

    fn on_buttons(&mut self, guid: Guid, _buttons: &[u32; BUTTON_COUNT], held_flags: u32) {
        info!(guid, held_flags, "Buttons");
    }
}

/// One recorded hook invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    /// [`SessionHooks::on_entity_created`]
    Created {
        /// Player guid.
        guid: Guid,
        /// Whether it is the local player.
        is_local: bool,
    },
    /// [`SessionHooks::on_entity_destroyed`]
    Destroyed(Guid),
    /// [`SessionHooks::on_animation_start`]
    Animation(Guid, AnimationStart),
    /// [`SessionHooks::on_state_updated`]
    State(Guid, PlayerData),
    /// [`SessionHooks::on_buttons`]
    Buttons(Guid, u32),
}

/// Hooks that remember every call, for headless tooling and tests.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    /// Calls in arrival order.
    pub events: Vec<HookEvent>,
    /// Snapshot returned from [`SessionHooks::local_snapshot`].
    pub snapshot: Option<PlayerData>,
}

impl RecordingHooks {
    /// Recorder that reports `snapshot` as the local state.
    pub fn with_snapshot(snapshot: PlayerData) -> Self {
        Self {
            events: Vec::new(),
            snapshot: Some(snapshot),
        }
    }
}

impl SessionHooks for RecordingHooks {
    fn on_entity_created(&mut self, player: &Player, is_local: bool) {
        self.events.push(HookEvent::Created {
            guid: player.guid,
            is_local,
        });
    }

    fn on_entity_destroyed(&mut self, guid: Guid) {
        self.events.push(HookEvent::Destroyed(guid));
    }

    fn on_animation_start(&mut self, guid: Guid, animation: &AnimationStart) {
        self.events.push(HookEvent::Animation(guid, *animation));
    }

    fn on_state_updated(&mut self, guid: Guid, state: &PlayerData) {
        self.events.push(HookEvent::State(guid, *state));
    }

    fn on_buttons(&mut self, guid: Guid, _buttons: &[u32; BUTTON_COUNT], held_flags: u32) {
        self.events.push(HookEvent::Buttons(guid, held_flags));
    }

    fn local_snapshot(&mut self) -> Option<PlayerData> {
        self.snapshot
    }
}
