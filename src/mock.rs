use automatamp_client::{LoggingHooks, Player, SessionHooks};
use automatamp_net::{AnimationStart, Guid, PlayerData, Vector3f, BUTTON_COUNT};
use rand::Rng;

/// Stand-in for a game: logs every remote event and reports a local player
/// that idles near the origin.
#[derive(Debug, Default)]
pub struct MockPlayer {
    log: LoggingHooks,
}

impl MockPlayer {
    fn sample<R: Rng>(rng: &mut R) -> PlayerData {
        PlayerData {
            flashlight: true,
            speed: 0.1,
            facing: 0.5,
            facing2: 0.25,
            weapon_index: 1,
            pod_index: 0,
            held_button_flags: 0,
            position: Vector3f::new(rng.gen(), rng.gen(), 250.0),
        }
    }
}

impl SessionHooks for MockPlayer {
    fn on_entity_created(&mut self, player: &Player, is_local: bool) {
        self.log.on_entity_created(player, is_local);
    }

    fn on_entity_destroyed(&mut self, guid: Guid) {
        self.log.on_entity_destroyed(guid);
    }

    fn on_animation_start(&mut self, guid: Guid, animation: &AnimationStart) {
        self.log.on_animation_start(guid, animation);
    }

    fn on_state_updated(&mut self, guid: Guid, state: &PlayerData) {
        self.log.on_state_updated(guid, state);
    }

    fn on_buttons(&mut self, guid: Guid, buttons: &[u32; BUTTON_COUNT], held_flags: u32) {
        self.log.on_buttons(guid, buttons, held_flags);
    }

    fn local_snapshot(&mut self) -> Option<PlayerData> {
        Some(Self::sample(&mut rand::thread_rng()))
    }
}
