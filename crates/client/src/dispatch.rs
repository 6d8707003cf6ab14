//! Routing of validated inbound envelopes.
//!
//! Dispatch happens in two steps: [`InboundPacket::decode`] turns an
//! envelope into one of a closed set of variants (unwrapping the relay
//! layer for bounced ids up front), then [`Dispatcher::apply`] runs the
//! handler for that variant against the entity store.

use crate::entity_store::{EntityStore, Player};
use crate::hooks::SessionHooks;
use crate::session::LocalSession;
use anyhow::{Context, Result};
use automatamp_net::{
    decode_payload, is_bounced, open_bounced, packet_name, AnimationStart, Buttons,
    CreatePlayer, DestroyPlayer, Envelope, Guid, PacketType, PlayerData, Welcome,
};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Decoded form of an inbound packet.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPacket {
    /// Keepalive reply.
    Pong,
    /// Server acceptance (only meaningful during the handshake).
    Welcome(Welcome),
    /// Participant joined.
    CreatePlayer(CreatePlayer),
    /// Participant left.
    DestroyPlayer(DestroyPlayer),
    /// Relayed animation start.
    AnimationStart {
        /// Relaying participant.
        sender: Guid,
        /// Animation parameters.
        animation: AnimationStart,
    },
    /// Relayed movement snapshot.
    PlayerData {
        /// Relaying participant.
        sender: Guid,
        /// Snapshot.
        state: PlayerData,
    },
    /// Relayed controller buttons.
    Buttons {
        /// Relaying participant.
        sender: Guid,
        /// Button state.
        buttons: Buttons,
    },
    /// Any id this client has no handler for.
    Unknown(u32),
}

impl InboundPacket {
    /// Decode a validated envelope.
    pub fn decode(envelope: &Envelope) -> Result<Self> {
        let packet_type = envelope.packet_type();

        if is_bounced(envelope.id) {
            let relay = open_bounced(envelope)?;
            let sender = relay.guid;
            let payload = relay.payload();

            return Ok(match packet_type {
                Some(PacketType::PlayerData) => Self::PlayerData {
                    sender,
                    state: decode_payload(payload).context("Invalid player data")?,
                },
                Some(PacketType::AnimationStart) => Self::AnimationStart {
                    sender,
                    animation: decode_payload(payload).context("Invalid animation start")?,
                },
                Some(PacketType::Buttons) => Self::Buttons {
                    sender,
                    buttons: decode_payload(payload).context("Invalid buttons")?,
                },
                _ => Self::Unknown(envelope.id),
            });
        }

        let payload = envelope.payload();
        Ok(match packet_type {
            Some(PacketType::Pong) => Self::Pong,
            Some(PacketType::Welcome) => {
                Self::Welcome(decode_payload(payload).context("Invalid welcome packet")?)
            }
            Some(PacketType::CreatePlayer) => Self::CreatePlayer(
                decode_payload(payload).context("Invalid create player packet")?,
            ),
            Some(PacketType::DestroyPlayer) => Self::DestroyPlayer(
                decode_payload(payload).context("Invalid destroy player packet")?,
            ),
            _ => Self::Unknown(envelope.id),
        })
    }
}

/// What a single dispatch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Keepalive round-trip observed.
    Pong,
    /// A player was inserted into the store.
    Created {
        /// Player guid.
        guid: Guid,
        /// Whether it is this client's own player.
        is_local: bool,
        /// Whether an entry with the same guid was overwritten.
        replaced: bool,
    },
    /// A destroy was processed.
    Destroyed {
        /// Player guid.
        guid: Guid,
        /// Whether the player was present.
        existed: bool,
    },
    /// A player's snapshot was overwritten.
    StateUpdated(Guid),
    /// An animation was forwarded to the hooks.
    AnimationStarted(Guid),
    /// A player's buttons were overwritten.
    ButtonsUpdated(Guid),
    /// A relayed packet originating from this client was ignored.
    SelfEcho(Guid),
    /// A relayed packet referenced a guid not in the store.
    UnknownSender(Guid),
    /// The packet was understood but deliberately dropped.
    Ignored,
    /// No handler for this id.
    Unknown(u32),
    /// The payload failed to decode.
    Malformed,
}

/// Applies inbound packets to the entity store and forwards them to the
/// session hooks.
#[derive(Debug, Default, Clone)]
pub struct Dispatcher {
    blocked_animations: HashSet<u32>,
}

impl Dispatcher {
    /// Dispatcher that forwards every animation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher that drops the listed animation ids before they reach the
    /// hooks.
    pub fn with_blocked_animations(blocked: impl IntoIterator<Item = u32>) -> Self {
        Self {
            blocked_animations: blocked.into_iter().collect(),
        }
    }

    /// Decode and apply a validated envelope. Never fails: decode errors and
    /// unknown references are logged and the packet is discarded.
    pub fn dispatch<H: SessionHooks>(
        &self,
        envelope: &Envelope,
        session: &LocalSession,
        store: &mut EntityStore,
        hooks: &mut H,
    ) -> DispatchOutcome {
        if is_bounced(envelope.id) {
            debug!(id = envelope.id, "Bounced packet {} received", packet_name(envelope.id));
        }

        match InboundPacket::decode(envelope) {
            Ok(packet) => self.apply(packet, session, store, hooks),
            Err(err) => {
                warn!(
                    id = envelope.id,
                    "Discarding {} packet: {:#}",
                    packet_name(envelope.id),
                    err
                );
                DispatchOutcome::Malformed
            }
        }
    }

    /// Run the handler for one decoded packet.
    pub fn apply<H: SessionHooks>(
        &self,
        packet: InboundPacket,
        session: &LocalSession,
        store: &mut EntityStore,
        hooks: &mut H,
    ) -> DispatchOutcome {
        match packet {
            InboundPacket::Pong => {
                info!("Pong received");
                DispatchOutcome::Pong
            }
            InboundPacket::Welcome(welcome) => {
                warn!(guid = welcome.guid, "Welcome received while active, ignoring");
                DispatchOutcome::Ignored
            }
            InboundPacket::CreatePlayer(create) => create_player(create, session, store, hooks),
            InboundPacket::DestroyPlayer(destroy) => {
                info!(guid = destroy.guid, "Player destruction packet received");
                let existed = store.remove(destroy.guid).is_some();
                if existed {
                    hooks.on_entity_destroyed(destroy.guid);
                }
                DispatchOutcome::Destroyed {
                    guid: destroy.guid,
                    existed,
                }
            }
            InboundPacket::AnimationStart { sender, animation } => {
                if let Some(outcome) = check_sender(sender, session, store) {
                    return outcome;
                }
                if self.blocked_animations.contains(&animation.anim) {
                    debug!(guid = sender, anim = animation.anim, "Animation blocked");
                    return DispatchOutcome::Ignored;
                }
                hooks.on_animation_start(sender, &animation);
                DispatchOutcome::AnimationStarted(sender)
            }
            InboundPacket::PlayerData { sender, state } => {
                if let Some(outcome) = check_sender(sender, session, store) {
                    return outcome;
                }
                match store.get_mut(sender) {
                    Some(player) => {
                        player.last_state = Some(state);
                        hooks.on_state_updated(sender, &state);
                        DispatchOutcome::StateUpdated(sender)
                    }
                    None => DispatchOutcome::UnknownSender(sender),
                }
            }
            InboundPacket::Buttons { sender, buttons } => {
                if let Some(outcome) = check_sender(sender, session, store) {
                    return outcome;
                }
                match store.get_mut(sender) {
                    Some(player) => {
                        let held = buttons.held_flags();
                        player.last_buttons = Some(buttons.buttons);
                        player.held_button_flags = held;
                        hooks.on_buttons(sender, &buttons.buttons, held);
                        DispatchOutcome::ButtonsUpdated(sender)
                    }
                    None => DispatchOutcome::UnknownSender(sender),
                }
            }
            InboundPacket::Unknown(id) => {
                error!(id, "Unknown packet type {} ({})", id, packet_name(id));
                DispatchOutcome::Unknown(id)
            }
        }
    }
}

fn create_player<H: SessionHooks>(
    create: CreatePlayer,
    session: &LocalSession,
    store: &mut EntityStore,
    hooks: &mut H,
) -> DispatchOutcome {
    info!(guid = create.guid, "Player creation packet received");

    let guid = create.guid;
    let is_local = session.is_self(guid);
    let replaced = store
        .insert(Player::new(guid, create.name, create.model))
        .is_some();

    if replaced {
        debug!(guid, "Replaced existing player");
    }

    if let Some(player) = store.get(guid) {
        hooks.on_entity_created(player, is_local);
    }

    DispatchOutcome::Created {
        guid,
        is_local,
        replaced,
    }
}

/// Shared guard for relayed packets: drops echoes of our own packets and
/// packets from senders this client has not been told about.
fn check_sender(
    sender: Guid,
    session: &LocalSession,
    store: &EntityStore,
) -> Option<DispatchOutcome> {
    if session.is_self(sender) {
        debug!(guid = sender, "Ignoring relayed packet from local player");
        return Some(DispatchOutcome::SelfEcho(sender));
    }

    if !store.contains(sender) {
        warn!(guid = sender, "Player not found");
        return Some(DispatchOutcome::UnknownSender(sender));
    }

    None
}
