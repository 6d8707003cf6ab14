//! Ready-made wire packets as a server would send them.
//!
//! Helpers panic on encode failure; they only ever see well-formed input.

use crate::scripted::SentPacket;
use automatamp_net::{
    build_envelope, build_packet, decode_envelope, decode_payload, encode_envelope,
    encode_payload, wrap_bounced, AnimationStart, Buttons, CreatePlayer, DestroyPlayer, Envelope,
    Guid, PacketType, PlayerData, Welcome, PROTOCOL_MAGIC,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

fn packet<T: Serialize>(packet_type: PacketType, record: &T) -> Vec<u8> {
    build_packet(packet_type, record).expect("fixture encodes")
}

fn bounced<T: Serialize>(packet_type: PacketType, sender: Guid, record: &T) -> Vec<u8> {
    let inner = encode_payload(record).expect("fixture encodes");
    wrap_bounced(packet_type, sender, Some(&inner)).expect("fixture encodes")
}

/// Server acceptance of the client's Hello.
pub fn welcome(guid: Guid, is_master_client: bool) -> Vec<u8> {
    packet(
        PacketType::Welcome,
        &Welcome {
            guid,
            is_master_client,
        },
    )
}

/// Keepalive reply.
pub fn pong() -> Vec<u8> {
    build_envelope(PacketType::Pong, None).expect("fixture encodes")
}

/// Keepalive request.
pub fn ping() -> Vec<u8> {
    build_envelope(PacketType::Ping, None).expect("fixture encodes")
}

/// Announcement of a participant.
pub fn create_player(guid: Guid, name: &str, model: u32) -> Vec<u8> {
    packet(
        PacketType::CreatePlayer,
        &CreatePlayer {
            guid,
            name: name.to_string(),
            model,
        },
    )
}

/// Departure of a participant.
pub fn destroy_player(guid: Guid) -> Vec<u8> {
    packet(PacketType::DestroyPlayer, &DestroyPlayer { guid })
}

/// Movement snapshot relayed from `sender`.
pub fn bounced_player_data(sender: Guid, data: &PlayerData) -> Vec<u8> {
    bounced(PacketType::PlayerData, sender, data)
}

/// Animation relayed from `sender`.
pub fn bounced_animation(sender: Guid, animation: &AnimationStart) -> Vec<u8> {
    bounced(PacketType::AnimationStart, sender, animation)
}

/// Controller buttons relayed from `sender`.
pub fn bounced_buttons(sender: Guid, buttons: &Buttons) -> Vec<u8> {
    bounced(PacketType::Buttons, sender, buttons)
}

/// Payload-less envelope carrying an arbitrary magic value.
pub fn with_magic(magic: u32, packet_type: PacketType) -> Vec<u8> {
    raw(magic, packet_type.id(), None)
}

/// Envelope with arbitrary fields, bypassing the builder.
pub fn raw(magic: u32, id: u32, data: Option<Vec<u8>>) -> Vec<u8> {
    encode_envelope(&Envelope { magic, id, data }).expect("fixture encodes")
}

/// Envelope with the protocol magic and an arbitrary id.
pub fn with_id(id: u32) -> Vec<u8> {
    raw(PROTOCOL_MAGIC, id, None)
}

/// Decode the payload of a recorded send, asserting its packet type.
pub fn decode_sent<T: DeserializeOwned>(sent: &SentPacket, packet_type: PacketType) -> T {
    let envelope = decode_envelope(&sent.bytes).expect("sent packet decodes");
    assert_eq!(
        envelope.id,
        packet_type.id(),
        "expected {} packet",
        packet_type.name()
    );
    decode_payload(envelope.payload()).expect("sent payload decodes")
}
