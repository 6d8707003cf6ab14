//! Envelope validation and outbound packet assembly.

use crate::codec::{decode_payload, encode_envelope, encode_payload};
use crate::protocol::{Envelope, Guid, PacketType, PlayerPacket, PROTOCOL_MAGIC};
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::error;

/// Check an inbound envelope against the protocol invariants.
///
/// Only `magic` and `id` are inspected; payload shape is left to the
/// handler that decodes it.
pub fn validate(envelope: &Envelope) -> bool {
    if envelope.magic != PROTOCOL_MAGIC {
        error!(magic = envelope.magic, "Invalid magic number");
        return false;
    }

    if envelope.id == PacketType::Invalid.id() {
        error!(id = envelope.id, "Invalid packet type");
        return false;
    }

    true
}

/// Wrap an optional payload with the protocol magic and type tag.
///
/// An empty payload is omitted entirely rather than encoded as a
/// zero-length field.
pub fn build_envelope(packet_type: PacketType, payload: Option<&[u8]>) -> Result<Vec<u8>> {
    let envelope = Envelope {
        magic: PROTOCOL_MAGIC,
        id: packet_type.id(),
        data: payload.filter(|data| !data.is_empty()).map(<[u8]>::to_vec),
    };
    encode_envelope(&envelope)
}

/// Encode `record` and wrap it into an envelope of `packet_type`.
pub fn build_packet<T: Serialize>(packet_type: PacketType, record: &T) -> Result<Vec<u8>> {
    let payload = encode_payload(record)
        .with_context(|| format!("Failed to encode {} payload", packet_type.name()))?;
    build_envelope(packet_type, Some(&payload))
}

/// Decode the relay wrapper carried by a bounced envelope.
pub fn open_bounced(envelope: &Envelope) -> Result<PlayerPacket> {
    decode_payload(envelope.payload()).with_context(|| {
        format!(
            "Invalid player packet {} ({})",
            envelope.id,
            crate::protocol::packet_name(envelope.id)
        )
    })
}

/// Wrap a client payload the way the server relays it to other peers.
pub fn wrap_bounced(
    packet_type: PacketType,
    sender: Guid,
    payload: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let relay = PlayerPacket {
        guid: sender,
        data: payload.filter(|data| !data.is_empty()).map(<[u8]>::to_vec),
    };
    build_packet(packet_type, &relay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_envelope;
    use crate::protocol::{AnimationStart, DestroyPlayer};

    #[test]
    fn test_validate_accepts_well_formed() {
        let envelope = Envelope {
            magic: PROTOCOL_MAGIC,
            id: PacketType::Pong.id(),
            data: None,
        };
        assert!(validate(&envelope));
    }

    #[test]
    fn test_validate_rejects_bad_magic() {
        let envelope = Envelope {
            magic: 0xDEADBEEF,
            id: PacketType::Pong.id(),
            data: None,
        };
        assert!(!validate(&envelope));
    }

    #[test]
    fn test_validate_rejects_zero_id() {
        let envelope = Envelope {
            magic: PROTOCOL_MAGIC,
            id: 0,
            data: Some(vec![1]),
        };
        assert!(!validate(&envelope));
    }

    #[test]
    fn test_validate_ignores_unknown_ids() {
        let envelope = Envelope {
            magic: PROTOCOL_MAGIC,
            id: 77,
            data: None,
        };
        assert!(validate(&envelope));
    }

    #[test]
    fn test_ping_has_no_payload_field() {
        let bytes = build_envelope(PacketType::Ping, None).expect("build");
        let envelope = decode_envelope(&bytes).expect("decode");
        assert_eq!(envelope.magic, PROTOCOL_MAGIC);
        assert_eq!(envelope.id, PacketType::Ping.id());
        assert_eq!(envelope.data, None);
    }

    #[test]
    fn test_empty_payload_is_omitted() {
        let bytes = build_envelope(PacketType::Ping, Some(&[])).expect("build");
        let envelope = decode_envelope(&bytes).expect("decode");
        assert_eq!(envelope.data, None);
    }

    #[test]
    fn test_build_packet_embeds_payload() {
        let bytes = build_packet(PacketType::DestroyPlayer, &DestroyPlayer { guid: 9 })
            .expect("build");
        let envelope = decode_envelope(&bytes).expect("decode");
        let destroy: DestroyPlayer = decode_payload(envelope.payload()).expect("payload");
        assert_eq!(destroy.guid, 9);
    }

    #[test]
    fn test_bounced_wrap_and_open() {
        let inner = encode_payload(&AnimationStart {
            anim: 1,
            variant: 2,
            a3: 3,
            a4: 4,
        })
        .expect("encode");
        let bytes = wrap_bounced(PacketType::AnimationStart, 77, Some(&inner)).expect("wrap");
        let envelope = decode_envelope(&bytes).expect("decode");
        assert_eq!(envelope.id, PacketType::AnimationStart.id());

        let relay = open_bounced(&envelope).expect("open");
        assert_eq!(relay.guid, 77);
        assert_eq!(relay.payload(), inner.as_slice());
    }

    #[test]
    fn test_open_bounced_rejects_garbage() {
        let envelope = Envelope {
            magic: PROTOCOL_MAGIC,
            id: PacketType::PlayerData.id(),
            data: Some(vec![0xFF; 3]),
        };
        assert!(open_bounced(&envelope).is_err());
    }
}
