//! Payload and envelope encoding.
//!
//! Records are serialized with postcard. A record is an opaque blob once
//! encoded; the reader must know which type to expect from the envelope id.

use crate::protocol::{Envelope, MAX_PACKET_LEN};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a payload record.
pub fn encode_payload<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(record).context("Failed to serialize payload")
}

/// Decode a payload record, rejecting trailing bytes.
pub fn decode_payload<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    if data.len() > MAX_PACKET_LEN {
        return Err(anyhow::anyhow!(
            "Payload too large: {} bytes (maximum {})",
            data.len(),
            MAX_PACKET_LEN
        ));
    }

    let (record, rest) =
        postcard::take_from_bytes::<T>(data).context("Failed to deserialize payload")?;

    if !rest.is_empty() {
        return Err(anyhow::anyhow!(
            "Trailing bytes after payload: {} unread",
            rest.len()
        ));
    }

    Ok(record)
}

/// Encode an envelope into the bytes handed to the transport.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>> {
    let bytes = postcard::to_allocvec(envelope).context("Failed to serialize envelope")?;

    if bytes.len() > MAX_PACKET_LEN {
        return Err(anyhow::anyhow!(
            "Envelope too large: {} bytes (maximum {})",
            bytes.len(),
            MAX_PACKET_LEN
        ));
    }

    Ok(bytes)
}

/// Decode an envelope from raw transport bytes.
///
/// Only the structure is checked here; see [`crate::envelope::validate`]
/// for the protocol invariants.
pub fn decode_envelope(data: &[u8]) -> Result<Envelope> {
    decode_payload(data).context("Malformed envelope")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CreatePlayer, PlayerData, Vector3f, Welcome, PROTOCOL_MAGIC};

    #[test]
    fn test_encode_decode_welcome() {
        let welcome = Welcome {
            guid: 42,
            is_master_client: true,
        };
        let bytes = encode_payload(&welcome).expect("encode");
        let decoded: Welcome = decode_payload(&bytes).expect("decode");
        assert_eq!(decoded, welcome);
    }

    #[test]
    fn test_encode_decode_player_data() {
        let data = PlayerData {
            flashlight: true,
            speed: 0.1,
            facing: 0.5,
            facing2: 0.25,
            weapon_index: 1,
            pod_index: 0,
            held_button_flags: 0,
            position: Vector3f::new(1.0, 2.0, 250.0),
        };
        let bytes = encode_payload(&data).expect("encode");
        let decoded: PlayerData = decode_payload(&bytes).expect("decode");
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = encode_payload(&CreatePlayer {
            guid: 1,
            name: "2B".to_string(),
            model: 0x10000,
        })
        .expect("encode");
        bytes.push(0xFF);
        assert!(decode_payload::<CreatePlayer>(&bytes).is_err());
    }

    #[test]
    fn test_decode_truncated_envelope() {
        let bytes = encode_envelope(&Envelope {
            magic: PROTOCOL_MAGIC,
            id: 5,
            data: Some(vec![1, 2, 3, 4]),
        })
        .expect("encode");
        assert!(decode_envelope(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_decode_empty_buffer() {
        assert!(decode_envelope(&[]).is_err());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let data = vec![0u8; MAX_PACKET_LEN + 1];
        assert!(decode_payload::<Vec<u8>>(&data).is_err());
    }
}
