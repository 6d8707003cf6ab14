//! Protocol constants, packet type tags and payload records.
//!
//! Every record here is encoded with postcard (see [`crate::codec`]) and
//! travels inside an [`Envelope`].

use serde::{Deserialize, Serialize};

/// Protocol magic identifying the AutomataMP packet family ("NIER").
pub const PROTOCOL_MAGIC: u32 = 1347240270;

/// Protocol major version sent in [`Hello`].
pub const PROTOCOL_VERSION_MAJOR: u32 = 1;

/// Protocol minor version sent in [`Hello`].
pub const PROTOCOL_VERSION_MINOR: u32 = 0;

/// Protocol patch version sent in [`Hello`].
pub const PROTOCOL_VERSION_PATCH: u32 = 0;

/// Port the relay server listens on by default.
pub const DEFAULT_PORT: u16 = 6969;

/// Maximum size of a single encoded packet (bytes).
pub const MAX_PACKET_LEN: usize = 64 * 1024;

/// Number of button slots carried by a [`Buttons`] packet.
pub const BUTTON_COUNT: usize = 8;

/// Server-assigned participant identifier.
pub type Guid = u64;

/// Semantic type tag carried by every envelope.
///
/// Ids in `[ClientStart, ClientEnd)` are client-originated packets that the
/// server relays to other clients wrapped in a [`PlayerPacket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum PacketType {
    /// Reserved, never valid on the wire.
    Invalid = 0,
    /// Keepalive request.
    Ping = 1,
    /// Keepalive reply.
    Pong = 2,
    /// Client greeting carrying version and credentials.
    Hello = 3,
    /// Server acceptance carrying the assigned guid.
    Welcome = 4,
    /// A participant joined.
    CreatePlayer = 5,
    /// A participant left.
    DestroyPlayer = 6,
    /// Start of the relayed range (marker only).
    ClientStart = 1000,
    /// Movement/animation snapshot.
    PlayerData = 1001,
    /// Animation started by a participant.
    AnimationStart = 1002,
    /// Raw controller button state.
    Buttons = 1003,
    /// End of the relayed range (marker only, exclusive).
    ClientEnd = 1004,
}

impl PacketType {
    /// Resolve a raw wire id, `None` for ids outside the table.
    pub fn from_u32(id: u32) -> Option<Self> {
        let ty = match id {
            0 => Self::Invalid,
            1 => Self::Ping,
            2 => Self::Pong,
            3 => Self::Hello,
            4 => Self::Welcome,
            5 => Self::CreatePlayer,
            6 => Self::DestroyPlayer,
            1000 => Self::ClientStart,
            1001 => Self::PlayerData,
            1002 => Self::AnimationStart,
            1003 => Self::Buttons,
            1004 => Self::ClientEnd,
            _ => return None,
        };
        Some(ty)
    }

    /// Raw wire id.
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Whether packets of this type arrive wrapped in a [`PlayerPacket`].
    pub fn is_bounced(self) -> bool {
        is_bounced(self.id())
    }

    /// Stable name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::Invalid => "ID_INVALID",
            Self::Ping => "ID_PING",
            Self::Pong => "ID_PONG",
            Self::Hello => "ID_HELLO",
            Self::Welcome => "ID_WELCOME",
            Self::CreatePlayer => "ID_CREATE_PLAYER",
            Self::DestroyPlayer => "ID_DESTROY_PLAYER",
            Self::ClientStart => "ID_CLIENT_START",
            Self::PlayerData => "ID_PLAYER_DATA",
            Self::AnimationStart => "ID_ANIMATION_START",
            Self::Buttons => "ID_BUTTONS",
            Self::ClientEnd => "ID_CLIENT_END",
        }
    }
}

/// Whether a raw id falls in the relayed client range.
pub fn is_bounced(id: u32) -> bool {
    (PacketType::ClientStart.id()..PacketType::ClientEnd.id()).contains(&id)
}

/// Human-readable name for a raw id, used when logging unknown packets.
pub fn packet_name(id: u32) -> &'static str {
    PacketType::from_u32(id).map_or("UNKNOWN", PacketType::name)
}

/// Outer unit of transmission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    /// Must equal [`PROTOCOL_MAGIC`].
    pub magic: u32,
    /// Raw [`PacketType`] id; `0` is invalid.
    pub id: u32,
    /// Optional codec-produced payload.
    pub data: Option<Vec<u8>>,
}

impl Envelope {
    /// Resolved packet type, if the id is known.
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u32(self.id)
    }

    /// Payload bytes, empty when absent.
    pub fn payload(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }
}

/// Relay wrapper the server puts around client-originated packets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerPacket {
    /// Guid of the participant that sent the inner packet.
    pub guid: Guid,
    /// Inner payload, decoded according to the outer envelope id.
    pub data: Option<Vec<u8>>,
}

impl PlayerPacket {
    /// Inner payload bytes, empty when absent.
    pub fn payload(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }
}

/// Client greeting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    /// Client protocol major version.
    pub major: u32,
    /// Client protocol minor version.
    pub minor: u32,
    /// Client protocol patch version.
    pub patch: u32,
    /// Display name.
    pub name: String,
    /// Server password (may be empty).
    pub password: String,
    /// Appearance identifier of the local character.
    pub model: u32,
}

impl Hello {
    /// Greeting stamped with this build's protocol version.
    pub fn new(name: impl Into<String>, password: impl Into<String>, model: u32) -> Self {
        Self {
            major: PROTOCOL_VERSION_MAJOR,
            minor: PROTOCOL_VERSION_MINOR,
            patch: PROTOCOL_VERSION_PATCH,
            name: name.into(),
            password: password.into(),
            model,
        }
    }
}

/// Server acceptance of a [`Hello`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Welcome {
    /// Guid assigned to this client.
    pub guid: Guid,
    /// Whether this client hosts the session.
    pub is_master_client: bool,
}

/// Announcement of a participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatePlayer {
    /// Participant guid.
    pub guid: Guid,
    /// Display name.
    pub name: String,
    /// Appearance identifier.
    pub model: u32,
}

/// Departure of a participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestroyPlayer {
    /// Participant guid.
    pub guid: Guid,
}

/// Animation triggered by a participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnimationStart {
    /// Animation id.
    pub anim: u32,
    /// Animation variant.
    pub variant: u32,
    /// Third engine argument.
    pub a3: u32,
    /// Fourth engine argument.
    pub a4: u32,
}

/// Three-component position.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vector3f {
    /// X component.
    pub x: f32,
    /// Y component.
    pub y: f32,
    /// Z component.
    pub z: f32,
}

impl Vector3f {
    /// Build a vector from components.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Movement/animation snapshot of a participant.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerData {
    /// Flashlight toggle.
    pub flashlight: bool,
    /// Movement speed.
    pub speed: f32,
    /// Facing angle.
    pub facing: f32,
    /// Secondary facing angle.
    pub facing2: f32,
    /// Equipped weapon slot.
    pub weapon_index: u32,
    /// Equipped pod slot.
    pub pod_index: u32,
    /// Bitmask of held controller buttons.
    pub held_button_flags: u32,
    /// World position.
    pub position: Vector3f,
}

/// Controller button state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Buttons {
    /// Per-slot press counters; non-zero means held.
    pub buttons: [u32; BUTTON_COUNT],
}

impl Buttons {
    /// Bitmask with bit `i` set when slot `i` is held.
    pub fn held_flags(&self) -> u32 {
        self.buttons
            .iter()
            .enumerate()
            .filter(|(_, &value)| value > 0)
            .fold(0, |flags, (i, _)| flags | (1 << i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_ids_roundtrip() {
        for ty in [
            PacketType::Invalid,
            PacketType::Ping,
            PacketType::Pong,
            PacketType::Hello,
            PacketType::Welcome,
            PacketType::CreatePlayer,
            PacketType::DestroyPlayer,
            PacketType::ClientStart,
            PacketType::PlayerData,
            PacketType::AnimationStart,
            PacketType::Buttons,
            PacketType::ClientEnd,
        ] {
            assert_eq!(PacketType::from_u32(ty.id()), Some(ty));
        }
        assert_eq!(PacketType::from_u32(7), None);
        assert_eq!(packet_name(4242), "UNKNOWN");
    }

    #[test]
    fn test_bounced_range_is_half_open() {
        assert!(PacketType::ClientStart.is_bounced());
        assert!(PacketType::PlayerData.is_bounced());
        assert!(PacketType::AnimationStart.is_bounced());
        assert!(PacketType::Buttons.is_bounced());
        assert!(!PacketType::ClientEnd.is_bounced());
        assert!(!PacketType::CreatePlayer.is_bounced());
        assert!(!is_bounced(0));
    }

    #[test]
    fn test_held_flags() {
        let buttons = Buttons {
            buttons: [0, 3, 0, 1, 0, 0, 0, 9],
        };
        assert_eq!(buttons.held_flags(), 0b1000_1010);
        assert_eq!(Buttons { buttons: [0; 8] }.held_flags(), 0);
    }

    #[test]
    fn test_hello_carries_build_version() {
        let hello = Hello::new("Client", "secret", 0x10000);
        assert_eq!(
            (hello.major, hello.minor, hello.patch),
            (
                PROTOCOL_VERSION_MAJOR,
                PROTOCOL_VERSION_MINOR,
                PROTOCOL_VERSION_PATCH
            )
        );
        assert_eq!(hello.model, 0x10000);
    }
}
