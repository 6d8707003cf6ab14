#![warn(missing_docs)]
//! Wire protocol and transport shared by the AutomataMP client and relay.

mod channel;
mod codec;
mod envelope;
mod protocol;
mod transport;

pub use channel::{read_frame, write_frame, Delivery};
pub use codec::{decode_envelope, decode_payload, encode_envelope, encode_payload};
pub use envelope::{build_envelope, build_packet, open_bounced, validate, wrap_bounced};
pub use protocol::{
    is_bounced, packet_name, AnimationStart, Buttons, CreatePlayer, DestroyPlayer, Envelope, Guid,
    Hello, PacketType, PlayerData, PlayerPacket, Vector3f, Welcome, BUTTON_COUNT, DEFAULT_PORT,
    MAX_PACKET_LEN, PROTOCOL_MAGIC, PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR,
    PROTOCOL_VERSION_PATCH,
};
pub use transport::{
    ConnectionHandle, QuicTransport, QuicTransportConfig, Transport, TransportEvent,
    ALPN_PROTOCOL,
};
