#![warn(missing_docs)]
//! Test surfaces for the session engine: a scripted transport, packet
//! fixtures and a loopback relay server.

pub mod fixtures;
mod relay;
mod scripted;

pub use relay::RelayServer;
pub use scripted::{ScriptedTransport, SentPacket};
