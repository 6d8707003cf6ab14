#![warn(missing_docs)]
//! Client-side session engine: handshake, tick loop, packet dispatch and
//! the replicated player store.

mod cancel;
mod dispatch;
mod entity_store;
mod handshake;
mod hooks;
mod scheduler;
mod session;

pub use cancel::CancelToken;
pub use dispatch::{DispatchOutcome, Dispatcher, InboundPacket};
pub use entity_store::{EntityStore, Player};
pub use handshake::{Established, Handshake, HandshakeConfig, HandshakeError, HandshakeState};
pub use hooks::{HookEvent, LoggingHooks, RecordingHooks, SessionHooks};
pub use scheduler::{IdleAction, OutboundIntent, SchedulerConfig, TickOutcome, TickScheduler};
pub use session::LocalSession;
