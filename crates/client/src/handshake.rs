//! Connection bring-up: transport connect, then Hello/Welcome.
//!
//! Both phases poll the transport a bounded number of times, turning a
//! lossy asynchronous exchange into a blocking sequence with explicit
//! timeouts.

use crate::cancel::CancelToken;
use crate::session::LocalSession;
use automatamp_net::{
    build_packet, decode_envelope, decode_payload, packet_name, validate, ConnectionHandle,
    Delivery, Hello, PacketType, Transport, TransportEvent, Welcome,
};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Attempt budgets and Hello contents.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Polls allowed while waiting for the transport to connect.
    pub connect_attempts: u32,
    /// Timeout of each connect poll.
    pub connect_poll: Duration,
    /// Polls allowed while waiting for the Welcome.
    pub welcome_attempts: u32,
    /// Timeout of each welcome poll.
    pub welcome_poll: Duration,
    /// Display name sent in Hello.
    pub name: String,
    /// Server password sent in Hello.
    pub password: String,
    /// Appearance identifier sent in Hello.
    pub model: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 10,
            connect_poll: Duration::from_millis(1000),
            welcome_attempts: 20,
            welcome_poll: Duration::from_millis(100),
            name: "Client".to_string(),
            password: String::new(),
            model: 0,
        }
    }
}

/// Phase of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing attempted yet.
    Idle,
    /// Transport connect issued, waiting for the connect event.
    Connecting,
    /// Hello sent, waiting for the Welcome.
    AwaitingWelcome,
    /// Welcome received; the session is live.
    Active,
    /// Terminal failure.
    Failed,
}

/// Why the handshake failed.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The transport refused to start connecting.
    #[error("failed to initiate connection: {0:#}")]
    Connect(anyhow::Error),
    /// The transport reported a disconnect before the session was active.
    #[error("connection closed during handshake")]
    Disconnected,
    /// No connect event within the budget.
    #[error("no connection after {attempts} attempts")]
    ConnectTimeout {
        /// Polls made.
        attempts: u32,
    },
    /// No Welcome within the budget.
    #[error("no welcome after {attempts} attempts")]
    WelcomeTimeout {
        /// Polls made.
        attempts: u32,
    },
    /// Polling or sending failed.
    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),
    /// The cancel token fired between attempts.
    #[error("handshake cancelled")]
    Cancelled,
}

/// Result of a successful handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Established {
    /// Connection the session runs on.
    pub handle: ConnectionHandle,
    /// Identity assigned by the server.
    pub session: LocalSession,
}

/// Handshake state machine.
#[derive(Debug)]
pub struct Handshake {
    config: HandshakeConfig,
    state: HandshakeState,
    cancel: Option<CancelToken>,
}

impl Handshake {
    /// Idle handshake with the given budgets.
    pub fn new(config: HandshakeConfig) -> Self {
        Self {
            config,
            state: HandshakeState::Idle,
            cancel: None,
        }
    }

    /// Check `cancel` before every poll.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Current phase.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Drive the handshake to `Active` or `Failed`. No retry is attempted
    /// on failure; the caller decides whether to start over.
    pub fn perform<T: Transport>(
        &mut self,
        transport: &mut T,
        addr: SocketAddr,
    ) -> Result<Established, HandshakeError> {
        info!("Performing startup handshake");

        match self.run(transport, addr) {
            Ok(established) => {
                self.state = HandshakeState::Active;
                info!("Connected.");
                Ok(established)
            }
            Err(err) => {
                self.state = HandshakeState::Failed;
                error!("Handshake failed: {}", err);
                Err(err)
            }
        }
    }

    fn run<T: Transport>(
        &mut self,
        transport: &mut T,
        addr: SocketAddr,
    ) -> Result<Established, HandshakeError> {
        self.state = HandshakeState::Connecting;
        let handle = transport.connect(addr).map_err(HandshakeError::Connect)?;

        if let Err(err) = self.await_connect(transport, handle) {
            transport.disconnect(handle);
            return Err(err);
        }
        info!("Initial connection established");

        self.state = HandshakeState::AwaitingWelcome;
        info!("Sending initial hello...");
        let session = self
            .send_hello(transport, handle)
            .and_then(|()| self.await_welcome(transport, handle));

        match session {
            Ok(session) => Ok(Established { handle, session }),
            Err(err) => {
                transport.disconnect(handle);
                Err(err)
            }
        }
    }

    fn await_connect<T: Transport>(
        &self,
        transport: &mut T,
        handle: ConnectionHandle,
    ) -> Result<(), HandshakeError> {
        let attempts = self.config.connect_attempts;

        for attempt in 1..=attempts {
            self.check_cancel()?;

            match transport
                .poll(self.config.connect_poll)
                .map_err(HandshakeError::Transport)?
            {
                TransportEvent::Connect(h) if h == handle => return Ok(()),
                TransportEvent::Disconnect(h) if h == handle => {
                    error!("Initial connection failed");
                    return Err(HandshakeError::Disconnected);
                }
                other => debug!(attempt, "Still connecting: {:?}", other),
            }
        }

        Err(HandshakeError::ConnectTimeout { attempts })
    }

    fn send_hello<T: Transport>(
        &self,
        transport: &mut T,
        handle: ConnectionHandle,
    ) -> Result<(), HandshakeError> {
        let hello = Hello::new(
            self.config.name.clone(),
            self.config.password.clone(),
            self.config.model,
        );
        let bytes = build_packet(PacketType::Hello, &hello).map_err(HandshakeError::Transport)?;
        transport
            .send(handle, &bytes, Delivery::Reliable)
            .map_err(HandshakeError::Transport)
    }

    fn await_welcome<T: Transport>(
        &self,
        transport: &mut T,
        handle: ConnectionHandle,
    ) -> Result<LocalSession, HandshakeError> {
        let attempts = self.config.welcome_attempts;

        for _ in 0..attempts {
            self.check_cancel()?;

            let bytes = match transport
                .poll(self.config.welcome_poll)
                .map_err(HandshakeError::Transport)?
            {
                TransportEvent::Receive(h, bytes) if h == handle => bytes,
                TransportEvent::Disconnect(h) if h == handle => {
                    return Err(HandshakeError::Disconnected)
                }
                _ => continue,
            };

            let envelope = match decode_envelope(&bytes) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!("Discarding undecodable packet: {:#}", err);
                    continue;
                }
            };

            if !validate(&envelope) {
                continue;
            }

            if envelope.id != PacketType::Welcome.id() {
                error!(
                    id = envelope.id,
                    "Expected welcome packet, but got {}, ignoring",
                    packet_name(envelope.id)
                );
                continue;
            }

            match decode_payload::<Welcome>(envelope.payload()) {
                Ok(welcome) => {
                    info!(
                        guid = welcome.guid,
                        is_master_client = welcome.is_master_client,
                        "Hello acknowledged"
                    );
                    return Ok(LocalSession::from_welcome(&welcome));
                }
                Err(err) => warn!("Invalid welcome packet: {:#}", err),
            }
        }

        error!("Failed to receive hello response from server");
        Err(HandshakeError::WelcomeTimeout { attempts })
    }

    fn check_cancel(&self) -> Result<(), HandshakeError> {
        match &self.cancel {
            Some(cancel) if cancel.is_cancelled() => Err(HandshakeError::Cancelled),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automatamp_testkit::{fixtures, ScriptedTransport};

    fn addr() -> SocketAddr {
        "127.0.0.1:6969".parse().unwrap()
    }

    fn fast_config() -> HandshakeConfig {
        HandshakeConfig {
            connect_poll: Duration::from_millis(1),
            welcome_poll: Duration::from_millis(1),
            ..HandshakeConfig::default()
        }
    }

    #[test]
    fn succeeds_when_connect_arrives_on_third_attempt() {
        let mut transport = ScriptedTransport::new();
        let handle = transport.next_handle();
        transport.push_none();
        transport.push_none();
        transport.push_connect(handle);
        transport.push_receive(handle, fixtures::welcome(42, true));

        let mut handshake = Handshake::new(fast_config());
        let established = handshake
            .perform(&mut transport, addr())
            .expect("handshake succeeds");

        assert_eq!(handshake.state(), HandshakeState::Active);
        assert_eq!(established.handle, handle);
        assert_eq!(established.session.guid(), 42);
        assert!(established.session.is_master_client());

        let hello: Hello = fixtures::decode_sent(&transport.sent()[0], PacketType::Hello);
        assert_eq!(hello.name, "Client");
        assert_eq!(transport.sent()[0].delivery, Delivery::Reliable);
        assert_eq!(transport.connects(), &[addr()]);
    }

    #[test]
    fn fails_after_exact_connect_budget() {
        let mut transport = ScriptedTransport::new();
        let mut handshake = Handshake::new(fast_config());

        let err = handshake
            .perform(&mut transport, addr())
            .expect_err("no connect event");

        assert!(matches!(err, HandshakeError::ConnectTimeout { attempts: 10 }));
        assert_eq!(handshake.state(), HandshakeState::Failed);
        assert_eq!(transport.poll_count(), 10);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn default_budgets_poll_with_phase_timeouts() {
        let mut transport = ScriptedTransport::new();
        let mut handshake = Handshake::new(HandshakeConfig::default());
        handshake
            .perform(&mut transport, addr())
            .expect_err("no connect event");
        assert_eq!(
            transport.poll_timeouts(),
            &[Duration::from_millis(1000); 10][..]
        );

        let mut transport = ScriptedTransport::new();
        let handle = transport.next_handle();
        transport.push_connect(handle);
        let mut handshake = Handshake::new(HandshakeConfig::default());
        let err = handshake
            .perform(&mut transport, addr())
            .expect_err("no welcome");

        assert!(matches!(err, HandshakeError::WelcomeTimeout { attempts: 20 }));
        let timeouts = transport.poll_timeouts();
        assert_eq!(timeouts.len(), 21);
        assert_eq!(timeouts[0], Duration::from_millis(1000));
        assert!(timeouts[1..]
            .iter()
            .all(|timeout| *timeout == Duration::from_millis(100)));
    }

    #[test]
    fn disconnect_before_connect_fails_immediately() {
        let mut transport = ScriptedTransport::new();
        let handle = transport.next_handle();
        transport.push_disconnect(handle);

        let mut handshake = Handshake::new(fast_config());
        let err = handshake
            .perform(&mut transport, addr())
            .expect_err("disconnected");

        assert!(matches!(err, HandshakeError::Disconnected));
        assert_eq!(transport.poll_count(), 1);
    }

    #[test]
    fn ignores_other_packets_while_awaiting_welcome() {
        let mut transport = ScriptedTransport::new();
        let handle = transport.next_handle();
        transport.push_connect(handle);
        transport.push_receive(handle, fixtures::create_player(3, "A2", 0));
        transport.push_receive(handle, fixtures::with_magic(0x1234, PacketType::Welcome));
        transport.push_receive(handle, vec![0xFF, 0x00]);
        transport.push_receive(handle, fixtures::welcome(7, false));

        let mut handshake = Handshake::new(fast_config());
        let established = handshake
            .perform(&mut transport, addr())
            .expect("handshake succeeds");

        assert_eq!(established.session.guid(), 7);
        assert!(!established.session.is_master_client());
    }

    #[test]
    fn welcome_budget_is_bounded() {
        let mut transport = ScriptedTransport::new();
        let handle = transport.next_handle();
        transport.push_connect(handle);

        let config = HandshakeConfig {
            welcome_attempts: 3,
            ..fast_config()
        };
        let mut handshake = Handshake::new(config);
        let err = handshake
            .perform(&mut transport, addr())
            .expect_err("no welcome");

        assert!(matches!(err, HandshakeError::WelcomeTimeout { attempts: 3 }));
        assert_eq!(transport.poll_count(), 4);
        assert_eq!(transport.disconnected(), &[handle]);
    }

    #[test]
    fn cancel_stops_between_attempts() {
        let mut transport = ScriptedTransport::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut handshake = Handshake::new(fast_config()).with_cancel(cancel);
        let err = handshake
            .perform(&mut transport, addr())
            .expect_err("cancelled");

        assert!(matches!(err, HandshakeError::Cancelled));
        assert_eq!(transport.poll_count(), 0);
    }
}
