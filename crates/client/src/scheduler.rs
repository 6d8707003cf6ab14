//! Fixed-rate session loop.
//!
//! Each tick polls the transport once with a one-frame timeout. Events are
//! handled as they arrive; idle ticks run at most one category of
//! outgoing work, chosen in priority order: queued intents, keepalive,
//! state broadcast.

use crate::cancel::CancelToken;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::entity_store::EntityStore;
use crate::handshake::Established;
use crate::hooks::SessionHooks;
use crate::session::LocalSession;
use anyhow::{Context, Result};
use automatamp_net::{
    build_envelope, build_packet, decode_envelope, validate, AnimationStart, Buttons,
    ConnectionHandle, Delivery, PacketType, Transport, TransportEvent,
};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Loop timing and dispatch filters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Polls per second; the poll timeout is one period.
    pub tick_rate_hz: u32,
    /// Minimum gap between keepalives.
    pub keepalive_interval: Duration,
    /// Local state broadcasts per second.
    pub broadcast_rate_hz: u32,
    /// Animation ids dropped before reaching the hooks.
    pub blocked_animations: Vec<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            keepalive_interval: Duration::from_secs(1),
            broadcast_rate_hz: 60,
            blocked_animations: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Poll timeout of a single tick.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }

    /// Minimum gap between state broadcasts.
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.broadcast_rate_hz.max(1)))
    }
}

/// One-shot local action sent on the next idle tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutboundIntent {
    /// Start an animation on the local player.
    AnimationStart(AnimationStart),
    /// Publish controller buttons.
    Buttons(Buttons),
}

impl OutboundIntent {
    fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Self::AnimationStart(animation) => build_packet(PacketType::AnimationStart, animation),
            Self::Buttons(buttons) => build_packet(PacketType::Buttons, buttons),
        }
    }
}

/// Outgoing work done on an idle tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// No gate was due.
    Nothing,
    /// This many queued intents were flushed.
    Intents(usize),
    /// A ping was sent.
    Keepalive,
    /// The local snapshot was sent.
    Broadcast,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The poll timed out.
    Idle(IdleAction),
    /// The transport reported a connect.
    Connected,
    /// The transport reported a disconnect.
    Disconnected,
    /// A packet passed validation and was dispatched.
    Dispatched(DispatchOutcome),
    /// A packet failed to decode or validate.
    Rejected,
    /// The event belonged to a connection other than the session's.
    Foreign,
}

/// Owns an active session and drives it one tick at a time.
pub struct TickScheduler<T: Transport, H: SessionHooks> {
    transport: T,
    handle: ConnectionHandle,
    session: LocalSession,
    store: EntityStore,
    dispatcher: Dispatcher,
    hooks: H,
    config: SchedulerConfig,
    intents: VecDeque<OutboundIntent>,
    last_keepalive: Instant,
    last_broadcast: Instant,
}

impl<T: Transport, H: SessionHooks> TickScheduler<T, H> {
    /// Take over the connection produced by a successful handshake.
    pub fn new(transport: T, established: Established, hooks: H, config: SchedulerConfig) -> Self {
        let now = Instant::now();
        Self {
            transport,
            handle: established.handle,
            session: established.session,
            store: EntityStore::new(),
            dispatcher: Dispatcher::with_blocked_animations(
                config.blocked_animations.iter().copied(),
            ),
            hooks,
            config,
            intents: VecDeque::new(),
            last_keepalive: now,
            last_broadcast: now,
        }
    }

    /// Restart both timers from `now`.
    pub fn reset_timers(&mut self, now: Instant) {
        self.last_keepalive = now;
        self.last_broadcast = now;
    }

    /// Queue a one-shot action for the next idle tick.
    pub fn queue_intent(&mut self, intent: OutboundIntent) {
        self.intents.push_back(intent);
    }

    /// Number of intents waiting for an idle tick.
    pub fn pending_intents(&self) -> usize {
        self.intents.len()
    }

    /// Poll once and act on the result.
    pub fn tick(&mut self, now: Instant) -> Result<TickOutcome> {
        let event = self
            .transport
            .poll(self.config.frame_period())
            .context("Failed to poll transport")?;

        let outcome = match event {
            TransportEvent::None => TickOutcome::Idle(self.idle(now)?),
            TransportEvent::Connect(handle) if handle == self.handle => {
                info!(handle = handle.0, "Connected to the server!");
                TickOutcome::Connected
            }
            TransportEvent::Disconnect(handle) if handle == self.handle => {
                info!(handle = handle.0, "Lost connection to the server!");
                TickOutcome::Disconnected
            }
            TransportEvent::Receive(handle, bytes) if handle == self.handle => {
                self.receive(&bytes)
            }
            other => {
                debug!("Ignoring event for another connection: {:?}", other);
                TickOutcome::Foreign
            }
        };

        Ok(outcome)
    }

    /// Tick until `cancel` fires, the session's connection drops, or the
    /// transport fails.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<()> {
        info!(
            guid = self.session.guid(),
            tick_rate_hz = self.config.tick_rate_hz,
            "Entering session loop"
        );

        while !cancel.is_cancelled() {
            if self.tick(Instant::now())? == TickOutcome::Disconnected {
                break;
            }
        }

        info!(players = self.store.len(), "Session loop stopped");
        Ok(())
    }

    /// Close the connection and hand back the transport.
    pub fn shutdown(mut self) -> T {
        self.transport.disconnect(self.handle);
        self.transport
    }

    /// Replicated participants.
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Identity assigned by the server.
    pub fn session(&self) -> &LocalSession {
        &self.session
    }

    /// Game-side collaborator.
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Mutable access to the game-side collaborator.
    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn receive(&mut self, bytes: &[u8]) -> TickOutcome {
        debug!(len = bytes.len(), "Received {} bytes from server", bytes.len());

        let envelope = match decode_envelope(bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("Discarding undecodable packet: {:#}", err);
                return TickOutcome::Rejected;
            }
        };

        if !validate(&envelope) {
            return TickOutcome::Rejected;
        }

        TickOutcome::Dispatched(self.dispatcher.dispatch(
            &envelope,
            &self.session,
            &mut self.store,
            &mut self.hooks,
        ))
    }

    fn idle(&mut self, now: Instant) -> Result<IdleAction> {
        if !self.intents.is_empty() {
            let count = self.intents.len();
            while let Some(intent) = self.intents.front().copied() {
                info!("Sending {:?}", intent);
                self.send(&intent.encode()?)?;
                self.intents.pop_front();
            }
            return Ok(IdleAction::Intents(count));
        }

        if now.saturating_duration_since(self.last_keepalive) >= self.config.keepalive_interval {
            info!("Sending ping");
            self.send(&build_envelope(PacketType::Ping, None)?)?;
            self.last_keepalive = now;
            return Ok(IdleAction::Keepalive);
        }

        if now.saturating_duration_since(self.last_broadcast) >= self.config.broadcast_interval() {
            let Some(snapshot) = self.hooks.local_snapshot() else {
                return Ok(IdleAction::Nothing);
            };
            trace!("Sending update");
            self.send(&build_packet(PacketType::PlayerData, &snapshot)?)?;
            self.last_broadcast = now;
            return Ok(IdleAction::Broadcast);
        }

        Ok(IdleAction::Nothing)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport
            .send(self.handle, bytes, Delivery::Reliable)
            .context("Failed to send packet")
    }
}
