use anyhow::Result;
use automatamp_net::{ConnectionHandle, Delivery, Transport, TransportEvent};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

/// One recorded [`Transport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    /// Target connection.
    pub handle: ConnectionHandle,
    /// Bytes handed to the transport.
    pub bytes: Vec<u8>,
    /// Requested delivery class.
    pub delivery: Delivery,
}

/// Transport stub that replays a queue of poll results and records every
/// call made against it.
///
/// Once the script runs dry every poll returns [`TransportEvent::None`]
/// immediately.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: VecDeque<TransportEvent>,
    connects: Vec<SocketAddr>,
    polls: Vec<Duration>,
    sent: Vec<SentPacket>,
    failing_sends: VecDeque<usize>,
    disconnected: Vec<ConnectionHandle>,
    issued: u64,
}

impl ScriptedTransport {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the next [`Transport::connect`] will return.
    pub fn next_handle(&self) -> ConnectionHandle {
        ConnectionHandle(self.issued + 1)
    }

    /// Append a raw poll result.
    pub fn push(&mut self, event: TransportEvent) {
        self.script.push_back(event);
    }

    /// Append a timed-out poll.
    pub fn push_none(&mut self) {
        self.push(TransportEvent::None);
    }

    /// Append a connect event.
    pub fn push_connect(&mut self, handle: ConnectionHandle) {
        self.push(TransportEvent::Connect(handle));
    }

    /// Append a disconnect event.
    pub fn push_disconnect(&mut self, handle: ConnectionHandle) {
        self.push(TransportEvent::Disconnect(handle));
    }

    /// Append an inbound packet.
    pub fn push_receive(&mut self, handle: ConnectionHandle, bytes: Vec<u8>) {
        self.push(TransportEvent::Receive(handle, bytes));
    }

    /// Make the `nth` send from now on (zero based) fail. It is not
    /// recorded in [`Self::sent`].
    pub fn fail_send(&mut self, nth: usize) {
        self.failing_sends.push_back(self.sent.len() + nth);
    }

    /// Scripted events not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    /// Number of polls made so far.
    pub fn poll_count(&self) -> usize {
        self.polls.len()
    }

    /// Timeout passed to each poll, in order.
    pub fn poll_timeouts(&self) -> &[Duration] {
        &self.polls
    }

    /// Addresses passed to connect, in order.
    pub fn connects(&self) -> &[SocketAddr] {
        &self.connects
    }

    /// Every send, in order.
    pub fn sent(&self) -> &[SentPacket] {
        &self.sent
    }

    /// Handles passed to disconnect, in order.
    pub fn disconnected(&self) -> &[ConnectionHandle] {
        &self.disconnected
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, addr: SocketAddr) -> Result<ConnectionHandle> {
        self.connects.push(addr);
        self.issued += 1;
        Ok(ConnectionHandle(self.issued))
    }

    fn poll(&mut self, timeout: Duration) -> Result<TransportEvent> {
        self.polls.push(timeout);
        Ok(self.script.pop_front().unwrap_or(TransportEvent::None))
    }

    fn send(&mut self, handle: ConnectionHandle, bytes: &[u8], delivery: Delivery) -> Result<()> {
        if self.failing_sends.front() == Some(&self.sent.len()) {
            self.failing_sends.pop_front();
            anyhow::bail!("Scripted send failure on {:?}", handle);
        }
        self.sent.push(SentPacket {
            handle,
            bytes: bytes.to_vec(),
            delivery,
        });
        Ok(())
    }

    fn disconnect(&mut self, handle: ConnectionHandle) {
        self.disconnected.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_replays_then_idles() {
        let mut transport = ScriptedTransport::new();
        let handle = transport.next_handle();
        transport.push_connect(handle);
        assert_eq!(transport.remaining(), 1);

        let addr: SocketAddr = "127.0.0.1:6969".parse().unwrap();
        assert_eq!(transport.connect(addr).unwrap(), handle);
        assert_eq!(transport.connects(), &[addr]);
        assert_eq!(
            transport.poll(Duration::from_millis(5)).unwrap(),
            TransportEvent::Connect(handle)
        );
        assert_eq!(transport.remaining(), 0);
        assert_eq!(transport.poll(Duration::ZERO).unwrap(), TransportEvent::None);
        assert_eq!(transport.poll_count(), 2);
        assert_eq!(
            transport.poll_timeouts(),
            &[Duration::from_millis(5), Duration::ZERO]
        );
        assert_eq!(transport.next_handle(), ConnectionHandle(2));
    }

    #[test]
    fn test_scheduled_send_failure_is_not_recorded() {
        let mut transport = ScriptedTransport::new();
        let handle = ConnectionHandle(1);
        transport.fail_send(1);

        assert!(transport.send(handle, b"a", Delivery::Reliable).is_ok());
        assert!(transport.send(handle, b"b", Delivery::Reliable).is_err());
        assert!(transport.send(handle, b"c", Delivery::Unreliable).is_ok());

        let bytes = transport
            .sent()
            .iter()
            .map(|sent| sent.bytes.clone())
            .collect::<Vec<_>>();
        assert_eq!(bytes, vec![b"a".to_vec(), b"c".to_vec()]);
    }
}
