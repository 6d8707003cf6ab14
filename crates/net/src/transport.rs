//! Transport capability consumed by the session engine, plus a QUIC-backed
//! implementation using quinn.
//!
//! The capability is poll based: the caller blocks in [`Transport::poll`]
//! for at most the given timeout and receives at most one event per call.

use crate::channel::{read_frame, write_frame, Delivery};
use anyhow::{Context, Result};
use quinn::{ClientConfig, Connection, Endpoint};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// ALPN identifier negotiated by both ends.
pub const ALPN_PROTOCOL: &[u8] = b"automatamp";

/// Opaque identifier of one connection owned by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

/// Outcome of a single [`Transport::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Nothing happened before the timeout elapsed.
    None,
    /// The connection was established.
    Connect(ConnectionHandle),
    /// The connection was closed or failed to establish.
    Disconnect(ConnectionHandle),
    /// A packet arrived.
    Receive(ConnectionHandle, Vec<u8>),
}

/// Datagram transport consumed by the session engine.
pub trait Transport {
    /// Start connecting to `addr`. Completion is reported by a later
    /// [`TransportEvent::Connect`] or [`TransportEvent::Disconnect`].
    fn connect(&mut self, addr: SocketAddr) -> Result<ConnectionHandle>;

    /// Wait up to `timeout` for the next event.
    fn poll(&mut self, timeout: Duration) -> Result<TransportEvent>;

    /// Queue `bytes` for delivery. Fire-and-forget.
    fn send(&mut self, handle: ConnectionHandle, bytes: &[u8], delivery: Delivery) -> Result<()>;

    /// Close a connection. Unknown handles are ignored.
    fn disconnect(&mut self, handle: ConnectionHandle);
}

/// Settings for [`QuicTransport`].
#[derive(Debug, Clone)]
pub struct QuicTransportConfig {
    /// Verify the server certificate against the platform roots.
    pub verify_server_certificate: bool,
    /// Name presented for SNI and certificate verification.
    pub server_name: String,
    /// Interval between QUIC keep-alive frames.
    pub keep_alive_interval: Duration,
    /// Idle time after which the connection is considered lost.
    pub idle_timeout: Duration,
}

impl Default for QuicTransportConfig {
    fn default() -> Self {
        Self {
            verify_server_certificate: false,
            server_name: "localhost".to_string(),
            keep_alive_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(10),
        }
    }
}

enum Command {
    Send(Vec<u8>, Delivery),
    Close,
}

/// Client transport over QUIC.
///
/// Owns a private tokio runtime; connection I/O runs on it in the
/// background while the caller drives [`Transport::poll`] from its own
/// thread.
pub struct QuicTransport {
    runtime: Runtime,
    endpoint: Endpoint,
    endpoint_v6: Option<Endpoint>,
    client_config: ClientConfig,
    config: QuicTransportConfig,
    events_tx: UnboundedSender<TransportEvent>,
    events_rx: UnboundedReceiver<TransportEvent>,
    peers: HashMap<ConnectionHandle, UnboundedSender<Command>>,
    next_handle: u64,
}

impl QuicTransport {
    /// Bring up the runtime and an IPv4 client endpoint on an ephemeral
    /// port. An IPv6 endpoint is bound on the first IPv6 connect.
    pub fn startup(config: QuicTransportConfig) -> Result<Self> {
        debug!("Starting QUIC transport");

        // Install default crypto provider if not already installed
        let _ = rustls::crypto::ring::default_provider().install_default();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("automatamp-transport")
            .enable_all()
            .build()
            .context("Failed to build transport runtime")?;

        let client_config = client_config(&config)?;

        let endpoint = bind_client(
            &runtime,
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            &client_config,
        )?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            runtime,
            endpoint,
            endpoint_v6: None,
            client_config,
            config,
            events_tx,
            events_rx,
            peers: HashMap::new(),
            next_handle: 1,
        })
    }

    /// Close every connection and stop the runtime.
    pub fn shutdown(self) {
        info!("Shutting down QUIC transport");
        for commands in self.peers.values() {
            let _ = commands.send(Command::Close);
        }
        let endpoints = std::iter::once(self.endpoint.clone())
            .chain(self.endpoint_v6.clone())
            .collect::<Vec<_>>();
        for endpoint in &endpoints {
            endpoint.close(0u32.into(), b"Client shutting down");
        }
        self.runtime.block_on(async move {
            for endpoint in endpoints {
                let _ =
                    tokio::time::timeout(Duration::from_millis(250), endpoint.wait_idle()).await;
            }
        });
        self.runtime.shutdown_timeout(Duration::from_millis(250));
    }

    /// Local address of the IPv4 client endpoint.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Endpoint matching the address family of `addr`.
    fn endpoint_for(&mut self, addr: SocketAddr) -> Result<&Endpoint> {
        if addr.is_ipv4() {
            return Ok(&self.endpoint);
        }

        if self.endpoint_v6.is_none() {
            let endpoint = bind_client(
                &self.runtime,
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
                &self.client_config,
            )?;
            self.endpoint_v6 = Some(endpoint);
        }

        self.endpoint_v6
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("IPv6 endpoint unavailable"))
    }
}

fn bind_client(runtime: &Runtime, bind: SocketAddr, config: &ClientConfig) -> Result<Endpoint> {
    let _guard = runtime.enter();
    let mut endpoint = Endpoint::client(bind).context("Failed to bind client endpoint")?;
    endpoint.set_default_client_config(config.clone());
    debug!("Client endpoint created on {}", endpoint.local_addr()?);
    Ok(endpoint)
}

impl Transport for QuicTransport {
    fn connect(&mut self, addr: SocketAddr) -> Result<ConnectionHandle> {
        info!("Connecting to server at {}", addr);

        let server_name = self.config.server_name.clone();
        let endpoint = self.endpoint_for(addr)?.clone();
        let connecting = {
            let _guard = self.runtime.enter();
            endpoint
                .connect(addr, &server_name)
                .context("Failed to initiate connection")?
        };

        let handle = ConnectionHandle(self.next_handle);
        self.next_handle += 1;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let events = self.events_tx.clone();
        self.runtime.spawn(async move {
            match connecting.await {
                Ok(connection) => {
                    info!("Connected to server at {}", addr);
                    drive_connection(connection, handle, commands_rx, events).await;
                }
                Err(err) => {
                    warn!("Failed to establish connection to {}: {}", addr, err);
                    let _ = events.send(TransportEvent::Disconnect(handle));
                }
            }
        });

        self.peers.insert(handle, commands_tx);
        Ok(handle)
    }

    fn poll(&mut self, timeout: Duration) -> Result<TransportEvent> {
        let event = match self.events_rx.try_recv() {
            Ok(event) => event,
            Err(_) => {
                let events = &mut self.events_rx;
                match self
                    .runtime
                    .block_on(async { tokio::time::timeout(timeout, events.recv()).await })
                {
                    Ok(Some(event)) => event,
                    Ok(None) => return Err(anyhow::anyhow!("Transport event channel closed")),
                    Err(_) => TransportEvent::None,
                }
            }
        };

        if let TransportEvent::Disconnect(handle) = &event {
            self.peers.remove(handle);
        }

        Ok(event)
    }

    fn send(&mut self, handle: ConnectionHandle, bytes: &[u8], delivery: Delivery) -> Result<()> {
        let commands = self
            .peers
            .get(&handle)
            .ok_or_else(|| anyhow::anyhow!("Unknown connection {:?}", handle))?;

        commands
            .send(Command::Send(bytes.to_vec(), delivery))
            .map_err(|_| anyhow::anyhow!("Connection {:?} is closing", handle))
    }

    fn disconnect(&mut self, handle: ConnectionHandle) {
        if let Some(commands) = self.peers.get(&handle) {
            info!("Disconnecting {:?}", handle);
            let _ = commands.send(Command::Close);
        }
    }
}

/// Pump outgoing commands and watch for closure of one connection.
async fn drive_connection(
    connection: Connection,
    handle: ConnectionHandle,
    mut commands: UnboundedReceiver<Command>,
    events: UnboundedSender<TransportEvent>,
) {
    let _ = events.send(TransportEvent::Connect(handle));

    tokio::spawn(receive_reliable(connection.clone(), handle, events.clone()));
    tokio::spawn(receive_unreliable(connection.clone(), handle, events.clone()));

    let mut reliable = None;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(bytes, Delivery::Reliable)) => {
                    if reliable.is_none() {
                        match connection.open_uni().await {
                            Ok(stream) => reliable = Some(stream),
                            Err(err) => {
                                warn!("Failed to open reliable stream: {}", err);
                                break;
                            }
                        }
                    }
                    if let Some(stream) = reliable.as_mut() {
                        if let Err(err) = write_frame(stream, &bytes).await {
                            warn!("Reliable send failed: {:#}", err);
                            break;
                        }
                    }
                }
                Some(Command::Send(bytes, Delivery::Unreliable)) => {
                    if let Err(err) = connection.send_datagram(bytes.into()) {
                        warn!("Unreliable send failed: {}", err);
                    }
                }
                Some(Command::Close) | None => {
                    if let Some(stream) = reliable.as_mut() {
                        let _ = stream.finish();
                    }
                    connection.close(0u32.into(), b"Client disconnecting");
                    break;
                }
            },
            reason = connection.closed() => {
                info!("Connection closed: {}", reason);
                break;
            }
        }
    }

    let _ = events.send(TransportEvent::Disconnect(handle));
}

/// Forward frames from every reliable stream the server opens.
async fn receive_reliable(
    connection: Connection,
    handle: ConnectionHandle,
    events: UnboundedSender<TransportEvent>,
) {
    while let Ok(mut stream) = connection.accept_uni().await {
        let events = events.clone();
        tokio::spawn(async move {
            loop {
                match read_frame(&mut stream).await {
                    Ok(Some(data)) => {
                        if events.send(TransportEvent::Receive(handle, data)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!("Reliable stream ended: {:#}", err);
                        break;
                    }
                }
            }
        });
    }
}

/// Forward every datagram the server sends.
async fn receive_unreliable(
    connection: Connection,
    handle: ConnectionHandle,
    events: UnboundedSender<TransportEvent>,
) {
    while let Ok(datagram) = connection.read_datagram().await {
        if events
            .send(TransportEvent::Receive(handle, datagram.to_vec()))
            .is_err()
        {
            break;
        }
    }
}

fn client_config(config: &QuicTransportConfig) -> Result<ClientConfig> {
    let mut client_crypto = if config.verify_server_certificate {
        let mut roots = rustls::RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            warn!("Failed to load a platform certificate: {}", err);
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        debug!("Loaded {} platform roots ({} ignored)", added, ignored);

        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        // Development servers use self-signed certificates
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
            .with_no_client_auth()
    };

    client_crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let mut client_config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)
            .context("Failed to create QuicClientConfig")?,
    ));

    let mut transport_config = quinn::TransportConfig::default();
    transport_config.keep_alive_interval(Some(config.keep_alive_interval));
    transport_config.max_idle_timeout(Some(config.idle_timeout.try_into()?));
    client_config.transport_config(Arc::new(transport_config));

    Ok(client_config)
}

/// Certificate verifier that accepts all certificates (development only).
///
/// **WARNING:** This bypasses TLS security and should NEVER be used in production.
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_and_shutdown() {
        let transport = QuicTransport::startup(QuicTransportConfig::default())
            .expect("Failed to start transport");
        assert!(transport.local_addr().expect("local addr").port() > 0);
        transport.shutdown();
    }

    #[test]
    fn test_poll_times_out_with_none() {
        let mut transport = QuicTransport::startup(QuicTransportConfig::default())
            .expect("Failed to start transport");
        let event = transport
            .poll(Duration::from_millis(10))
            .expect("poll succeeds");
        assert_eq!(event, TransportEvent::None);
        transport.shutdown();
    }

    #[test]
    fn test_send_to_unknown_handle_fails() {
        let mut transport = QuicTransport::startup(QuicTransportConfig::default())
            .expect("Failed to start transport");
        let result = transport.send(ConnectionHandle(99), b"ping", Delivery::Reliable);
        assert!(result.is_err());
        transport.shutdown();
    }

    #[test]
    fn test_connect_accepts_ipv6_target() {
        let mut transport = QuicTransport::startup(QuicTransportConfig::default())
            .expect("Failed to start transport");
        let v4 = transport
            .connect("127.0.0.1:6969".parse().unwrap())
            .expect("IPv4 connect starts");
        let v6 = transport
            .connect("[::1]:6969".parse().unwrap())
            .expect("IPv6 connect starts");
        assert_ne!(v4, v6);
        assert!(transport.endpoint_v6.is_some());
        transport.shutdown();
    }
}
