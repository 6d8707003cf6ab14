//! Minimal relay server for loopback tests.
//!
//! Answers Hello with Welcome, announces players to each other, replies
//! Pong to Ping and relays client packets to every other peer wrapped as
//! bounced packets. Runs on its own tokio runtime so synchronous tests can
//! drive a client transport on the calling thread.

use anyhow::{Context, Result};
use automatamp_net::{
    build_envelope, build_packet, decode_envelope, decode_payload, is_bounced, read_frame,
    validate, wrap_bounced, write_frame, CreatePlayer, DestroyPlayer, Guid, Hello, PacketType,
    Welcome, ALPN_PROTOCOL,
};
use quinn::{Connection, Endpoint, ServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

struct Peer {
    name: String,
    model: u32,
    outbox: UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct Lobby {
    peers: Mutex<HashMap<Guid, Peer>>,
    next_guid: AtomicU64,
}

impl Lobby {
    fn send_to(&self, guid: Guid, bytes: Vec<u8>) {
        if let Ok(peers) = self.peers.lock() {
            if let Some(peer) = peers.get(&guid) {
                let _ = peer.outbox.send(bytes);
            }
        }
    }

    fn broadcast(&self, except: Option<Guid>, bytes: &[u8]) {
        if let Ok(peers) = self.peers.lock() {
            for (guid, peer) in peers.iter() {
                if Some(*guid) != except {
                    let _ = peer.outbox.send(bytes.to_vec());
                }
            }
        }
    }
}

/// Loopback QUIC relay with a self-signed certificate.
pub struct RelayServer {
    runtime: Runtime,
    endpoint: Endpoint,
    addr: SocketAddr,
}

impl RelayServer {
    /// Bind to `addr` (use port 0 for an ephemeral port) and start
    /// accepting clients.
    pub fn start(addr: SocketAddr) -> Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("automatamp-relay")
            .enable_all()
            .build()
            .context("Failed to build relay runtime")?;

        let server_config = server_config()?;
        let endpoint = {
            let _guard = runtime.enter();
            Endpoint::server(server_config, addr).context("Failed to bind relay endpoint")?
        };
        let addr = endpoint.local_addr()?;
        info!("Relay bound to {}", addr);

        let lobby = Arc::new(Lobby {
            next_guid: AtomicU64::new(1),
            ..Lobby::default()
        });
        let accepting = endpoint.clone();
        runtime.spawn(async move {
            while let Some(incoming) = accepting.accept().await {
                let lobby = lobby.clone();
                tokio::spawn(async move {
                    match incoming.await {
                        Ok(connection) => {
                            if let Err(err) = serve(connection, lobby).await {
                                debug!("Relay peer ended: {:#}", err);
                            }
                        }
                        Err(err) => warn!("Relay failed to accept connection: {}", err),
                    }
                });
            }
        });

        Ok(Self {
            runtime,
            endpoint,
            addr,
        })
    }

    /// Address clients should connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Close every connection and stop the runtime.
    pub fn shutdown(self) {
        self.endpoint.close(0u32.into(), b"Relay shutting down");
        self.runtime.shutdown_timeout(Duration::from_millis(250));
    }
}

async fn serve(connection: Connection, lobby: Arc<Lobby>) -> Result<()> {
    let (outbox, mut pending) = mpsc::unbounded_channel::<Vec<u8>>();

    let writer = connection.clone();
    tokio::spawn(async move {
        let mut stream = match writer.open_uni().await {
            Ok(stream) => stream,
            Err(err) => {
                debug!("Relay could not open stream: {}", err);
                return;
            }
        };
        while let Some(bytes) = pending.recv().await {
            if let Err(err) = write_frame(&mut stream, &bytes).await {
                debug!("Relay write failed: {:#}", err);
                break;
            }
        }
    });

    let mut guid = None;
    let result = async {
        let mut stream = connection
            .accept_uni()
            .await
            .context("Client never opened a stream")?;
        while let Some(bytes) = read_frame(&mut stream).await? {
            handle_packet(&bytes, &mut guid, &outbox, &lobby)?;
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    if let Some(guid) = guid {
        if let Ok(mut peers) = lobby.peers.lock() {
            peers.remove(&guid);
        }
        info!(guid, "Relay peer left");
        let destroy = build_packet(PacketType::DestroyPlayer, &DestroyPlayer { guid })?;
        lobby.broadcast(None, &destroy);
    }

    result
}

fn handle_packet(
    bytes: &[u8],
    guid: &mut Option<Guid>,
    outbox: &UnboundedSender<Vec<u8>>,
    lobby: &Lobby,
) -> Result<()> {
    let envelope = decode_envelope(bytes)?;
    if !validate(&envelope) {
        return Ok(());
    }

    match (envelope.packet_type(), *guid) {
        (Some(PacketType::Hello), None) => {
            let hello: Hello = decode_payload(envelope.payload())?;
            let assigned = lobby.next_guid.fetch_add(1, Ordering::SeqCst);
            let is_master_client = assigned == 1;
            info!(guid = assigned, "Relay welcomed {}", hello.name);

            let _ = outbox.send(build_packet(
                PacketType::Welcome,
                &Welcome {
                    guid: assigned,
                    is_master_client,
                },
            )?);

            let announce = build_packet(
                PacketType::CreatePlayer,
                &CreatePlayer {
                    guid: assigned,
                    name: hello.name.clone(),
                    model: hello.model,
                },
            )?;

            let existing = match lobby.peers.lock() {
                Ok(mut peers) => {
                    let existing = peers
                        .iter()
                        .map(|(guid, peer)| CreatePlayer {
                            guid: *guid,
                            name: peer.name.clone(),
                            model: peer.model,
                        })
                        .collect::<Vec<_>>();
                    peers.insert(
                        assigned,
                        Peer {
                            name: hello.name,
                            model: hello.model,
                            outbox: outbox.clone(),
                        },
                    );
                    existing
                }
                Err(_) => Vec::new(),
            };

            for player in existing {
                lobby.send_to(assigned, build_packet(PacketType::CreatePlayer, &player)?);
            }
            lobby.broadcast(None, &announce);
            *guid = Some(assigned);
        }
        (Some(PacketType::Ping), Some(_)) => {
            let _ = outbox.send(build_envelope(PacketType::Pong, None)?);
        }
        (Some(packet_type), Some(sender)) if is_bounced(envelope.id) => {
            let relayed = wrap_bounced(packet_type, sender, envelope.data.as_deref())?;
            lobby.broadcast(Some(sender), &relayed);
        }
        (_, _) => debug!(id = envelope.id, "Relay ignored packet"),
    }

    Ok(())
}

fn server_config() -> Result<ServerConfig> {
    let (cert, key) = generate_self_signed_cert()?;

    let mut server_crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .context("Failed to build rustls ServerConfig")?;
    server_crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    Ok(ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
            .context("Failed to create QuicServerConfig")?,
    )))
}

fn generate_self_signed_cert() -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .context("Failed to generate certificate")?;

    let key = PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());
    Ok((CertificateDer::from(cert.cert), key))
}
