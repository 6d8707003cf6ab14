//! automatamp - mock client for the AutomataMP session protocol
//!
//! Connects to a relay, performs the startup handshake and runs the session
//! loop, logging everything the relay sends.

mod config;
mod mock;

use anyhow::{Context, Result};
use automatamp_client::{CancelToken, Handshake, OutboundIntent, TickScheduler};
use automatamp_net::{AnimationStart, QuicTransport};
use clap::Parser;
use config::ClientConfig;
use mock::MockPlayer;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Mock client for the AutomataMP session protocol", long_about = None)]
struct Args {
    /// Client configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relay host, overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// Relay port, overrides the config file
    #[arg(long)]
    port: Option<u16>,

    /// Display name sent in Hello
    #[arg(long)]
    name: Option<String>,

    /// Server password sent in Hello
    #[arg(long)]
    password: Option<String>,

    /// Send a single AnimationStart (1, 2, 3, 4) on the first idle tick
    #[arg(long)]
    demo_animation: bool,

    /// Stop after this many seconds instead of running until disconnected
    #[arg(long)]
    run_for: Option<u64>,
}

impl Args {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(host) = &self.host {
            config.server_host = host.clone();
        }
        if let Some(port) = self.port {
            config.server_port = port;
        }
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
    }
}

fn main() -> Result<()> {
    // Initialize tracing with INFO level by default (can be overridden via RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting automatamp v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from_path(path),
        None => ClientConfig::load(),
    };
    args.apply(&mut config);

    let addr = config.server_addr()?;
    let mut transport = QuicTransport::startup(config.transport_config())?;

    let cancel = CancelToken::new();
    if let Some(secs) = args.run_for {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            info!("Run time elapsed, stopping");
            cancel.cancel();
        });
    }

    let mut handshake = Handshake::new(config.handshake_config()).with_cancel(cancel.clone());
    let established = match handshake.perform(&mut transport, addr) {
        Ok(established) => established,
        Err(err) => {
            transport.shutdown();
            return Err(err).context("Startup handshake failed");
        }
    };

    let mut scheduler = TickScheduler::new(
        transport,
        established,
        MockPlayer::default(),
        config.scheduler_config(),
    );

    if args.demo_animation {
        scheduler.queue_intent(OutboundIntent::AnimationStart(AnimationStart {
            anim: 1,
            variant: 2,
            a3: 3,
            a4: 4,
        }));
    }

    let result = scheduler.run(&cancel);
    scheduler.shutdown().shutdown();
    result
}
