use anyhow::{Context, Result};
use automatamp_client::{HandshakeConfig, SchedulerConfig};
use automatamp_net::{QuicTransportConfig, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const DEFAULT_CLIENT_PATH: &str = "config/client.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay host name or address.
    pub server_host: String,
    pub server_port: u16,
    /// Display name sent in Hello.
    pub name: String,
    pub password: String,
    /// Appearance identifier of the local character.
    pub model: u32,
    pub connect_attempts: u32,
    pub connect_poll_ms: u64,
    pub welcome_attempts: u32,
    pub welcome_poll_ms: u64,
    /// Session loop rate; also the local state broadcast rate.
    pub tick_rate_hz: u32,
    pub keepalive_interval_ms: u64,
    /// Animation ids never forwarded to the game.
    pub blocked_animations: Vec<u32>,
    /// Check the relay certificate against the platform roots.
    pub verify_server_certificate: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: DEFAULT_PORT,
            name: "Client".to_string(),
            password: String::new(),
            model: 0,
            connect_attempts: 10,
            connect_poll_ms: 1000,
            welcome_attempts: 20,
            welcome_poll_ms: 100,
            tick_rate_hz: 60,
            keepalive_interval_ms: 1000,
            blocked_animations: Vec::new(),
            verify_server_certificate: false,
        }
    }
}

impl ClientConfig {
    /// Load client configuration from the default path.
    pub fn load() -> Self {
        Self::load_from_path(Path::new(DEFAULT_CLIENT_PATH))
    }

    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<ClientConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    ClientConfig::default()
                }
            },
            Err(err) => {
                if path != Path::new(DEFAULT_CLIENT_PATH)
                    || err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                } else {
                    warn!(
                        "Client config not found at {}. Using defaults",
                        path.display()
                    );
                }
                ClientConfig::default()
            }
        }
    }

    /// Resolve the relay address.
    pub fn server_addr(&self) -> Result<SocketAddr> {
        (self.server_host.as_str(), self.server_port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve {}", self.server_host))?
            .next()
            .with_context(|| format!("No address found for {}", self.server_host))
    }

    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            connect_attempts: self.connect_attempts,
            connect_poll: Duration::from_millis(self.connect_poll_ms),
            welcome_attempts: self.welcome_attempts,
            welcome_poll: Duration::from_millis(self.welcome_poll_ms),
            name: self.name.clone(),
            password: self.password.clone(),
            model: self.model,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_rate_hz: self.tick_rate_hz,
            keepalive_interval: Duration::from_millis(self.keepalive_interval_ms),
            broadcast_rate_hz: self.tick_rate_hz,
            blocked_animations: self.blocked_animations.clone(),
        }
    }

    pub fn transport_config(&self) -> QuicTransportConfig {
        QuicTransportConfig {
            verify_server_certificate: self.verify_server_certificate,
            server_name: self.server_host.clone(),
            ..QuicTransportConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "server_port = 7000\nname = \"2B\"\nblocked_animations = [12, 13]"
        )
        .expect("write config");

        let config = ClientConfig::load_from_path(file.path());

        assert_eq!(config.server_port, 7000);
        assert_eq!(config.name, "2B");
        assert_eq!(config.blocked_animations, vec![12, 13]);
        assert_eq!(config.server_host, "127.0.0.1");
        assert_eq!(config.connect_attempts, 10);
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "server_port = \"not a number\"").expect("write config");

        let config = ClientConfig::load_from_path(file.path());
        assert_eq!(config.server_port, DEFAULT_PORT);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = ClientConfig::load_from_path(&dir.path().join("absent.toml"));
        assert_eq!(config.tick_rate_hz, 60);
    }

    #[test]
    fn derived_configs_carry_timings() {
        let config = ClientConfig {
            connect_poll_ms: 250,
            keepalive_interval_ms: 2000,
            tick_rate_hz: 30,
            ..ClientConfig::default()
        };

        let handshake = config.handshake_config();
        assert_eq!(handshake.connect_poll, Duration::from_millis(250));
        assert_eq!(handshake.welcome_attempts, 20);

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.keepalive_interval, Duration::from_secs(2));
        assert_eq!(scheduler.broadcast_rate_hz, 30);
    }

    #[test]
    fn server_addr_resolves_literal_ip() {
        let config = ClientConfig::default();
        let addr = config.server_addr().expect("resolves");
        assert_eq!(addr, "127.0.0.1:6969".parse().unwrap());
    }
}
