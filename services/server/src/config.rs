//! Server runtime configuration.

use std::time::Duration;

pub const DEFAULT_CONTROL_PORT: u16 = 1337;
pub const DEFAULT_RELAY_PORT: u16 = 1338;

/// Runtime knobs.  Timeouts are plain durations so the integration
/// suites can shrink them to milliseconds.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Control port; 0 binds an ephemeral port.
    pub port: u16,
    /// Auxiliary byte-relay port; 0 binds an ephemeral port.
    pub relay_port: u16,
    /// Heartbeat tick; the first PING fires one interval after login.
    pub ping_interval: Duration,
    /// PONG deadline after each PING.
    pub pong_timeout: Duration,
    /// How long a minted transfer slot may wait for both relay peers.
    pub relay_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_CONTROL_PORT,
            relay_port: DEFAULT_RELAY_PORT,
            ping_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(2),
            relay_timeout: Duration::from_secs(60),
        }
    }
}
