//! Line-oriented chat and coordination server.
//!
//! One control port multiplexes presence, chat, rock-paper-scissors and
//! file-transfer negotiation over `COMMAND JSON` lines; a second port
//! relays the file bytes between the two peers of an accepted transfer.

pub mod chat;
pub mod config;
pub mod relay;
pub mod rps;
pub mod session;
pub mod state;
pub mod transfer;

pub use config::ServerConfig;
pub use state::ServerState;

use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Bound listeners plus shared state; `run` drives both accept loops.
pub struct Server {
    control: TcpListener,
    relay: TcpListener,
    state: ServerState,
    config: ServerConfig,
}

impl Server {
    /// Bind both listeners without accepting yet, so callers can read the
    /// actual addresses (ephemeral ports in tests).
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let control = TcpListener::bind(("0.0.0.0", config.port)).await?;
        let relay = TcpListener::bind(("0.0.0.0", config.relay_port)).await?;
        Ok(Server {
            control,
            relay,
            state: ServerState::new(),
            config,
        })
    }

    pub fn control_addr(&self) -> io::Result<SocketAddr> {
        self.control.local_addr()
    }

    pub fn relay_addr(&self) -> io::Result<SocketAddr> {
        self.relay.local_addr()
    }

    /// Accept control and relay connections until the task is dropped.
    pub async fn run(self) {
        let Server {
            control,
            relay,
            state,
            config,
        } = self;
        let relay_state = state.clone();
        tokio::select! {
            () = accept_control(control, state, config) => {}
            () = relay::run(relay, relay_state) => {}
        }
    }
}

async fn accept_control(listener: TcpListener, state: ServerState, config: ServerConfig) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "control connection accepted");
                tokio::spawn(session::run_session(
                    stream,
                    peer,
                    state.clone(),
                    config.clone(),
                ));
            }
            Err(e) => warn!(error = %e, "control accept error"),
        }
    }
}
