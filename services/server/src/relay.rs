//! Auxiliary-port byte relay.
//!
//! Each connection announces itself with a 37-byte preamble: the ASCII
//! transfer id plus one role byte.  The first half of a pair parks inside
//! its slot; the second arrival takes both streams out of the map and
//! copies sender bytes to the receiver until the sender half-closes.
//! Nothing is buffered beyond the copy window.

use crate::state::{BindOutcome, ServerState};
use chat_protocol::{RELAY_HEADER_LEN, RelayRole, TRANSFER_ID_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub async fn run(listener: TcpListener, state: ServerState) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "relay connection accepted");
                tokio::spawn(handle_connection(stream, state.clone()));
            }
            Err(e) => warn!(error = %e, "relay accept error"),
        }
    }
}

async fn handle_connection(mut stream: TcpStream, state: ServerState) {
    let mut header = [0u8; RELAY_HEADER_LEN];
    if let Err(e) = stream.read_exact(&mut header).await {
        debug!(error = %e, "relay peer left before sending a header");
        return;
    }
    let Some((id, role)) = parse_header(&header) else {
        warn!("malformed relay header, closing");
        return;
    };

    match state.bind_relay(id, role, stream).await {
        BindOutcome::UnknownId => {
            warn!(transfer_id = %id, "unknown transfer id, closing");
        }
        BindOutcome::DuplicateRole => {
            warn!(transfer_id = %id, role = ?role, "duplicate role for transfer, closing");
        }
        BindOutcome::Parked => {
            debug!(transfer_id = %id, role = ?role, "waiting for the peer half");
        }
        BindOutcome::Complete {
            mut sender,
            mut receiver,
        } => match tokio::io::copy(&mut sender, &mut receiver).await {
            Ok(bytes) => {
                let _ = receiver.shutdown().await;
                info!(transfer_id = %id, bytes, "relay complete");
            }
            Err(e) => {
                warn!(transfer_id = %id, error = %e, "relay copy failed");
            }
        },
    }
}

fn parse_header(header: &[u8; RELAY_HEADER_LEN]) -> Option<(Uuid, RelayRole)> {
    let id = std::str::from_utf8(&header[..TRANSFER_ID_LEN]).ok()?;
    let id = Uuid::try_parse(id).ok()?;
    let role = RelayRole::from_byte(header[TRANSFER_ID_LEN])?;
    Some((id, role))
}
