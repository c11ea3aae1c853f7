//! Control-port connection: greeting handshake and typed frame IO.

use chat_protocol::{ClientFrame, DecodeError, ServerFrame};
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("protocol: {0}")]
    Decode(#[from] DecodeError),
    #[error("expected READY greeting, got {0}")]
    UnexpectedGreeting(String),
    #[error("server closed the connection")]
    Closed,
}

pub struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Connection {
    /// Connect and consume the READY greeting; returns the server version.
    pub async fn connect(addr: &str) -> Result<(Self, String), ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, writer) = stream.into_split();
        let mut conn = Connection {
            lines: BufReader::new(read_half).lines(),
            writer,
        };
        match conn.recv().await? {
            ServerFrame::Ready(ready) => Ok((conn, ready.version)),
            other => Err(ClientError::UnexpectedGreeting(format!("{other:?}"))),
        }
    }

    pub async fn send(&mut self, frame: &ClientFrame) -> Result<(), ClientError> {
        let mut line = frame.encode();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Next server frame; `Closed` on EOF.
    pub async fn recv(&mut self) -> Result<ServerFrame, ClientError> {
        let line = self.lines.next_line().await?.ok_or(ClientError::Closed)?;
        Ok(ServerFrame::decode(&line)?)
    }
}

/// Human-readable rendering of the server's numeric error codes.  Codes
/// are reported, never retried.
pub fn describe_code(code: u16) -> &'static str {
    use chat_protocol::error_codes as codes;
    match code {
        codes::NAME_TAKEN => "that name is taken",
        codes::NAME_INVALID => "names are 3-14 letters, digits or underscores",
        codes::ALREADY_NAMED => "you are already logged in",
        codes::BROADCAST_UNAUTHENTICATED
        | codes::LIST_UNAUTHENTICATED
        | codes::PRIVATE_UNAUTHENTICATED
        | codes::RPS_UNAUTHENTICATED
        | codes::TRANSFER_UNAUTHENTICATED => "log in first",
        codes::HEARTBEAT_TIMEOUT => "missed heartbeats",
        codes::UNEXPECTED_PONG => "stray pong",
        codes::PRIVATE_UNKNOWN_RECEIVER
        | codes::RPS_UNKNOWN_RECEIVER
        | codes::TRANSFER_UNKNOWN_RECEIVER => "no such user",
        codes::PRIVATE_SELF | codes::RPS_SELF | codes::TRANSFER_SELF => {
            "you cannot target yourself"
        }
        codes::RPS_BUSY => "a game is already running",
        codes::RPS_NOT_PLAYING => "you are not in a game",
        _ => "unknown error",
    }
}
