// chat-test-utils: scripted TCP client for exercising the chat server.
//
// Test-support crate: helpers panic with context instead of returning
// errors, so suites read as straight-line scripts.

use chat_protocol::{ClientFrame, EnterPayload, ReplyPayload, ServerFrame, Status};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{Duration, timeout};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A line-oriented control-port client driven one frame at a time.
pub struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connect and consume the READY greeting.
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect to server");
        let (read_half, writer) = stream.into_split();
        let mut client = TestClient {
            lines: BufReader::new(read_half).lines(),
            writer,
        };
        match client.recv().await {
            ServerFrame::Ready(_) => {}
            other => panic!("expected READY greeting, got {other:?}"),
        }
        client
    }

    pub async fn send(&mut self, frame: &ClientFrame) {
        self.send_line(&frame.encode()).await;
    }

    /// Send a raw line, for malformed-input cases.
    pub async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("write line");
        self.writer.write_all(b"\n").await.expect("write newline");
    }

    /// Next decoded frame; panics on timeout, EOF, or an undecodable line.
    pub async fn recv(&mut self) -> ServerFrame {
        let line = timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a frame")
            .expect("read from server failed")
            .expect("server closed the connection while a frame was expected");
        ServerFrame::decode(&line)
            .unwrap_or_else(|e| panic!("undecodable server frame {line:?}: {e}"))
    }

    /// Next decoded frame if one arrives within `wait`; `None` on timeout.
    /// Panics on EOF or an undecodable line.
    pub async fn recv_within(&mut self, wait: Duration) -> Option<ServerFrame> {
        let line = match timeout(wait, self.lines.next_line()).await {
            Err(_) => return None,
            Ok(read) => read
                .expect("read from server failed")
                .expect("server closed the connection while a frame was expected"),
        };
        Some(
            ServerFrame::decode(&line)
                .unwrap_or_else(|e| panic!("undecodable server frame {line:?}: {e}")),
        )
    }

    /// Assert the server closes the connection without sending more frames.
    pub async fn expect_eof(&mut self) {
        let next = timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for the server to close")
            .expect("read from server failed");
        assert!(next.is_none(), "expected EOF, got frame: {next:?}");
    }

    /// ENTER as `username` and require the OK reply.
    pub async fn login(&mut self, username: &str) {
        self.send(&ClientFrame::Enter(EnterPayload {
            username: username.to_owned(),
        }))
        .await;
        match self.recv().await {
            ServerFrame::EnterResp(ReplyPayload {
                status: Status::Ok, ..
            }) => {}
            other => panic!("login as {username} failed: {other:?}"),
        }
    }
}
