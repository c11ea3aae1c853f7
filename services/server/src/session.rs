//! Per-connection session: reader loop, login state machine, heartbeat,
//! and command dispatch.
//!
//! Each accepted control connection gets two tasks: this reader loop and
//! a writer task draining the session's outbound queue.  Everything the
//! server emits on the socket (replies, PING, frames from other sessions)
//! goes through that one queue, so frames never interleave.

use crate::chat;
use crate::config::ServerConfig;
use crate::rps;
use crate::state::{OUTBOUND_QUEUE, ServerState, SessionHandle};
use crate::transfer;
use chat_protocol::{
    ClientFrame, CodePayload, DecodeError, EnterPayload, HangupPayload, PresencePayload,
    ReadyPayload, ReplyPayload, ServerFrame, error_codes, is_valid_username,
};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, info, warn};

enum Flow {
    Continue,
    Close,
}

struct Session {
    peer: SocketAddr,
    state: ServerState,
    config: ServerConfig,
    tx: mpsc::Sender<ServerFrame>,
    shutdown: watch::Sender<bool>,
    username: Option<String>,
    awaiting_pong: bool,
}

/// Drive one control connection from accept to teardown.
pub async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    state: ServerState,
    config: ServerConfig,
) {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let writer = tokio::spawn(write_frames(write_half, rx));
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let mut session = Session {
        peer,
        state,
        config: config.clone(),
        tx,
        shutdown: shutdown_tx,
        username: None,
        awaiting_pong: false,
    };

    session
        .send(ServerFrame::Ready(ReadyPayload {
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }))
        .await;

    let mut lines = BufReader::new(read_half).lines();
    // Armed for real by `reset()` at login; the named-session guard keeps
    // the branch cold until then.
    let mut ping_timer = time::interval(config.ping_interval);
    ping_timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let pong_deadline = time::sleep(config.pong_timeout);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!(peer = %peer, "session evicted");
                    break;
                }
            }
            _ = ping_timer.tick(), if session.username.is_some() => {
                if session.awaiting_pong {
                    session.hangup().await;
                    break;
                }
                session.send(ServerFrame::Ping).await;
                session.awaiting_pong = true;
                pong_deadline
                    .as_mut()
                    .reset(time::Instant::now() + session.config.pong_timeout);
            }
            _ = &mut pong_deadline, if session.awaiting_pong => {
                session.hangup().await;
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if let Flow::Close = session.handle_line(&line, &mut ping_timer).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(peer = %peer, "connection closed by peer");
                        break;
                    }
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "read error");
                        break;
                    }
                }
            }
        }
    }

    session.teardown().await;
    let _ = writer.await;
}

impl Session {
    async fn send(&self, frame: ServerFrame) {
        let _ = self.tx.send(frame).await;
    }

    async fn handle_line(&mut self, line: &str, ping_timer: &mut time::Interval) -> Flow {
        let frame = match ClientFrame::decode(line) {
            Ok(frame) => frame,
            Err(DecodeError::UnknownCommand) => {
                self.send(ServerFrame::UnknownCommand).await;
                return Flow::Continue;
            }
            Err(DecodeError::Json(e)) => {
                debug!(peer = %self.peer, error = %e, "unparseable payload");
                self.send(ServerFrame::ParseError).await;
                return Flow::Continue;
            }
        };

        match frame {
            ClientFrame::Enter(req) => self.handle_enter(req, ping_timer).await,
            ClientFrame::Bye => {
                self.send(ServerFrame::ByeResp(ReplyPayload::ok())).await;
                return Flow::Close;
            }
            ClientFrame::Pong => self.handle_pong().await,
            ClientFrame::BroadcastReq(req) => match self.username.as_deref() {
                Some(me) => chat::broadcast(&self.state, me, req, &self.tx).await,
                None => {
                    self.send(ServerFrame::BroadcastResp(ReplyPayload::error(
                        error_codes::BROADCAST_UNAUTHENTICATED,
                    )))
                    .await;
                }
            },
            ClientFrame::ListReq => match self.username.as_deref() {
                Some(_) => chat::list(&self.state, &self.tx).await,
                None => {
                    self.send(ServerFrame::ListResp(
                        chat_protocol::ListRespPayload::error(error_codes::LIST_UNAUTHENTICATED),
                    ))
                    .await;
                }
            },
            ClientFrame::PrivateMsgReq(req) => match self.username.as_deref() {
                Some(me) => chat::private_message(&self.state, me, req, &self.tx).await,
                None => {
                    self.send(ServerFrame::PrivateMsgResp(ReplyPayload::error(
                        error_codes::PRIVATE_UNAUTHENTICATED,
                    )))
                    .await;
                }
            },
            ClientFrame::RpsStartReq(req) => match self.username.as_deref() {
                Some(me) => rps::start(&self.state, me, req, &self.tx).await,
                None => {
                    self.send(ServerFrame::RpsStartResp(
                        chat_protocol::RpsStartRespPayload::error(error_codes::RPS_UNAUTHENTICATED),
                    ))
                    .await;
                }
            },
            ClientFrame::RpsInviteResp(req) => match self.username.as_deref() {
                Some(me) => rps::invite_response(&self.state, me, req, &self.tx).await,
                None => debug!(peer = %self.peer, "invite response before login, ignoring"),
            },
            ClientFrame::RpsMoveReq(req) => match self.username.as_deref() {
                Some(me) => rps::make_move(&self.state, me, req, &self.tx).await,
                None => {
                    // An anonymous session is never paired.
                    self.send(ServerFrame::RpsMoveResp(ReplyPayload::error(
                        error_codes::RPS_NOT_PLAYING,
                    )))
                    .await;
                }
            },
            ClientFrame::FileTransferReq(req) => match self.username.as_deref() {
                Some(me) => transfer::request(&self.state, me, req, &self.tx).await,
                None => {
                    self.send(ServerFrame::FileTransferResp(
                        chat_protocol::FileTransferRespPayload::error(
                            error_codes::TRANSFER_UNAUTHENTICATED,
                        ),
                    ))
                    .await;
                }
            },
            ClientFrame::FileTransferResp(resp) => match self.username.as_deref() {
                Some(me) => {
                    transfer::response(&self.state, me, resp, &self.tx, self.config.relay_timeout)
                        .await;
                }
                None => debug!(peer = %self.peer, "transfer response before login, ignoring"),
            },
        }
        Flow::Continue
    }

    async fn handle_enter(&mut self, req: EnterPayload, ping_timer: &mut time::Interval) {
        if self.username.is_some() {
            self.send(ServerFrame::EnterResp(ReplyPayload::error(
                error_codes::ALREADY_NAMED,
            )))
            .await;
            return;
        }
        if !is_valid_username(&req.username) {
            self.send(ServerFrame::EnterResp(ReplyPayload::error(
                error_codes::NAME_INVALID,
            )))
            .await;
            return;
        }
        let handle = SessionHandle {
            tx: self.tx.clone(),
            shutdown: self.shutdown.clone(),
        };
        if !self.state.try_register(&req.username, handle).await {
            self.send(ServerFrame::EnterResp(ReplyPayload::error(
                error_codes::NAME_TAKEN,
            )))
            .await;
            return;
        }
        self.username = Some(req.username.clone());
        self.send(ServerFrame::EnterResp(ReplyPayload::ok())).await;
        self.state
            .broadcast_except(
                &req.username,
                ServerFrame::Joined(PresencePayload {
                    username: req.username.clone(),
                }),
            )
            .await;
        ping_timer.reset();
        info!(username = %req.username, peer = %self.peer, "client entered");
    }

    async fn handle_pong(&mut self) {
        if self.awaiting_pong {
            self.awaiting_pong = false;
        } else {
            self.send(ServerFrame::PongError(CodePayload {
                code: error_codes::UNEXPECTED_PONG,
            }))
            .await;
        }
    }

    async fn hangup(&self) {
        warn!(peer = %self.peer, username = ?self.username, "heartbeat timeout, hanging up");
        self.send(ServerFrame::Hangup(HangupPayload {
            reason: error_codes::HEARTBEAT_TIMEOUT,
        }))
        .await;
    }

    /// Cascade cleanup: registry, presence, game pair, pending offers.
    /// Ongoing relays live on the auxiliary port and are left alone.
    /// The registry entry goes first; the socket closes only when `self`
    /// (and with it the outbound queue) drops at the end.
    async fn teardown(self) {
        let Some(name) = &self.username else {
            debug!(peer = %self.peer, "anonymous session closed");
            return;
        };
        self.state.unregister(name).await;
        self.state
            .broadcast_except(
                name,
                ServerFrame::Left(PresencePayload {
                    username: name.clone(),
                }),
            )
            .await;
        if let Some(opponent) = self.state.with_games(|games| games.dissolve(name)).await {
            self.state
                .send_to(&opponent, ServerFrame::RpsInviteDeclined)
                .await;
        }
        self.state.drop_pending_to(name).await;
        info!(username = %name, peer = %self.peer, "session closed");
    }
}

async fn write_frames(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<ServerFrame>) {
    while let Some(frame) = rx.recv().await {
        let mut line = frame.encode();
        line.push('\n');
        if writer.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}
