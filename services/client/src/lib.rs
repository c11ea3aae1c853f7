//! Interactive client for the line-oriented chat server.
//!
//! Mirrors the server's session state on the client side: the username
//! once login succeeds, the paths of files offered with `/send` (consulted
//! when the matching FILE_TRANSFER_READY arrives), and the list of offers
//! received from other users.

pub mod commands;
pub mod config;
pub mod connection;
pub mod files;

pub use config::ClientConfig;

use chat_protocol::{
    ClientFrame, EnterPayload, FileTransferReqPayload, FileTransferRespPayload, PrivateMsgReqPayload,
    RelayRole, RpsInviteRespPayload, RpsMoveReqPayload, RpsResultPayload, RpsStartReqPayload,
    ServerFrame, Status, TransferVerdict, is_valid_username,
};
use commands::{Command, CommandError, HELP_TEXT};
use connection::{ClientError, Connection, describe_code};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Client-side session mirror.
struct Mirror {
    username: Option<String>,
    /// Name sent in the last ENTER, promoted on the OK reply.
    pending_login: Option<String>,
    /// filename -> local path for files offered with `/send`.
    outgoing: HashMap<String, PathBuf>,
    /// Offers received and not yet answered.
    offers: Vec<FileTransferReqPayload>,
}

enum Flow {
    Continue,
    Quit,
}

pub async fn run(config: ClientConfig) -> Result<(), ClientError> {
    let (mut conn, version) = Connection::connect(&config.server).await?;
    println!("connected to chat server {version}");
    println!("choose a username (3-14 letters, digits or underscores):");

    let relay_addr = config.relay_addr();
    let mut mirror = Mirror {
        username: None,
        pending_login: None,
        outgoing: HashMap::new(),
        offers: Vec::new(),
    };
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut exiting = false;

    loop {
        tokio::select! {
            line = stdin.next_line(), if stdin_open => {
                match line? {
                    None => {
                        stdin_open = false;
                        conn.send(&ClientFrame::Bye).await?;
                        exiting = true;
                    }
                    Some(line) => {
                        handle_input(&mut conn, &mut mirror, &line, &mut exiting).await?;
                    }
                }
            }
            frame = conn.recv() => {
                match frame {
                    Err(ClientError::Closed) => {
                        println!("server closed the connection");
                        break;
                    }
                    Err(e) => return Err(e),
                    Ok(frame) => {
                        let flow = handle_frame(
                            &mut conn,
                            &mut mirror,
                            frame,
                            &relay_addr,
                            &config.download_dir,
                            exiting,
                        )
                        .await?;
                        if let Flow::Quit = flow {
                            break;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_input(
    conn: &mut Connection,
    mirror: &mut Mirror,
    line: &str,
    exiting: &mut bool,
) -> Result<(), ClientError> {
    // Until login succeeds, plain input is an ENTER attempt.
    if mirror.username.is_none() {
        let name = line.trim();
        match name {
            "/exit" => {
                conn.send(&ClientFrame::Bye).await?;
                *exiting = true;
            }
            "/help" => println!("{HELP_TEXT}"),
            _ if !is_valid_username(name) => {
                println!("names are 3-14 letters, digits or underscores; try again:");
            }
            _ => {
                mirror.pending_login = Some(name.to_owned());
                conn.send(&ClientFrame::Enter(EnterPayload {
                    username: name.to_owned(),
                }))
                .await?;
            }
        }
        return Ok(());
    }

    let command = match commands::parse(line) {
        Ok(command) => command,
        Err(CommandError::Empty) => return Ok(()),
        Err(e) => {
            println!("{e}");
            return Ok(());
        }
    };

    match command {
        Command::Help => println!("{HELP_TEXT}"),
        Command::Exit => {
            conn.send(&ClientFrame::Bye).await?;
            *exiting = true;
        }
        Command::List => conn.send(&ClientFrame::ListReq).await?,
        Command::Broadcast(message) => {
            conn.send(&ClientFrame::BroadcastReq(
                chat_protocol::BroadcastReqPayload { message },
            ))
            .await?;
        }
        Command::Private { receiver, message } => {
            conn.send(&ClientFrame::PrivateMsgReq(PrivateMsgReqPayload {
                receiver,
                message,
            }))
            .await?;
        }
        Command::RpsStart(receiver) => {
            conn.send(&ClientFrame::RpsStartReq(RpsStartReqPayload { receiver }))
                .await?;
        }
        Command::InviteReply(status) => {
            conn.send(&ClientFrame::RpsInviteResp(RpsInviteRespPayload { status }))
                .await?;
        }
        Command::Move(choice) => {
            conn.send(&ClientFrame::RpsMoveReq(RpsMoveReqPayload { choice }))
                .await?;
        }
        Command::SendFile { receiver, path } => {
            send_offer(conn, mirror, receiver, &path).await?;
        }
        Command::Files => {
            if mirror.offers.is_empty() {
                println!("no pending offers");
            } else {
                for offer in &mirror.offers {
                    println!("  {} offers {}", offer.sender, offer.filename);
                }
            }
        }
        Command::Accept { sender, filename } => {
            answer_offer(conn, mirror, &sender, &filename, TransferVerdict::Accept).await?;
        }
        Command::Decline { sender, filename } => {
            answer_offer(conn, mirror, &sender, &filename, TransferVerdict::Decline).await?;
        }
    }
    Ok(())
}

async fn send_offer(
    conn: &mut Connection,
    mirror: &mut Mirror,
    receiver: String,
    path: &str,
) -> Result<(), ClientError> {
    let path = PathBuf::from(path);
    let checksum = match files::sha256_hex(&path).await {
        Ok(checksum) => checksum,
        Err(e) => {
            println!("cannot read {}: {e}", path.display());
            return Ok(());
        }
    };
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_owned());
    mirror.outgoing.insert(filename.clone(), path);
    conn.send(&ClientFrame::FileTransferReq(FileTransferReqPayload {
        sender: mirror.username.clone().unwrap_or_default(),
        receiver,
        filename,
        checksum,
    }))
    .await?;
    Ok(())
}

async fn answer_offer(
    conn: &mut Connection,
    mirror: &mut Mirror,
    sender: &str,
    filename: &str,
    verdict: TransferVerdict,
) -> Result<(), ClientError> {
    let Some(index) = mirror
        .offers
        .iter()
        .position(|o| o.sender == sender && o.filename == filename)
    else {
        println!("no pending offer of {filename} from {sender}");
        return Ok(());
    };
    mirror.offers.remove(index);
    conn.send(&ClientFrame::FileTransferResp(FileTransferRespPayload {
        status: verdict,
        code: None,
    }))
    .await?;
    Ok(())
}

async fn handle_frame(
    conn: &mut Connection,
    mirror: &mut Mirror,
    frame: ServerFrame,
    relay_addr: &str,
    download_dir: &Path,
    exiting: bool,
) -> Result<Flow, ClientError> {
    match frame {
        ServerFrame::EnterResp(resp) => match resp.status {
            Status::Ok => {
                mirror.username = mirror.pending_login.take();
                if let Some(name) = &mirror.username {
                    println!("logged in as {name}; /help lists commands");
                }
            }
            Status::Error => {
                mirror.pending_login = None;
                println!(
                    "login rejected: {}; try again:",
                    describe_code(resp.code.unwrap_or_default())
                );
            }
        },
        ServerFrame::Broadcast(msg) => println!("[{}] {}", msg.username, msg.message),
        ServerFrame::PrivateMsg(msg) => println!("[{} → you] {}", msg.sender, msg.message),
        ServerFrame::Joined(p) => println!("* {} joined", p.username),
        ServerFrame::Left(p) => println!("* {} left", p.username),
        ServerFrame::ByeResp(_) => {
            if exiting {
                println!("bye");
                return Ok(Flow::Quit);
            }
            debug!("unexpected BYE_RESP");
        }
        ServerFrame::Ping => conn.send(&ClientFrame::Pong).await?,
        ServerFrame::PongError(p) => debug!(code = p.code, "server reported a stray pong"),
        ServerFrame::Hangup(h) => {
            println!("disconnected by server: {}", describe_code(h.reason));
            return Ok(Flow::Quit);
        }
        ServerFrame::ListResp(resp) => match resp.status {
            Status::Ok => println!("online: {}", resp.clients.join(", ")),
            Status::Error => println!(
                "list failed: {}",
                describe_code(resp.code.unwrap_or_default())
            ),
        },
        ServerFrame::BroadcastResp(resp) | ServerFrame::PrivateMsgResp(resp) => {
            if let Status::Error = resp.status {
                println!(
                    "not delivered: {}",
                    describe_code(resp.code.unwrap_or_default())
                );
            }
        }
        ServerFrame::RpsStartResp(resp) => match resp.status {
            Status::Ok => println!("invite sent, waiting for an answer"),
            Status::Error => match resp.players {
                Some((p1, p2)) => println!("cannot start: {p1} and {p2} are already playing"),
                None => println!(
                    "cannot start: {}",
                    describe_code(resp.code.unwrap_or_default())
                ),
            },
        },
        ServerFrame::RpsInvite(invite) => {
            println!(
                "{} wants to play rock-paper-scissors: /y to accept, /n to decline",
                invite.sender
            );
        }
        ServerFrame::RpsInviteDeclined => println!("the game was declined"),
        ServerFrame::RpsReady => println!("game on: /r rock, /p paper, /s scissors"),
        ServerFrame::RpsMoveResp(resp) => {
            if let Status::Error = resp.status {
                println!(
                    "move rejected: {}",
                    describe_code(resp.code.unwrap_or_default())
                );
            }
        }
        ServerFrame::RpsResult(result) => print_result(&result),
        ServerFrame::FileTransferReq(offer) => {
            println!(
                "{} offers {}: /a {} {} to accept, /d {} {} to decline",
                offer.sender,
                offer.filename,
                offer.sender,
                offer.filename,
                offer.sender,
                offer.filename
            );
            mirror.offers.push(offer);
        }
        ServerFrame::FileTransferResp(resp) => match resp.status {
            TransferVerdict::Ok => println!("offer delivered, waiting for the receiver"),
            TransferVerdict::Decline => println!("your offer was declined"),
            TransferVerdict::Error => println!(
                "offer rejected: {}",
                describe_code(resp.code.unwrap_or_default())
            ),
            TransferVerdict::Accept => debug!("unexpected ACCEPT from server"),
        },
        ServerFrame::FileTransferReady(ready) => match ready.role {
            RelayRole::Sender => {
                let Some(path) = mirror.outgoing.remove(&ready.filename) else {
                    println!("no recorded path for {}", ready.filename);
                    return Ok(Flow::Continue);
                };
                let relay_addr = relay_addr.to_owned();
                tokio::spawn(async move {
                    match files::send_file(&relay_addr, &ready.uuid, &path).await {
                        Ok(bytes) => println!("sent {} ({bytes} bytes)", ready.filename),
                        Err(e) => println!("sending {} failed: {e}", ready.filename),
                    }
                });
            }
            RelayRole::Receiver => {
                let relay_addr = relay_addr.to_owned();
                let dir = download_dir.to_owned();
                tokio::spawn(async move {
                    match files::receive_file(
                        &relay_addr,
                        &ready.uuid,
                        &dir,
                        &ready.filename,
                        &ready.checksum,
                    )
                    .await
                    {
                        Ok(received) if received.checksum_ok => {
                            println!(
                                "received {} ({} bytes) -> {}",
                                ready.filename,
                                received.bytes,
                                received.path.display()
                            );
                        }
                        Ok(received) => {
                            println!(
                                "received {} but the checksum DOES NOT match; kept at {}",
                                ready.filename,
                                received.path.display()
                            );
                        }
                        Err(e) => println!("receiving {} failed: {e}", ready.filename),
                    }
                });
            }
        },
        ServerFrame::UnknownCommand => println!("server did not understand that command"),
        ServerFrame::ParseError => println!("server could not parse that command"),
        ServerFrame::Ready(_) => debug!("duplicate READY ignored"),
        ServerFrame::RpsInviteResp(_) => debug!("unexpected RPS_INVITE_RESP from server"),
    }
    Ok(Flow::Continue)
}

fn print_result(result: &RpsResultPayload) {
    let choices = result
        .choices
        .iter()
        .map(|(name, choice)| format!("{name} played {choice:?}"))
        .collect::<Vec<_>>()
        .join(", ");
    match &result.winner {
        Some(winner) => println!("{winner} wins! ({choices})"),
        None => println!("tie ({choices})"),
    }
}
