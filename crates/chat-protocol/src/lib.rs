// chat-protocol: control-wire frame vocabulary and line codec.
//
// A control frame is one ASCII line `COMMAND SP JSON` where JSON is an
// RFC 8259 object.  The command token is the discriminant; it lives
// outside the JSON, so dispatch happens on the token rather than a
// serde tag.  `ClientFrame` covers client-to-server verbs, `ServerFrame`
// the reverse direction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Numeric error codes carried in ERROR replies.  The values are frozen;
/// each verb rejects with its own range.
pub mod error_codes {
    /// ENTER: username already registered.
    pub const NAME_TAKEN: u16 = 5000;
    /// ENTER: username fails the `[A-Za-z0-9_]{3,14}` grammar.
    pub const NAME_INVALID: u16 = 5001;
    /// ENTER: session already has a username.
    pub const ALREADY_NAMED: u16 = 5002;
    /// BROADCAST_REQ before login.
    pub const BROADCAST_UNAUTHENTICATED: u16 = 6000;
    /// HANGUP reason: no PONG within the timeout.
    pub const HEARTBEAT_TIMEOUT: u16 = 7000;
    /// PONG received while no PING was outstanding.
    pub const UNEXPECTED_PONG: u16 = 8000;
    /// LIST_REQ before login.
    pub const LIST_UNAUTHENTICATED: u16 = 9000;
    /// PRIVATE_MSG_REQ before login.
    pub const PRIVATE_UNAUTHENTICATED: u16 = 10001;
    /// PRIVATE_MSG_REQ: receiver not registered.
    pub const PRIVATE_UNKNOWN_RECEIVER: u16 = 10002;
    /// PRIVATE_MSG_REQ: receiver is the sender.
    pub const PRIVATE_SELF: u16 = 10003;
    /// RPS_START_REQ before login.
    pub const RPS_UNAUTHENTICATED: u16 = 11001;
    /// RPS_START_REQ: opponent not registered.
    pub const RPS_UNKNOWN_RECEIVER: u16 = 11002;
    /// RPS_START_REQ: opponent is the sender.
    pub const RPS_SELF: u16 = 11003;
    /// RPS_START_REQ: one of the two users is already in a game.
    pub const RPS_BUSY: u16 = 11004;
    /// RPS_MOVE_REQ while not paired.
    pub const RPS_NOT_PLAYING: u16 = 11005;
    /// FILE_TRANSFER_REQ before login.
    pub const TRANSFER_UNAUTHENTICATED: u16 = 13000;
    /// FILE_TRANSFER_REQ: receiver not registered.
    pub const TRANSFER_UNKNOWN_RECEIVER: u16 = 13001;
    /// FILE_TRANSFER_REQ: receiver is the sender.
    pub const TRANSFER_SELF: u16 = 13002;
}

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// Reply outcome for request/response verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Error,
}

/// Receiver decision on an RPS invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Accept,
    Decline,
}

/// FILE_TRANSFER_RESP status.  The verb is reused in three directions:
/// OK/ERROR as the broker's ack to the sender, ACCEPT/DECLINE as the
/// receiver's decision (DECLINE is also forwarded back to the sender).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferVerdict {
    Ok,
    Error,
    Accept,
    Decline,
}

/// An RPS move, serialized with the slash spelling the clients type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Move {
    #[serde(rename = "/r")]
    Rock,
    #[serde(rename = "/p")]
    Paper,
    #[serde(rename = "/s")]
    Scissors,
}

impl Move {
    /// True when `self` defeats `other` (rock > scissors > paper > rock).
    pub fn beats(self, other: Move) -> bool {
        matches!(
            (self, other),
            (Move::Rock, Move::Scissors) | (Move::Scissors, Move::Paper) | (Move::Paper, Move::Rock)
        )
    }
}

/// Role byte on the auxiliary relay port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayRole {
    #[serde(rename = "s")]
    Sender,
    #[serde(rename = "r")]
    Receiver,
}

impl RelayRole {
    pub fn as_byte(self) -> u8 {
        match self {
            RelayRole::Sender => b's',
            RelayRole::Receiver => b'r',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b's' => Some(RelayRole::Sender),
            b'r' => Some(RelayRole::Receiver),
            _ => None,
        }
    }
}

/// Length of the ASCII transfer id in the relay preamble (canonical
/// hyphenated UUID).
pub const TRANSFER_ID_LEN: usize = 36;
/// Relay preamble: transfer id plus one role byte.
pub const RELAY_HEADER_LEN: usize = TRANSFER_ID_LEN + 1;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Server greeting, sent once per connection before any client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterPayload {
    pub username: String,
}

/// Generic `{status, code?}` reply body shared by the `_RESP` verbs that
/// carry nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl ReplyPayload {
    pub fn ok() -> Self {
        ReplyPayload {
            status: Status::Ok,
            code: None,
        }
    }

    pub fn error(code: u16) -> Self {
        ReplyPayload {
            status: Status::Error,
            code: Some(code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReqPayload {
    pub message: String,
}

/// A broadcast delivered to every named session except the author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub username: String,
    pub message: String,
}

/// JOINED / LEFT presence event body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRespPayload {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Snapshot of currently named sessions, requester included.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clients: Vec<String>,
}

impl ListRespPayload {
    pub fn ok(clients: Vec<String>) -> Self {
        ListRespPayload {
            status: Status::Ok,
            code: None,
            clients,
        }
    }

    pub fn error(code: u16) -> Self {
        ListRespPayload {
            status: Status::Error,
            code: Some(code),
            clients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMsgReqPayload {
    pub receiver: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMsgPayload {
    pub sender: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpsStartReqPayload {
    pub receiver: String,
}

/// RPS_START_RESP body.  A `RPS_BUSY` rejection echoes the pair that is
/// already playing in `players`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpsStartRespPayload {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<(String, String)>,
}

impl RpsStartRespPayload {
    pub fn ok() -> Self {
        RpsStartRespPayload {
            status: Status::Ok,
            code: None,
            players: None,
        }
    }

    pub fn error(code: u16) -> Self {
        RpsStartRespPayload {
            status: Status::Error,
            code: Some(code),
            players: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpsInvitePayload {
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpsInviteRespPayload {
    pub status: Decision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpsMoveReqPayload {
    pub choice: Move,
}

/// RPS_RESULT body: `winner` is null on a tie, `choices` maps each
/// player to the move they sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpsResultPayload {
    pub winner: Option<String>,
    pub choices: BTreeMap<String, Move>,
}

/// PONG_ERROR body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodePayload {
    pub code: u16,
}

/// HANGUP body; `reason` is always `HEARTBEAT_TIMEOUT` today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HangupPayload {
    pub reason: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferReqPayload {
    pub sender: String,
    pub receiver: String,
    pub filename: String,
    /// Hex SHA-256 of the file contents, computed by the sending client.
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferRespPayload {
    pub status: TransferVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl FileTransferRespPayload {
    pub fn ok() -> Self {
        FileTransferRespPayload {
            status: TransferVerdict::Ok,
            code: None,
        }
    }

    pub fn error(code: u16) -> Self {
        FileTransferRespPayload {
            status: TransferVerdict::Error,
            code: Some(code),
        }
    }
}

/// FILE_TRANSFER_READY body.  `type` tells the peer which role byte to
/// present on the auxiliary port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferReadyPayload {
    pub uuid: String,
    #[serde(rename = "type")]
    pub role: RelayRole,
    pub checksum: String,
    pub filename: String,
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Decode failure classification.  The two variants map to the two
/// protocol-shape error replies; neither closes the connection.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Empty line, missing space, or a verb this direction does not accept.
    #[error("unknown command")]
    UnknownCommand,
    /// Known verb with a payload that is not a JSON object.
    #[error("payload: {0}")]
    Json(#[from] serde_json::Error),
}

fn json<T: Serialize>(payload: &T) -> String {
    serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_owned())
}

fn require_json(payload: &str) -> Result<(), DecodeError> {
    let _: serde_json::Value = serde_json::from_str(payload)?;
    Ok(())
}

/// Client-to-server frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Enter(EnterPayload),
    Bye,
    Pong,
    BroadcastReq(BroadcastReqPayload),
    ListReq,
    PrivateMsgReq(PrivateMsgReqPayload),
    RpsStartReq(RpsStartReqPayload),
    RpsInviteResp(RpsInviteRespPayload),
    RpsMoveReq(RpsMoveReqPayload),
    FileTransferReq(FileTransferReqPayload),
    FileTransferResp(FileTransferRespPayload),
}

impl ClientFrame {
    pub fn command(&self) -> &'static str {
        match self {
            ClientFrame::Enter(_) => "ENTER",
            ClientFrame::Bye => "BYE",
            ClientFrame::Pong => "PONG",
            ClientFrame::BroadcastReq(_) => "BROADCAST_REQ",
            ClientFrame::ListReq => "LIST_REQ",
            ClientFrame::PrivateMsgReq(_) => "PRIVATE_MSG_REQ",
            ClientFrame::RpsStartReq(_) => "RPS_START_REQ",
            ClientFrame::RpsInviteResp(_) => "RPS_INVITE_RESP",
            ClientFrame::RpsMoveReq(_) => "RPS_MOVE_REQ",
            ClientFrame::FileTransferReq(_) => "FILE_TRANSFER_REQ",
            ClientFrame::FileTransferResp(_) => "FILE_TRANSFER_RESP",
        }
    }

    /// Render the frame as a wire line without the trailing newline.
    pub fn encode(&self) -> String {
        let payload = match self {
            ClientFrame::Enter(p) => json(p),
            ClientFrame::Bye | ClientFrame::Pong | ClientFrame::ListReq => "{}".to_owned(),
            ClientFrame::BroadcastReq(p) => json(p),
            ClientFrame::PrivateMsgReq(p) => json(p),
            ClientFrame::RpsStartReq(p) => json(p),
            ClientFrame::RpsInviteResp(p) => json(p),
            ClientFrame::RpsMoveReq(p) => json(p),
            ClientFrame::FileTransferReq(p) => json(p),
            ClientFrame::FileTransferResp(p) => json(p),
        };
        format!("{} {}", self.command(), payload)
    }

    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let (command, payload) = line.split_once(' ').ok_or(DecodeError::UnknownCommand)?;
        match command {
            "ENTER" => Ok(ClientFrame::Enter(serde_json::from_str(payload)?)),
            "BYE" => {
                require_json(payload)?;
                Ok(ClientFrame::Bye)
            }
            "PONG" => {
                require_json(payload)?;
                Ok(ClientFrame::Pong)
            }
            "BROADCAST_REQ" => Ok(ClientFrame::BroadcastReq(serde_json::from_str(payload)?)),
            "LIST_REQ" => {
                require_json(payload)?;
                Ok(ClientFrame::ListReq)
            }
            "PRIVATE_MSG_REQ" => Ok(ClientFrame::PrivateMsgReq(serde_json::from_str(payload)?)),
            "RPS_START_REQ" => Ok(ClientFrame::RpsStartReq(serde_json::from_str(payload)?)),
            "RPS_INVITE_RESP" => Ok(ClientFrame::RpsInviteResp(serde_json::from_str(payload)?)),
            "RPS_MOVE_REQ" => Ok(ClientFrame::RpsMoveReq(serde_json::from_str(payload)?)),
            "FILE_TRANSFER_REQ" => Ok(ClientFrame::FileTransferReq(serde_json::from_str(payload)?)),
            "FILE_TRANSFER_RESP" => {
                Ok(ClientFrame::FileTransferResp(serde_json::from_str(payload)?))
            }
            _ => Err(DecodeError::UnknownCommand),
        }
    }
}

/// Server-to-client frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Ready(ReadyPayload),
    EnterResp(ReplyPayload),
    BroadcastResp(ReplyPayload),
    Broadcast(BroadcastPayload),
    Joined(PresencePayload),
    Left(PresencePayload),
    ByeResp(ReplyPayload),
    UnknownCommand,
    ParseError,
    Ping,
    PongError(CodePayload),
    Hangup(HangupPayload),
    ListResp(ListRespPayload),
    PrivateMsgResp(ReplyPayload),
    PrivateMsg(PrivateMsgPayload),
    RpsStartResp(RpsStartRespPayload),
    RpsInvite(RpsInvitePayload),
    RpsInviteResp(ReplyPayload),
    RpsInviteDeclined,
    RpsReady,
    RpsMoveResp(ReplyPayload),
    RpsResult(RpsResultPayload),
    FileTransferReq(FileTransferReqPayload),
    FileTransferResp(FileTransferRespPayload),
    FileTransferReady(FileTransferReadyPayload),
}

impl ServerFrame {
    pub fn command(&self) -> &'static str {
        match self {
            ServerFrame::Ready(_) => "READY",
            ServerFrame::EnterResp(_) => "ENTER_RESP",
            ServerFrame::BroadcastResp(_) => "BROADCAST_RESP",
            ServerFrame::Broadcast(_) => "BROADCAST",
            ServerFrame::Joined(_) => "JOINED",
            ServerFrame::Left(_) => "LEFT",
            ServerFrame::ByeResp(_) => "BYE_RESP",
            ServerFrame::UnknownCommand => "UNKNOWN_COMMAND",
            ServerFrame::ParseError => "PARSE_ERROR",
            ServerFrame::Ping => "PING",
            ServerFrame::PongError(_) => "PONG_ERROR",
            ServerFrame::Hangup(_) => "HANGUP",
            ServerFrame::ListResp(_) => "LIST_RESP",
            ServerFrame::PrivateMsgResp(_) => "PRIVATE_MSG_RESP",
            ServerFrame::PrivateMsg(_) => "PRIVATE_MSG",
            ServerFrame::RpsStartResp(_) => "RPS_START_RESP",
            ServerFrame::RpsInvite(_) => "RPS_INVITE",
            ServerFrame::RpsInviteResp(_) => "RPS_INVITE_RESP",
            ServerFrame::RpsInviteDeclined => "RPS_INVITE_DECLINED",
            ServerFrame::RpsReady => "RPS_READY",
            ServerFrame::RpsMoveResp(_) => "RPS_MOVE_RESP",
            ServerFrame::RpsResult(_) => "RPS_RESULT",
            ServerFrame::FileTransferReq(_) => "FILE_TRANSFER_REQ",
            ServerFrame::FileTransferResp(_) => "FILE_TRANSFER_RESP",
            ServerFrame::FileTransferReady(_) => "FILE_TRANSFER_READY",
        }
    }

    /// Render the frame as a wire line without the trailing newline.
    pub fn encode(&self) -> String {
        let payload = match self {
            ServerFrame::Ready(p) => json(p),
            ServerFrame::EnterResp(p)
            | ServerFrame::BroadcastResp(p)
            | ServerFrame::ByeResp(p)
            | ServerFrame::PrivateMsgResp(p)
            | ServerFrame::RpsInviteResp(p)
            | ServerFrame::RpsMoveResp(p) => json(p),
            ServerFrame::Broadcast(p) => json(p),
            ServerFrame::Joined(p) | ServerFrame::Left(p) => json(p),
            ServerFrame::UnknownCommand
            | ServerFrame::ParseError
            | ServerFrame::Ping
            | ServerFrame::RpsInviteDeclined
            | ServerFrame::RpsReady => "{}".to_owned(),
            ServerFrame::PongError(p) => json(p),
            ServerFrame::Hangup(p) => json(p),
            ServerFrame::ListResp(p) => json(p),
            ServerFrame::PrivateMsg(p) => json(p),
            ServerFrame::RpsStartResp(p) => json(p),
            ServerFrame::RpsInvite(p) => json(p),
            ServerFrame::RpsResult(p) => json(p),
            ServerFrame::FileTransferReq(p) => json(p),
            ServerFrame::FileTransferResp(p) => json(p),
            ServerFrame::FileTransferReady(p) => json(p),
        };
        format!("{} {}", self.command(), payload)
    }

    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let (command, payload) = line.split_once(' ').ok_or(DecodeError::UnknownCommand)?;
        match command {
            "READY" => Ok(ServerFrame::Ready(serde_json::from_str(payload)?)),
            "ENTER_RESP" => Ok(ServerFrame::EnterResp(serde_json::from_str(payload)?)),
            "BROADCAST_RESP" => Ok(ServerFrame::BroadcastResp(serde_json::from_str(payload)?)),
            "BROADCAST" => Ok(ServerFrame::Broadcast(serde_json::from_str(payload)?)),
            "JOINED" => Ok(ServerFrame::Joined(serde_json::from_str(payload)?)),
            "LEFT" => Ok(ServerFrame::Left(serde_json::from_str(payload)?)),
            "BYE_RESP" => Ok(ServerFrame::ByeResp(serde_json::from_str(payload)?)),
            "UNKNOWN_COMMAND" => {
                require_json(payload)?;
                Ok(ServerFrame::UnknownCommand)
            }
            "PARSE_ERROR" => {
                require_json(payload)?;
                Ok(ServerFrame::ParseError)
            }
            "PING" => {
                require_json(payload)?;
                Ok(ServerFrame::Ping)
            }
            "PONG_ERROR" => Ok(ServerFrame::PongError(serde_json::from_str(payload)?)),
            "HANGUP" => Ok(ServerFrame::Hangup(serde_json::from_str(payload)?)),
            "LIST_RESP" => Ok(ServerFrame::ListResp(serde_json::from_str(payload)?)),
            "PRIVATE_MSG_RESP" => Ok(ServerFrame::PrivateMsgResp(serde_json::from_str(payload)?)),
            "PRIVATE_MSG" => Ok(ServerFrame::PrivateMsg(serde_json::from_str(payload)?)),
            "RPS_START_RESP" => Ok(ServerFrame::RpsStartResp(serde_json::from_str(payload)?)),
            "RPS_INVITE" => Ok(ServerFrame::RpsInvite(serde_json::from_str(payload)?)),
            "RPS_INVITE_RESP" => Ok(ServerFrame::RpsInviteResp(serde_json::from_str(payload)?)),
            "RPS_INVITE_DECLINED" => {
                require_json(payload)?;
                Ok(ServerFrame::RpsInviteDeclined)
            }
            "RPS_READY" => {
                require_json(payload)?;
                Ok(ServerFrame::RpsReady)
            }
            "RPS_MOVE_RESP" => Ok(ServerFrame::RpsMoveResp(serde_json::from_str(payload)?)),
            "RPS_RESULT" => Ok(ServerFrame::RpsResult(serde_json::from_str(payload)?)),
            "FILE_TRANSFER_REQ" => Ok(ServerFrame::FileTransferReq(serde_json::from_str(payload)?)),
            "FILE_TRANSFER_RESP" => {
                Ok(ServerFrame::FileTransferResp(serde_json::from_str(payload)?))
            }
            "FILE_TRANSFER_READY" => {
                Ok(ServerFrame::FileTransferReady(serde_json::from_str(payload)?))
            }
            _ => Err(DecodeError::UnknownCommand),
        }
    }
}

// ---------------------------------------------------------------------------
// Username grammar
// ---------------------------------------------------------------------------

/// `^[A-Za-z0-9_]{3,14}$`
pub fn is_valid_username(name: &str) -> bool {
    (3..=14).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
