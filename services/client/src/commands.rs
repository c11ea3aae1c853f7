//! Slash-command parsing for the interactive prompt.

use chat_protocol::{Decision, Move};

/// One parsed input line.  Bare text broadcasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Exit,
    /// `/all`: list everyone online.
    List,
    Broadcast(String),
    /// `@user message`
    Private { receiver: String, message: String },
    /// `/rps user`
    RpsStart(String),
    /// `/y` or `/n`
    InviteReply(Decision),
    /// `/r`, `/p`, `/s`
    Move(Move),
    /// `/send user path`
    SendFile { receiver: String, path: String },
    /// `/files`: list pending offers.
    Files,
    /// `/a user filename`
    Accept { sender: String, filename: String },
    /// `/d user filename`
    Decline { sender: String, filename: String },
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("nothing to send")]
    Empty,
    #[error("unknown command {0}; try /help")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

pub fn parse(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(CommandError::Empty);
    }
    if let Some(rest) = line.strip_prefix('@') {
        let (receiver, message) = rest
            .split_once(' ')
            .ok_or(CommandError::Usage("@<user> <message>"))?;
        if receiver.is_empty() || message.trim().is_empty() {
            return Err(CommandError::Usage("@<user> <message>"));
        }
        return Ok(Command::Private {
            receiver: receiver.to_owned(),
            message: message.to_owned(),
        });
    }
    if !line.starts_with('/') {
        return Ok(Command::Broadcast(line.to_owned()));
    }

    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default();
    match verb {
        "/help" => Ok(Command::Help),
        "/exit" => Ok(Command::Exit),
        "/all" => Ok(Command::List),
        "/y" => Ok(Command::InviteReply(Decision::Accept)),
        "/n" => Ok(Command::InviteReply(Decision::Decline)),
        "/r" => Ok(Command::Move(Move::Rock)),
        "/p" => Ok(Command::Move(Move::Paper)),
        "/s" => Ok(Command::Move(Move::Scissors)),
        "/rps" => {
            let opponent = words.next().ok_or(CommandError::Usage("/rps <user>"))?;
            Ok(Command::RpsStart(opponent.to_owned()))
        }
        "/send" => {
            let receiver = words
                .next()
                .ok_or(CommandError::Usage("/send <user> <path>"))?;
            let path = words
                .next()
                .ok_or(CommandError::Usage("/send <user> <path>"))?;
            Ok(Command::SendFile {
                receiver: receiver.to_owned(),
                path: path.to_owned(),
            })
        }
        "/files" => Ok(Command::Files),
        "/a" => {
            let sender = words
                .next()
                .ok_or(CommandError::Usage("/a <user> <filename>"))?;
            let filename = words
                .next()
                .ok_or(CommandError::Usage("/a <user> <filename>"))?;
            Ok(Command::Accept {
                sender: sender.to_owned(),
                filename: filename.to_owned(),
            })
        }
        "/d" => {
            let sender = words
                .next()
                .ok_or(CommandError::Usage("/d <user> <filename>"))?;
            let filename = words
                .next()
                .ok_or(CommandError::Usage("/d <user> <filename>"))?;
            Ok(Command::Decline {
                sender: sender.to_owned(),
                filename: filename.to_owned(),
            })
        }
        other => Err(CommandError::Unknown(other.to_owned())),
    }
}

pub const HELP_TEXT: &str = "\
commands:
  <text>                broadcast to everyone
  @<user> <message>     private message
  /all                  list who is online
  /rps <user>           invite to rock-paper-scissors
  /y  /n                accept / decline an invite
  /r  /p  /s            play rock / paper / scissors
  /send <user> <path>   offer a file
  /files                list pending file offers
  /a <user> <filename>  accept an offer
  /d <user> <filename>  decline an offer
  /exit                 leave";
