//! Rock-paper-scissors coordination: pairing, invites, moves, resolution.
//!
//! A pair is installed at invite time, so a pending invite already counts
//! as an ongoing game for conflict purposes.  The pair and the move
//! buffer live in the shared `GameTable`; this module only translates
//! outcomes into wire frames.

use crate::state::{MoveOutcome, ServerState};
use chat_protocol::{
    Decision, Move, ReplyPayload, RpsInvitePayload, RpsInviteRespPayload, RpsMoveReqPayload,
    RpsResultPayload, RpsStartReqPayload, RpsStartRespPayload, ServerFrame, Status, error_codes,
};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub async fn start(
    state: &ServerState,
    me: &str,
    req: RpsStartReqPayload,
    reply: &mpsc::Sender<ServerFrame>,
) {
    if req.receiver == me {
        let _ = reply
            .send(ServerFrame::RpsStartResp(RpsStartRespPayload::error(
                error_codes::RPS_SELF,
            )))
            .await;
        return;
    }
    if !state.is_registered(&req.receiver).await {
        let _ = reply
            .send(ServerFrame::RpsStartResp(RpsStartRespPayload::error(
                error_codes::RPS_UNKNOWN_RECEIVER,
            )))
            .await;
        return;
    }
    if let Err((p1, p2)) = state
        .with_games(|games| games.try_pair(me, &req.receiver))
        .await
    {
        let _ = reply
            .send(ServerFrame::RpsStartResp(RpsStartRespPayload {
                status: Status::Error,
                code: Some(error_codes::RPS_BUSY),
                players: Some((p1, p2)),
            }))
            .await;
        return;
    }

    let invited = state
        .send_to(
            &req.receiver,
            ServerFrame::RpsInvite(RpsInvitePayload {
                sender: me.to_owned(),
            }),
        )
        .await;
    if invited {
        info!(sender = %me, receiver = %req.receiver, "game invite sent");
        let _ = reply
            .send(ServerFrame::RpsStartResp(RpsStartRespPayload::ok()))
            .await;
    } else {
        // Opponent vanished between the registry check and the invite.
        state.with_games(|games| games.dissolve(me)).await;
        let _ = reply
            .send(ServerFrame::RpsStartResp(RpsStartRespPayload::error(
                error_codes::RPS_UNKNOWN_RECEIVER,
            )))
            .await;
    }
}

pub async fn invite_response(
    state: &ServerState,
    me: &str,
    req: RpsInviteRespPayload,
    reply: &mpsc::Sender<ServerFrame>,
) {
    let Some(opponent) = state.with_games(|games| games.opponent_of(me)).await else {
        debug!(username = %me, "invite response without a pair, ignoring");
        return;
    };
    match req.status {
        Decision::Accept => {
            info!(player = %me, opponent = %opponent, "game on");
            let _ = reply.send(ServerFrame::RpsReady).await;
            state.send_to(&opponent, ServerFrame::RpsReady).await;
        }
        Decision::Decline => {
            state.with_games(|games| games.dissolve(me)).await;
            let _ = reply.send(ServerFrame::RpsInviteDeclined).await;
            state
                .send_to(&opponent, ServerFrame::RpsInviteDeclined)
                .await;
        }
    }
}

pub async fn make_move(
    state: &ServerState,
    me: &str,
    req: RpsMoveReqPayload,
    reply: &mpsc::Sender<ServerFrame>,
) {
    match state
        .with_games(|games| games.record_move(me, req.choice))
        .await
    {
        MoveOutcome::NotPaired => {
            let _ = reply
                .send(ServerFrame::RpsMoveResp(ReplyPayload::error(
                    error_codes::RPS_NOT_PLAYING,
                )))
                .await;
        }
        MoveOutcome::Waiting => {
            let _ = reply
                .send(ServerFrame::RpsMoveResp(ReplyPayload::ok()))
                .await;
        }
        MoveOutcome::Resolved {
            opponent,
            own,
            theirs,
        } => {
            let _ = reply
                .send(ServerFrame::RpsMoveResp(ReplyPayload::ok()))
                .await;
            let result = resolve(me, own, &opponent, theirs);
            info!(winner = ?result.winner, "game resolved");
            let frame = ServerFrame::RpsResult(result);
            let _ = reply.send(frame.clone()).await;
            state.send_to(&opponent, frame).await;
        }
    }
}

/// Tie on equal moves, else rock > scissors > paper > rock.
fn resolve(a: &str, a_move: Move, b: &str, b_move: Move) -> RpsResultPayload {
    let winner = if a_move == b_move {
        None
    } else if a_move.beats(b_move) {
        Some(a.to_owned())
    } else {
        Some(b.to_owned())
    };
    let mut choices = BTreeMap::new();
    choices.insert(a.to_owned(), a_move);
    choices.insert(b.to_owned(), b_move);
    RpsResultPayload { winner, choices }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_covers_the_full_move_table() {
        let cases = [
            (Move::Rock, Move::Rock, None),
            (Move::Rock, Move::Paper, Some("b")),
            (Move::Rock, Move::Scissors, Some("a")),
            (Move::Paper, Move::Rock, Some("a")),
            (Move::Paper, Move::Paper, None),
            (Move::Paper, Move::Scissors, Some("b")),
            (Move::Scissors, Move::Rock, Some("b")),
            (Move::Scissors, Move::Paper, Some("a")),
            (Move::Scissors, Move::Scissors, None),
        ];
        for (a_move, b_move, expected) in cases {
            let result = resolve("a", a_move, "b", b_move);
            assert_eq!(
                result.winner.as_deref(),
                expected,
                "{a_move:?} vs {b_move:?}"
            );
            assert_eq!(result.choices["a"], a_move);
            assert_eq!(result.choices["b"], b_move);
        }
    }

    #[test]
    fn resolve_reports_both_choices_regardless_of_argument_order() {
        let result = resolve("bob", Move::Scissors, "alice", Move::Rock);
        assert_eq!(result.winner.as_deref(), Some("alice"));
        assert_eq!(result.choices["alice"], Move::Rock);
        assert_eq!(result.choices["bob"], Move::Scissors);
    }
}
