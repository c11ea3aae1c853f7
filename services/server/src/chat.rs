//! Chat routing: broadcast, list, private messages.

use crate::state::ServerState;
use chat_protocol::{
    BroadcastPayload, BroadcastReqPayload, ListRespPayload, PrivateMsgPayload,
    PrivateMsgReqPayload, ReplyPayload, ServerFrame, error_codes,
};
use tokio::sync::mpsc;

/// Fan a message out to every other named session; the author only gets
/// the OK ack, never an echo.
pub async fn broadcast(
    state: &ServerState,
    me: &str,
    req: BroadcastReqPayload,
    reply: &mpsc::Sender<ServerFrame>,
) {
    state
        .broadcast_except(
            me,
            ServerFrame::Broadcast(BroadcastPayload {
                username: me.to_owned(),
                message: req.message,
            }),
        )
        .await;
    let _ = reply
        .send(ServerFrame::BroadcastResp(ReplyPayload::ok()))
        .await;
}

/// Snapshot of the registry, requester included.  Order is unspecified.
pub async fn list(state: &ServerState, reply: &mpsc::Sender<ServerFrame>) {
    let clients = state.usernames().await;
    let _ = reply
        .send(ServerFrame::ListResp(ListRespPayload::ok(clients)))
        .await;
}

pub async fn private_message(
    state: &ServerState,
    me: &str,
    req: PrivateMsgReqPayload,
    reply: &mpsc::Sender<ServerFrame>,
) {
    if req.receiver == me {
        let _ = reply
            .send(ServerFrame::PrivateMsgResp(ReplyPayload::error(
                error_codes::PRIVATE_SELF,
            )))
            .await;
        return;
    }
    let delivered = state
        .send_to(
            &req.receiver,
            ServerFrame::PrivateMsg(PrivateMsgPayload {
                sender: me.to_owned(),
                message: req.message,
            }),
        )
        .await;
    let resp = if delivered {
        ReplyPayload::ok()
    } else {
        ReplyPayload::error(error_codes::PRIVATE_UNKNOWN_RECEIVER)
    };
    let _ = reply.send(ServerFrame::PrivateMsgResp(resp)).await;
}
