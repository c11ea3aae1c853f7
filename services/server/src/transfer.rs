//! File-transfer brokering on the control port.
//!
//! The broker only handles the negotiation: it queues offers, mints the
//! transfer id on acceptance, and opens the relay slot before either peer
//! learns the id.  The bytes themselves never touch this module.

use crate::state::{PendingTransfer, ServerState};
use chat_protocol::{
    FileTransferReadyPayload, FileTransferReqPayload, FileTransferRespPayload, RelayRole,
    ServerFrame, TransferVerdict, error_codes,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

pub async fn request(
    state: &ServerState,
    me: &str,
    mut req: FileTransferReqPayload,
    reply: &mpsc::Sender<ServerFrame>,
) {
    // The sender identity comes from the session, not the payload.
    req.sender = me.to_owned();
    if req.receiver == me {
        let _ = reply
            .send(ServerFrame::FileTransferResp(
                FileTransferRespPayload::error(error_codes::TRANSFER_SELF),
            ))
            .await;
        return;
    }
    if !state.is_registered(&req.receiver).await {
        let _ = reply
            .send(ServerFrame::FileTransferResp(
                FileTransferRespPayload::error(error_codes::TRANSFER_UNKNOWN_RECEIVER),
            ))
            .await;
        return;
    }

    let receiver = req.receiver.clone();
    state
        .push_pending(PendingTransfer {
            sender: req.sender.clone(),
            receiver: receiver.clone(),
            filename: req.filename.clone(),
            checksum: req.checksum.clone(),
        })
        .await;
    let _ = reply
        .send(ServerFrame::FileTransferResp(FileTransferRespPayload::ok()))
        .await;
    if !state
        .send_to(&receiver, ServerFrame::FileTransferReq(req))
        .await
    {
        warn!(receiver = %receiver, "receiver vanished before the offer was delivered");
        state.drop_pending_to(&receiver).await;
    }
}

/// Receiver's ACCEPT/DECLINE.  The first pending offer addressed to the
/// responder is the one consumed.
pub async fn response(
    state: &ServerState,
    me: &str,
    resp: FileTransferRespPayload,
    reply: &mpsc::Sender<ServerFrame>,
    relay_timeout: Duration,
) {
    let accepted = match resp.status {
        TransferVerdict::Accept => true,
        TransferVerdict::Decline => false,
        TransferVerdict::Ok | TransferVerdict::Error => {
            warn!(username = %me, "unexpected transfer response status, ignoring");
            return;
        }
    };
    let Some(pending) = state.take_pending_for(me).await else {
        warn!(username = %me, "transfer response with no pending offer, ignoring");
        return;
    };

    if accepted {
        let id = Uuid::new_v4();
        // Slot exists before either peer sees the id.
        state.open_relay_slot(id).await;
        spawn_slot_reaper(state.clone(), id, relay_timeout);
        state
            .send_to(
                &pending.sender,
                ServerFrame::FileTransferReady(FileTransferReadyPayload {
                    uuid: id.to_string(),
                    role: RelayRole::Sender,
                    checksum: pending.checksum.clone(),
                    filename: pending.filename.clone(),
                }),
            )
            .await;
        let _ = reply
            .send(ServerFrame::FileTransferReady(FileTransferReadyPayload {
                uuid: id.to_string(),
                role: RelayRole::Receiver,
                checksum: pending.checksum.clone(),
                filename: pending.filename.clone(),
            }))
            .await;
        info!(
            transfer_id = %id,
            sender = %pending.sender,
            receiver = %me,
            filename = %pending.filename,
            "transfer accepted"
        );
    } else {
        state
            .send_to(
                &pending.sender,
                ServerFrame::FileTransferResp(FileTransferRespPayload {
                    status: TransferVerdict::Decline,
                    code: None,
                }),
            )
            .await;
        info!(sender = %pending.sender, receiver = %me, filename = %pending.filename, "transfer declined");
    }
}

/// Drop the slot if nobody completed the rendezvous in time.  A completed
/// rendezvous already removed the slot, so active copies are untouched.
fn spawn_slot_reaper(state: ServerState, id: Uuid, timeout: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if state.expire_relay(id).await {
            warn!(transfer_id = %id, "relay rendezvous timed out, dropping slot");
        }
    });
}
