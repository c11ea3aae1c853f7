//! Process-wide shared state: session registry, game table, pending
//! transfers, and relay slots.
//!
//! Every map lives behind its own lock on a cloneable handle.  The game
//! table keeps the pair map and move buffer under a single mutex so the
//! `pair[a] == b <=> pair[b] == a` invariant is never observable broken.

use chat_protocol::{Move, RelayRole, ServerFrame};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

/// Outbound frame queue depth per session.  A session that falls this far
/// behind is closed rather than silently skipped.
pub const OUTBOUND_QUEUE: usize = 256;

/// Registry entry for one named session.
pub struct SessionHandle {
    pub tx: mpsc::Sender<ServerFrame>,
    pub shutdown: watch::Sender<bool>,
}

/// One queued file-transfer offer, consumed by the receiver's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    pub sender: String,
    pub receiver: String,
    pub filename: String,
    pub checksum: String,
}

/// Rendezvous record for one transfer id on the auxiliary port.
#[derive(Default)]
pub struct RelaySlot {
    sender: Option<TcpStream>,
    receiver: Option<TcpStream>,
}

/// Outcome of binding an auxiliary-port stream to its slot.
pub enum BindOutcome {
    /// No slot for this id; the stream is dropped (closing the socket).
    UnknownId,
    /// The role side is already bound; the stream is dropped.
    DuplicateRole,
    /// First half stored; the peer has not arrived yet.
    Parked,
    /// Both halves bound; the slot has been removed from the map and the
    /// caller owns the copy.
    Complete {
        sender: TcpStream,
        receiver: TcpStream,
    },
}

// ---------------------------------------------------------------------------
// Game table
// ---------------------------------------------------------------------------

/// Symmetric RPS pairing map plus move buffer.
#[derive(Default)]
pub struct GameTable {
    pairs: HashMap<String, String>,
    moves: HashMap<String, Move>,
}

/// Result of recording a move.
pub enum MoveOutcome {
    NotPaired,
    /// Move stored; the opponent has not moved yet.
    Waiting,
    /// Both moves present.  The pair and both moves are already cleared.
    Resolved {
        opponent: String,
        own: Move,
        theirs: Move,
    },
}

impl GameTable {
    /// Install the symmetric pair `{a <-> b}`.  Fails with the already
    /// existing pair if either user is occupied.
    pub fn try_pair(&mut self, a: &str, b: &str) -> Result<(), (String, String)> {
        if let Some(other) = self.pairs.get(a) {
            return Err((a.to_owned(), other.clone()));
        }
        if let Some(other) = self.pairs.get(b) {
            return Err((b.to_owned(), other.clone()));
        }
        self.pairs.insert(a.to_owned(), b.to_owned());
        self.pairs.insert(b.to_owned(), a.to_owned());
        Ok(())
    }

    pub fn opponent_of(&self, user: &str) -> Option<String> {
        self.pairs.get(user).cloned()
    }

    /// Record `user`'s move; a repeated move overwrites the previous one.
    pub fn record_move(&mut self, user: &str, choice: Move) -> MoveOutcome {
        let Some(opponent) = self.pairs.get(user).cloned() else {
            return MoveOutcome::NotPaired;
        };
        self.moves.insert(user.to_owned(), choice);
        let Some(theirs) = self.moves.get(&opponent).copied() else {
            return MoveOutcome::Waiting;
        };
        self.moves.remove(user);
        self.moves.remove(&opponent);
        self.pairs.remove(user);
        self.pairs.remove(&opponent);
        MoveOutcome::Resolved {
            opponent,
            own: choice,
            theirs,
        }
    }

    /// Drop any pair containing `user` along with both buffered moves.
    /// Returns the opponent if a pair existed.
    pub fn dissolve(&mut self, user: &str) -> Option<String> {
        let opponent = self.pairs.remove(user)?;
        self.pairs.remove(&opponent);
        self.moves.remove(user);
        self.moves.remove(&opponent);
        Some(opponent)
    }
}

// ---------------------------------------------------------------------------
// ServerState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ServerState {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
    games: Arc<Mutex<GameTable>>,
    pending: Arc<Mutex<Vec<PendingTransfer>>>,
    relays: Arc<Mutex<HashMap<Uuid, RelaySlot>>>,
}

impl ServerState {
    pub fn new() -> Self {
        ServerState {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            games: Arc::new(Mutex::new(GameTable::default())),
            pending: Arc::new(Mutex::new(Vec::new())),
            relays: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    // -----------------------------------------------------------------------
    // Session registry
    // -----------------------------------------------------------------------

    /// Claim `username` for `handle`.  Check and insert happen under the
    /// write lock, so of two concurrent claims exactly one succeeds.
    pub async fn try_register(&self, username: &str, handle: SessionHandle) -> bool {
        let mut map = self.sessions.write().await;
        if map.contains_key(username) {
            false
        } else {
            map.insert(username.to_owned(), handle);
            true
        }
    }

    pub async fn unregister(&self, username: &str) {
        self.sessions.write().await.remove(username);
    }

    pub async fn is_registered(&self, username: &str) -> bool {
        self.sessions.read().await.contains_key(username)
    }

    /// Snapshot of all currently named sessions.
    pub async fn usernames(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Queue `frame` for `username`.  A full queue closes the recipient via
    /// its shutdown watch; a missing or closed recipient is a no-op.
    /// Returns whether the frame was queued.
    pub async fn send_to(&self, username: &str, frame: ServerFrame) -> bool {
        let map = self.sessions.read().await;
        let Some(handle) = map.get(username) else {
            return false;
        };
        deliver(username, handle, frame)
    }

    /// Queue `frame` for every named session except `skip`.
    pub async fn broadcast_except(&self, skip: &str, frame: ServerFrame) {
        let map = self.sessions.read().await;
        for (username, handle) in map.iter() {
            if username != skip {
                deliver(username, handle, frame.clone());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Games
    // -----------------------------------------------------------------------

    pub async fn with_games<R>(&self, f: impl FnOnce(&mut GameTable) -> R) -> R {
        let mut games = self.games.lock().await;
        f(&mut games)
    }

    // -----------------------------------------------------------------------
    // Pending transfers
    // -----------------------------------------------------------------------

    pub async fn push_pending(&self, transfer: PendingTransfer) {
        self.pending.lock().await.push(transfer);
    }

    /// Remove and return the first pending entry addressed to `receiver`.
    pub async fn take_pending_for(&self, receiver: &str) -> Option<PendingTransfer> {
        let mut pending = self.pending.lock().await;
        let index = pending.iter().position(|t| t.receiver == receiver)?;
        Some(pending.remove(index))
    }

    /// Drop every pending entry addressed to `receiver` (disconnect path).
    pub async fn drop_pending_to(&self, receiver: &str) {
        self.pending.lock().await.retain(|t| t.receiver != receiver);
    }

    // -----------------------------------------------------------------------
    // Relay slots
    // -----------------------------------------------------------------------

    /// Create an empty rendezvous slot.  Called before FILE_TRANSFER_READY
    /// is emitted, so no auxiliary connection can race the slot.
    pub async fn open_relay_slot(&self, id: Uuid) {
        self.relays.lock().await.insert(id, RelaySlot::default());
    }

    /// Bind one auxiliary-port stream to its role slot.  When this
    /// completes the rendezvous the slot is removed before returning, so
    /// the reaper and later arrivals can never touch an active copy.
    pub async fn bind_relay(&self, id: Uuid, role: RelayRole, stream: TcpStream) -> BindOutcome {
        let mut relays = self.relays.lock().await;
        let Some(slot) = relays.get_mut(&id) else {
            return BindOutcome::UnknownId;
        };
        let side = match role {
            RelayRole::Sender => &mut slot.sender,
            RelayRole::Receiver => &mut slot.receiver,
        };
        if side.is_some() {
            return BindOutcome::DuplicateRole;
        }
        *side = Some(stream);
        if slot.sender.is_some() && slot.receiver.is_some() {
            let slot = relays.remove(&id).unwrap_or_default();
            match (slot.sender, slot.receiver) {
                (Some(sender), Some(receiver)) => BindOutcome::Complete { sender, receiver },
                _ => BindOutcome::UnknownId,
            }
        } else {
            BindOutcome::Parked
        }
    }

    /// Remove an un-completed slot, closing any parked half.  Returns
    /// whether a slot was still present.
    pub async fn expire_relay(&self, id: Uuid) -> bool {
        self.relays.lock().await.remove(&id).is_some()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(username: &str, handle: &SessionHandle, frame: ServerFrame) -> bool {
    match handle.tx.try_send(frame) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(username = %username, "outbound queue full, closing session");
            let _ = handle.shutdown.send(true);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(username = %username, "send to closed session");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_protocol::{PresencePayload, ServerFrame};

    fn handle() -> (SessionHandle, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(8);
        let (shutdown, _) = watch::channel(false);
        (SessionHandle { tx, shutdown }, rx)
    }

    #[tokio::test]
    async fn registry_rejects_duplicate_usernames() {
        let state = ServerState::new();
        let (h1, _rx1) = handle();
        let (h2, _rx2) = handle();

        assert!(state.try_register("alice", h1).await);
        assert!(!state.try_register("alice", h2).await);

        state.unregister("alice").await;
        let (h3, _rx3) = handle();
        assert!(state.try_register("alice", h3).await);
    }

    #[tokio::test]
    async fn broadcast_skips_the_author() {
        let state = ServerState::new();
        let (h1, mut rx1) = handle();
        let (h2, mut rx2) = handle();
        assert!(state.try_register("alice", h1).await);
        assert!(state.try_register("bob", h2).await);

        let frame = ServerFrame::Joined(PresencePayload {
            username: "alice".to_owned(),
        });
        state.broadcast_except("alice", frame.clone()).await;

        assert_eq!(rx2.try_recv().unwrap(), frame);
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_triggers_shutdown_watch() {
        let state = ServerState::new();
        let (tx, _rx) = mpsc::channel(1);
        let (shutdown, shutdown_rx) = watch::channel(false);
        assert!(
            state
                .try_register("slow", SessionHandle { tx, shutdown })
                .await
        );

        assert!(state.send_to("slow", ServerFrame::Ping).await);
        assert!(!state.send_to("slow", ServerFrame::Ping).await);
        assert!(*shutdown_rx.borrow());
    }

    #[test]
    fn game_table_pairs_are_symmetric_and_exclusive() {
        let mut games = GameTable::default();
        games.try_pair("alice", "bob").unwrap();
        assert_eq!(games.opponent_of("alice").as_deref(), Some("bob"));
        assert_eq!(games.opponent_of("bob").as_deref(), Some("alice"));

        let (p1, p2) = games.try_pair("carol", "alice").unwrap_err();
        assert_eq!((p1.as_str(), p2.as_str()), ("alice", "bob"));
        let (p1, p2) = games.try_pair("bob", "carol").unwrap_err();
        assert_eq!((p1.as_str(), p2.as_str()), ("bob", "alice"));
        assert_eq!(games.opponent_of("carol"), None);
    }

    #[test]
    fn game_table_resolution_clears_pair_and_moves() {
        let mut games = GameTable::default();
        games.try_pair("alice", "bob").unwrap();

        assert!(matches!(
            games.record_move("alice", Move::Rock),
            MoveOutcome::Waiting
        ));
        match games.record_move("bob", Move::Scissors) {
            MoveOutcome::Resolved {
                opponent,
                own,
                theirs,
            } => {
                assert_eq!(opponent, "alice");
                assert_eq!(own, Move::Scissors);
                assert_eq!(theirs, Move::Rock);
            }
            _ => panic!("expected resolution"),
        }
        assert_eq!(games.opponent_of("alice"), None);
        assert_eq!(games.opponent_of("bob"), None);
        assert!(matches!(
            games.record_move("alice", Move::Paper),
            MoveOutcome::NotPaired
        ));
    }

    #[test]
    fn game_table_move_overwrites_before_resolution() {
        let mut games = GameTable::default();
        games.try_pair("alice", "bob").unwrap();
        assert!(matches!(
            games.record_move("alice", Move::Rock),
            MoveOutcome::Waiting
        ));
        assert!(matches!(
            games.record_move("alice", Move::Paper),
            MoveOutcome::Waiting
        ));
        match games.record_move("bob", Move::Rock) {
            MoveOutcome::Resolved { theirs, .. } => assert_eq!(theirs, Move::Paper),
            _ => panic!("expected resolution"),
        }
    }

    #[test]
    fn game_table_dissolve_notifies_the_opponent_once() {
        let mut games = GameTable::default();
        games.try_pair("alice", "bob").unwrap();
        games.record_move("alice", Move::Rock);

        assert_eq!(games.dissolve("alice").as_deref(), Some("bob"));
        assert_eq!(games.dissolve("bob"), None);
        assert!(matches!(
            games.record_move("bob", Move::Rock),
            MoveOutcome::NotPaired
        ));
    }

    #[tokio::test]
    async fn pending_transfers_are_consumed_in_arrival_order() {
        let state = ServerState::new();
        let first = PendingTransfer {
            sender: "alice".to_owned(),
            receiver: "bob".to_owned(),
            filename: "a.txt".to_owned(),
            checksum: "aa".to_owned(),
        };
        let second = PendingTransfer {
            sender: "carol".to_owned(),
            receiver: "bob".to_owned(),
            filename: "b.txt".to_owned(),
            checksum: "bb".to_owned(),
        };
        state.push_pending(first.clone()).await;
        state.push_pending(second.clone()).await;

        assert_eq!(state.take_pending_for("bob").await, Some(first));
        assert_eq!(state.take_pending_for("bob").await, Some(second));
        assert_eq!(state.take_pending_for("bob").await, None);
    }

    #[tokio::test]
    async fn disconnect_drops_only_entries_addressed_to_the_receiver() {
        let state = ServerState::new();
        state
            .push_pending(PendingTransfer {
                sender: "alice".to_owned(),
                receiver: "bob".to_owned(),
                filename: "a.txt".to_owned(),
                checksum: "aa".to_owned(),
            })
            .await;
        state
            .push_pending(PendingTransfer {
                sender: "bob".to_owned(),
                receiver: "carol".to_owned(),
                filename: "c.txt".to_owned(),
                checksum: "cc".to_owned(),
            })
            .await;

        state.drop_pending_to("bob").await;
        assert_eq!(state.take_pending_for("bob").await, None);
        assert!(state.take_pending_for("carol").await.is_some());
    }
}
