use chat_protocol::{
    ClientFrame, FileTransferReqPayload, FileTransferRespPayload, RelayRole, ServerFrame,
    TransferVerdict, error_codes,
};
use chat_test_utils::TestClient;
use server::{Server, ServerConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

async fn spawn_server() -> (SocketAddr, SocketAddr) {
    let config = ServerConfig {
        port: 0,
        relay_port: 0,
        ping_interval: Duration::from_secs(60),
        pong_timeout: Duration::from_secs(5),
        relay_timeout: Duration::from_secs(5),
    };
    let server = Server::bind(config).await.expect("bind server");
    let control = server.control_addr().expect("control addr").port();
    let relay = server.relay_addr().expect("relay addr").port();
    tokio::spawn(server.run());
    (
        SocketAddr::from(([127, 0, 0, 1], control)),
        SocketAddr::from(([127, 0, 0, 1], relay)),
    )
}

async fn pair(addr: SocketAddr) -> (TestClient, TestClient) {
    let mut alice = TestClient::connect(addr).await;
    alice.login("alice").await;
    let mut bob = TestClient::connect(addr).await;
    bob.login("bob").await;
    alice.recv().await; // JOINED bob
    (alice, bob)
}

fn offer(receiver: &str, filename: &str, checksum: &str) -> ClientFrame {
    ClientFrame::FileTransferReq(FileTransferReqPayload {
        sender: String::new(), // the broker fills this in from the session
        receiver: receiver.to_owned(),
        filename: filename.to_owned(),
        checksum: checksum.to_owned(),
    })
}

fn verdict(status: TransferVerdict) -> ClientFrame {
    ClientFrame::FileTransferResp(FileTransferRespPayload { status, code: None })
}

/// Run the control-port negotiation through ACCEPT and return both READY
/// payloads (sender side, receiver side).
async fn negotiate(
    alice: &mut TestClient,
    bob: &mut TestClient,
    filename: &str,
    checksum: &str,
) -> (
    chat_protocol::FileTransferReadyPayload,
    chat_protocol::FileTransferReadyPayload,
) {
    alice.send(&offer("bob", filename, checksum)).await;
    match alice.recv().await {
        ServerFrame::FileTransferResp(resp) => assert_eq!(resp.status, TransferVerdict::Ok),
        other => panic!("expected FILE_TRANSFER_RESP, got {other:?}"),
    }
    match bob.recv().await {
        ServerFrame::FileTransferReq(req) => {
            assert_eq!(req.sender, "alice");
            assert_eq!(req.filename, filename);
            assert_eq!(req.checksum, checksum);
        }
        other => panic!("expected forwarded FILE_TRANSFER_REQ, got {other:?}"),
    }

    bob.send(&verdict(TransferVerdict::Accept)).await;
    let to_receiver = match bob.recv().await {
        ServerFrame::FileTransferReady(ready) => ready,
        other => panic!("expected FILE_TRANSFER_READY, got {other:?}"),
    };
    let to_sender = match alice.recv().await {
        ServerFrame::FileTransferReady(ready) => ready,
        other => panic!("expected FILE_TRANSFER_READY, got {other:?}"),
    };
    (to_sender, to_receiver)
}

async fn open_half(relay: SocketAddr, uuid: &str, role: u8) -> TcpStream {
    let mut stream = TcpStream::connect(relay).await.expect("connect relay");
    stream.write_all(uuid.as_bytes()).await.expect("uuid");
    stream.write_all(&[role]).await.expect("role byte");
    stream
}

#[tokio::test]
async fn bytes_relay_end_to_end_is_byte_exact() {
    let (control, relay) = spawn_server().await;
    let (mut alice, mut bob) = pair(control).await;

    let payload = b"abcdefgh".repeat(128 * 1024); // 1 MiB
    let (to_sender, to_receiver) = negotiate(&mut alice, &mut bob, "big.bin", "feed").await;
    assert_eq!(to_sender.uuid, to_receiver.uuid);
    assert_eq!(to_sender.role, RelayRole::Sender);
    assert_eq!(to_receiver.role, RelayRole::Receiver);
    assert_eq!(to_sender.uuid.len(), 36);

    let mut sender = open_half(relay, &to_sender.uuid, b's').await;
    let mut receiver = open_half(relay, &to_receiver.uuid, b'r').await;

    let to_ship = payload.clone();
    let ship = tokio::spawn(async move {
        sender.write_all(&to_ship).await.unwrap();
        sender.shutdown().await.unwrap();
    });

    let mut received = Vec::new();
    timeout(Duration::from_secs(10), receiver.read_to_end(&mut received))
        .await
        .expect("relay should complete")
        .unwrap();
    ship.await.unwrap();
    assert_eq!(received, payload);
}

#[tokio::test]
async fn relay_halves_may_arrive_receiver_first() {
    let (control, relay) = spawn_server().await;
    let (mut alice, mut bob) = pair(control).await;
    let (to_sender, to_receiver) = negotiate(&mut alice, &mut bob, "small.txt", "00").await;

    let mut receiver = open_half(relay, &to_receiver.uuid, b'r').await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut sender = open_half(relay, &to_sender.uuid, b's').await;

    sender.write_all(b"out of order").await.unwrap();
    sender.shutdown().await.unwrap();

    let mut received = Vec::new();
    timeout(Duration::from_secs(5), receiver.read_to_end(&mut received))
        .await
        .expect("relay should complete")
        .unwrap();
    assert_eq!(received, b"out of order");
}

#[tokio::test]
async fn decline_is_forwarded_to_the_sender() {
    let (control, _relay) = spawn_server().await;
    let (mut alice, mut bob) = pair(control).await;

    alice.send(&offer("bob", "a.txt", "aa")).await;
    alice.recv().await; // OK
    bob.recv().await; // forwarded offer

    bob.send(&verdict(TransferVerdict::Decline)).await;
    match alice.recv().await {
        ServerFrame::FileTransferResp(resp) => {
            assert_eq!(resp.status, TransferVerdict::Decline);
        }
        other => panic!("expected forwarded DECLINE, got {other:?}"),
    }

    // The pending entry is consumed: a second response finds nothing.
    bob.send(&verdict(TransferVerdict::Accept)).await;
    assert_eq!(bob.recv_within(Duration::from_millis(200)).await, None);
}

#[tokio::test]
async fn self_target_and_stranger_are_rejected() {
    let (control, _relay) = spawn_server().await;
    let mut alice = TestClient::connect(control).await;
    alice.login("alice").await;

    alice.send(&offer("alice", "a.txt", "aa")).await;
    match alice.recv().await {
        ServerFrame::FileTransferResp(resp) => {
            assert_eq!(resp.code, Some(error_codes::TRANSFER_SELF));
        }
        other => panic!("expected FILE_TRANSFER_RESP, got {other:?}"),
    }

    alice.send(&offer("nobody", "a.txt", "aa")).await;
    match alice.recv().await {
        ServerFrame::FileTransferResp(resp) => {
            assert_eq!(resp.code, Some(error_codes::TRANSFER_UNKNOWN_RECEIVER));
        }
        other => panic!("expected FILE_TRANSFER_RESP, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_uuid_on_the_relay_port_is_rejected() {
    let (_control, relay) = spawn_server().await;

    let mut conn = open_half(relay, "11111111-2222-3333-4444-555555555555", b's').await;
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(2), conn.read(&mut buf))
        .await
        .expect("server should close the socket")
        .unwrap();
    assert_eq!(n, 0, "expected EOF");
}

#[tokio::test]
async fn receiver_disconnect_drops_its_pending_offers() {
    let (control, _relay) = spawn_server().await;
    let (mut alice, bob) = pair(control).await;

    alice.send(&offer("bob", "a.txt", "aa")).await;
    alice.recv().await; // OK
    drop(bob);
    match alice.recv().await {
        ServerFrame::Left(p) => assert_eq!(p.username, "bob"),
        other => panic!("expected LEFT, got {other:?}"),
    }

    // A fresh session under the same name has no inherited offers.
    let mut bob_again = TestClient::connect(control).await;
    bob_again.login("bob").await;
    alice.recv().await; // JOINED bob
    bob_again.send(&verdict(TransferVerdict::Accept)).await;
    assert_eq!(bob_again.recv_within(Duration::from_millis(200)).await, None);
    assert_eq!(alice.recv_within(Duration::from_millis(200)).await, None);
}

#[tokio::test]
async fn offers_to_one_receiver_are_consumed_in_order() {
    let (control, _relay) = spawn_server().await;
    let (mut alice, mut bob) = pair(control).await;
    let mut carol = TestClient::connect(control).await;
    carol.login("carol").await;
    alice.recv().await; // JOINED carol
    bob.recv().await; // JOINED carol

    alice.send(&offer("bob", "first.txt", "01")).await;
    alice.recv().await; // OK
    carol
        .send(&ClientFrame::FileTransferReq(FileTransferReqPayload {
            sender: String::new(),
            receiver: "bob".to_owned(),
            filename: "second.txt".to_owned(),
            checksum: "02".to_owned(),
        }))
        .await;
    carol.recv().await; // OK
    bob.recv().await; // offer from alice
    bob.recv().await; // offer from carol

    // First response consumes alice's entry, second consumes carol's.
    bob.send(&verdict(TransferVerdict::Decline)).await;
    match alice.recv().await {
        ServerFrame::FileTransferResp(resp) => {
            assert_eq!(resp.status, TransferVerdict::Decline);
        }
        other => panic!("expected DECLINE at alice, got {other:?}"),
    }

    bob.send(&verdict(TransferVerdict::Decline)).await;
    match carol.recv().await {
        ServerFrame::FileTransferResp(resp) => {
            assert_eq!(resp.status, TransferVerdict::Decline);
        }
        other => panic!("expected DECLINE at carol, got {other:?}"),
    }
}
