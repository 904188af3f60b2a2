//! End-to-end scenarios driven over an in-memory duplex pipe instead
//! of a real TLS socket, exercising [`embercast::session::handle_connection`]
//! the same way a real client would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use embercast::config::Config;
use embercast::session::handle_connection;
use embercast::state::AppState;
use embercast::tokens::TokenRegistry;
use embercast::users::UserRegistry;

type Blake2b256 = Blake2b<U32>;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn test_state(dir: &tempfile::TempDir) -> Arc<AppState> {
    let users = UserRegistry::load(dir.path().join("users.json")).unwrap();
    let tokens = TokenRegistry::load(dir.path().join("tokens.json")).unwrap();
    let config = Config { rate_limit: 1000, ..Config::default() };
    Arc::new(AppState::new(config, users, tokens))
}

/// A connected client half, talking line-by-line to a `handle_connection`
/// task running over the other end of a duplex pipe.
struct TestClient {
    reader: BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
    writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
}

impl TestClient {
    fn spawn(state: Arc<AppState>, port: u16) -> Self {
        let (client, server) = tokio::io::duplex(8192);
        tokio::spawn(handle_connection(server, addr(port), state));
        let (rd, wr) = tokio::io::split(client);
        Self { reader: BufReader::new(rd), writer: wr }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(1), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        line.trim_end_matches(['\r', '\n']).to_string()
    }
}

fn signature_for(challenge_b64: &str, pubkey_b64: &str) -> String {
    let challenge = BASE64.decode(challenge_b64).unwrap();
    let pubkey = BASE64.decode(pubkey_b64).unwrap();
    let mut hasher = Blake2b256::new();
    hasher.update(&challenge);
    hasher.update(&pubkey);
    BASE64.encode(hasher.finalize())
}

async fn register_and_login(client: &mut TestClient, state: &Arc<AppState>, user: &str, pubkey_b64: &str) {
    let token = state.shared.lock().unwrap().tokens.issue().unwrap();

    client.send(&format!("REGISTER {user} {pubkey_b64} {token}")).await;
    assert_eq!(client.recv().await, format!("OK REGISTER {user}"));

    client.send(&format!("HELLO {user}")).await;
    let challenge_line = client.recv().await;
    let challenge = challenge_line.strip_prefix("CHALLENGE ").unwrap();

    let signature = signature_for(challenge, pubkey_b64);
    client.send(&format!("AUTH {signature}")).await;
    assert_eq!(client.recv().await, format!("WELCOME {user}"));
}

#[tokio::test]
async fn registration_then_login() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let pubkey = BASE64.encode(b"alice-pubkey");

    let mut alice = TestClient::spawn(Arc::clone(&state), 1);
    register_and_login(&mut alice, &state, "alice", &pubkey).await;
}

#[tokio::test]
async fn room_fan_out() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let alice_key = BASE64.encode(b"alice-pubkey");
    let bob_key = BASE64.encode(b"bob-pubkey");

    let mut alice = TestClient::spawn(Arc::clone(&state), 2);
    register_and_login(&mut alice, &state, "alice", &alice_key).await;

    let mut bob = TestClient::spawn(Arc::clone(&state), 3);
    register_and_login(&mut bob, &state, "bob", &bob_key).await;
    assert_eq!(alice.recv().await, "ONLINE bob");

    alice.send("JOIN #lobby").await;
    assert_eq!(alice.recv().await, "OK JOIN #lobby");

    bob.send("JOIN #lobby").await;
    assert_eq!(bob.recv().await, "OK JOIN #lobby");
    assert_eq!(alice.recv().await, "JOINED #lobby bob");

    bob.send("MSG #lobby hello room").await;
    assert_eq!(bob.recv().await, "OK MSG");
    assert_eq!(alice.recv().await, "ROOM #lobby bob hello room");
}

#[tokio::test]
async fn privmsg_to_offline_user_fails() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let alice_key = BASE64.encode(b"alice-pubkey");

    let mut alice = TestClient::spawn(Arc::clone(&state), 4);
    register_and_login(&mut alice, &state, "alice", &alice_key).await;

    alice.send("PRIVMSG bob hi there").await;
    assert_eq!(alice.recv().await, "ERROR USER_NOT_FOUND bob");
}

#[tokio::test]
async fn disconnect_sweeps_rooms_and_broadcasts_quit() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let alice_key = BASE64.encode(b"alice-pubkey");
    let bob_key = BASE64.encode(b"bob-pubkey");

    let mut alice = TestClient::spawn(Arc::clone(&state), 5);
    register_and_login(&mut alice, &state, "alice", &alice_key).await;

    let mut bob = TestClient::spawn(Arc::clone(&state), 6);
    register_and_login(&mut bob, &state, "bob", &bob_key).await;
    assert_eq!(alice.recv().await, "ONLINE bob");

    alice.send("JOIN #lobby").await;
    assert_eq!(alice.recv().await, "OK JOIN #lobby");
    bob.send("JOIN #lobby").await;
    assert_eq!(bob.recv().await, "OK JOIN #lobby");
    assert_eq!(alice.recv().await, "JOINED #lobby bob");

    bob.send("QUIT").await;
    assert_eq!(bob.recv().await, "OK");

    assert_eq!(alice.recv().await, "LEFT #lobby bob");
    assert_eq!(alice.recv().await, "QUIT bob");

    // give the server task a moment to finish cleanup before asserting
    tokio::time::sleep(Duration::from_millis(50)).await;
    let shared = state.shared.lock().unwrap();
    assert!(!shared.clients.is_online("bob"));
    assert_eq!(shared.rooms.members("#lobby"), vec!["alice".to_string()]);
}

#[tokio::test]
async fn brute_force_lockout_then_reset() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let pubkey = BASE64.encode(b"alice-pubkey");
    let token = state.shared.lock().unwrap().tokens.issue().unwrap();

    let mut alice = TestClient::spawn(Arc::clone(&state), 7);
    alice.send(&format!("REGISTER alice {pubkey} {token}")).await;
    assert_eq!(alice.recv().await, "OK REGISTER alice");

    for _ in 0..5 {
        alice.send("HELLO alice").await;
        let challenge_line = alice.recv().await;
        assert!(challenge_line.starts_with("CHALLENGE "));

        alice.send("AUTH d29ycm9uZyBzaWduYXR1cmU=").await;
        assert_eq!(alice.recv().await, "ERROR AUTH_FAILED");
    }

    // 6th attempt: HELLO still succeeds (it doesn't gate on lockout),
    // but AUTH is now locked out rather than failing on the signature.
    alice.send("HELLO alice").await;
    let challenge_line = alice.recv().await;
    assert!(challenge_line.starts_with("CHALLENGE "));

    alice.send("AUTH d29ycm9uZyBzaWduYXR1cmU=").await;
    assert_eq!(alice.recv().await, "ERROR RATE_LIMITED");
}

#[tokio::test]
async fn duplicate_room_join_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let pubkey = BASE64.encode(b"alice-pubkey");

    let mut alice = TestClient::spawn(Arc::clone(&state), 8);
    register_and_login(&mut alice, &state, "alice", &pubkey).await;

    alice.send("JOIN #Lobby").await;
    assert_eq!(alice.recv().await, "OK JOIN #lobby");

    alice.send("JOIN #lobby").await;
    assert_eq!(alice.recv().await, "ERROR ALREADY_IN_ROOM");
}

#[tokio::test]
async fn leave_and_msg_distinguish_room_not_found_from_not_in_room() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let alice_key = BASE64.encode(b"alice-pubkey");
    let bob_key = BASE64.encode(b"bob-pubkey");

    let mut alice = TestClient::spawn(Arc::clone(&state), 10);
    register_and_login(&mut alice, &state, "alice", &alice_key).await;

    // No such room exists at all.
    alice.send("LEAVE #nosuchroom").await;
    assert_eq!(alice.recv().await, "ERROR ROOM_NOT_FOUND");
    alice.send("MSG #nosuchroom hi").await;
    assert_eq!(alice.recv().await, "ERROR ROOM_NOT_FOUND");

    // Room exists (bob is in it) but alice never joined it.
    let mut bob = TestClient::spawn(Arc::clone(&state), 11);
    register_and_login(&mut bob, &state, "bob", &bob_key).await;
    assert_eq!(alice.recv().await, "ONLINE bob");
    bob.send("JOIN #lobby").await;
    assert_eq!(bob.recv().await, "OK JOIN #lobby");

    alice.send("LEAVE #lobby").await;
    assert_eq!(alice.recv().await, "ERROR NOT_IN_ROOM");
    alice.send("MSG #lobby hi").await;
    assert_eq!(alice.recv().await, "ERROR NOT_IN_ROOM");
}

#[tokio::test]
async fn oversized_line_is_rejected_before_parsing() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let pubkey = BASE64.encode(b"alice-pubkey");

    let mut alice = TestClient::spawn(Arc::clone(&state), 9);
    register_and_login(&mut alice, &state, "alice", &pubkey).await;

    // Exactly at the limit: rejected as an unrecognised command, not
    // as oversized.
    alice.send(&"X".repeat(4096)).await;
    assert_eq!(alice.recv().await, "ERROR UNKNOWN_COMMAND");

    // One byte over: rejected before the line is even parsed.
    alice.send(&"X".repeat(4097)).await;
    assert_eq!(alice.recv().await, "ERROR INVALID_FORMAT");
}
