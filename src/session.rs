//! Session loop (C7): the per-connection state machine.
//!
//! One tokio task per connection. It `select!`s between reading the
//! next line off the socket and draining its outbox (notifications
//! pushed by other connections' dispatch via the router, C8), so a
//! single writer half is never touched from two places at once.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::auth;
use crate::client::ConnState;
use crate::error::ErrorCode;
use crate::protocol::{self, Command, Response, MAX_LINE_LEN};
use crate::router;
use crate::state::{AppState, Shared};

/// Drives one client connection end to end: registration, the
/// read/dispatch/write loop, and disconnect cleanup. Generic over the
/// byte stream so tests can drive it over an in-memory duplex pipe
/// instead of a real TLS socket.
pub async fn handle_connection<S>(stream: S, remote_addr: SocketAddr, state: Arc<AppState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let span = tracing::info_span!("connection", client_id = tracing::field::Empty, %remote_addr);
    run(stream, remote_addr, state).instrument(span).await;
}

async fn run<S>(stream: S, remote_addr: SocketAddr, state: Arc<AppState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (rd, mut wr) = tokio::io::split(stream);
    let mut reader = BufReader::new(rd);
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<String>();

    let id = {
        let mut shared = state.shared.lock().unwrap();
        shared.clients.add(remote_addr, outbox_tx)
    };
    tracing::Span::current().record("client_id", id);

    tracing::info!("client connected");

    let mut line = String::new();
    loop {
        tokio::select! {
            biased;

            result = reader.read_line(&mut line) => {
                let raw = std::mem::take(&mut line);
                match result {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = raw.trim_end_matches(['\r', '\n']);
                        let (response, should_quit) = handle_line(&state, id, trimmed);
                        if wr.write_all(response.format().as_bytes()).await.is_err() {
                            break;
                        }
                        if should_quit {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(client_id = id, error = %e, "read error, closing connection");
                        break;
                    }
                }
            }

            Some(notification) = outbox_rx.recv() => {
                if wr.write_all(notification.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    }

    cleanup(&state, id);
    tracing::info!(client_id = id, "client disconnected");
}

/// Applies the line-length check and rate limit, then parses and
/// dispatches. Returns the response to write and whether the
/// connection should close after writing it. A `QUIT` always
/// terminates the connection once its response is written, regardless
/// of whether the handler accepted or rejected it.
fn handle_line(state: &AppState, id: u64, raw_line: &str) -> (Response, bool) {
    if raw_line.len() > MAX_LINE_LEN {
        return (Response::err(ErrorCode::InvalidFormat), false);
    }

    let now = Instant::now();
    {
        let mut shared = state.shared.lock().unwrap();
        if !shared.clients.check_rate_limit(id, state.config.rate_limit, now) {
            return (Response::err(ErrorCode::RateLimited), false);
        }
        shared.clients.touch(id, now);
    }

    let cmd = protocol::parse(raw_line);
    let is_quit = matches!(cmd, Command::Quit);
    let response = dispatch(state, id, cmd);

    (response, is_quit)
}

fn dispatch(state: &AppState, id: u64, cmd: Command) -> Response {
    let mut shared = state.shared.lock().unwrap();

    match cmd {
        Command::Unknown => Response::err(ErrorCode::UnknownCommand),
        Command::Hello { username } => handle_hello(&mut shared, id, username),
        Command::Auth { signature } => handle_auth(&mut shared, id, signature),
        Command::Register { username, pubkey, token } => {
            handle_register(&mut shared, username, pubkey, token)
        }
        Command::Join { room } => match require_authenticated(&shared, id) {
            Ok(user) => handle_join(&mut shared, &room, &user),
            Err(resp) => resp,
        },
        Command::Leave { room } => match require_authenticated(&shared, id) {
            Ok(user) => handle_leave(&mut shared, &room, &user),
            Err(resp) => resp,
        },
        Command::Msg { room, body } => match require_authenticated(&shared, id) {
            Ok(user) => handle_msg(&mut shared, &room, &user, &body),
            Err(resp) => resp,
        },
        Command::Privmsg { user: target, body } => match require_authenticated(&shared, id) {
            Ok(user) => handle_privmsg(&mut shared, &user, &target, &body),
            Err(resp) => resp,
        },
        Command::Who { room } => match require_authenticated(&shared, id) {
            Ok(_) => handle_who(&shared, &room),
            Err(resp) => resp,
        },
        Command::List => match require_authenticated(&shared, id) {
            Ok(_) => Response::RoomList(shared.rooms.list()),
            Err(resp) => resp,
        },
        Command::Users => match require_authenticated(&shared, id) {
            Ok(_) => handle_users(&shared),
            Err(resp) => resp,
        },
        Command::Ping => match require_authenticated(&shared, id) {
            Ok(_) => Response::Pong,
            Err(resp) => resp,
        },
        Command::Quit => match require_authenticated(&shared, id) {
            Ok(_) => Response::Ok(None),
            Err(resp) => resp,
        },
    }
}

/// All commands other than `HELLO`/`AUTH`/`REGISTER` require an
/// `Authenticated` connection; everything else yields `NOT_AUTHENTICATED`.
fn require_authenticated(shared: &Shared, id: u64) -> Result<String, Response> {
    match shared.clients.get(id) {
        Some(client) if client.state == ConnState::Authenticated => Ok(client.username.clone()),
        _ => Err(Response::err(ErrorCode::NotAuthenticated)),
    }
}

fn handle_hello(shared: &mut Shared, id: u64, username: String) -> Response {
    match shared.clients.get(id).map(|c| c.state) {
        Some(ConnState::Connected) => {}
        Some(_) => return Response::err_detail(ErrorCode::InvalidFormat, "Already in auth process"),
        None => return Response::err(ErrorCode::InvalidFormat),
    }

    if shared.clients.is_online(&username) {
        return Response::err_detail(ErrorCode::InvalidFormat, "User already online");
    }

    if !shared.users.contains(&username) {
        return Response::err(ErrorCode::UserNotFound);
    }

    let challenge = match auth::generate_challenge() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(client_id = id, error = %e, "failed to generate challenge");
            return Response::err(ErrorCode::AuthFailed);
        }
    };

    if let Some(client) = shared.clients.get_mut(id) {
        client.state = ConnState::AuthPending;
        client.username = username.clone();
        client.auth_session = Some(auth::AuthSession::new(username, challenge.clone()));
    }

    Response::Challenge(challenge)
}

fn handle_auth(shared: &mut Shared, id: u64, signature: String) -> Response {
    match shared.clients.get(id).map(|c| c.state) {
        Some(ConnState::AuthPending) => {}
        _ => return Response::err_detail(ErrorCode::InvalidFormat, "No auth in progress"),
    }

    let now = Instant::now();
    if shared.clients.is_locked_out(id, now) {
        return Response::err(ErrorCode::RateLimited);
    }

    let remote_addr = shared.clients.get(id).map(|c| c.remote_addr.to_string()).unwrap_or_default();
    let session = shared.clients.get(id).and_then(|c| c.auth_session.clone());
    let Some(session) = session else {
        return fail_auth(shared, id, &remote_addr, "missing challenge");
    };

    if session.is_expired() {
        return fail_auth(shared, id, &remote_addr, "expired challenge");
    }

    let Some(pubkey) = shared.users.get_pubkey(&session.username).map(str::to_string) else {
        return fail_auth(shared, id, &remote_addr, "unknown pubkey");
    };

    if !auth::verify_signature(&pubkey, &session.challenge_b64, &signature) {
        return fail_auth(shared, id, &remote_addr, "bad signature");
    }

    if !shared.clients.complete_auth(id, &session.username) {
        return fail_auth(shared, id, &remote_addr, "username claimed concurrently");
    }

    if let Some(client) = shared.clients.get_mut(id) {
        client.auth_session = None;
    }
    shared.clients.reset_auth_failures(id);

    tracing::info!(client_id = id, user = %session.username, %remote_addr, "authenticated");
    router::broadcast_all(&shared.clients, &Response::Online(session.username.clone()).format(), id);

    Response::Welcome(session.username)
}

/// Resets the connection to `Connected`, records the failure (for
/// lockout purposes), logs it with the claimed username and remote
/// address (security-visible failures are always logged), and returns
/// the uniform `AUTH_FAILED` response so no oracle is exposed between
/// bad signature, expired challenge, and missing pubkey.
fn fail_auth(shared: &mut Shared, id: u64, remote_addr: &str, reason: &str) -> Response {
    let claimed = shared
        .clients
        .get(id)
        .and_then(|c| c.auth_session.as_ref().map(|s| s.username.clone()))
        .unwrap_or_default();

    tracing::warn!(client_id = id, user = %claimed, %remote_addr, reason, "auth failed");

    if let Some(client) = shared.clients.get_mut(id) {
        client.state = ConnState::Connected;
        client.username.clear();
        client.auth_session = None;
    }
    shared.clients.record_auth_failure(id, Instant::now());

    Response::err(ErrorCode::AuthFailed)
}

fn handle_register(shared: &mut Shared, username: String, pubkey: String, token: String) -> Response {
    if shared.users.contains(&username) {
        return Response::err(ErrorCode::UserExists);
    }

    let valid = match shared.tokens.validate(&token) {
        Ok(valid) => valid,
        Err(e) => {
            tracing::error!(error = %e, "token registry flush failed");
            false
        }
    };

    if !valid {
        return Response::err(ErrorCode::InvalidToken);
    }

    if let Err(e) = shared.users.register(&username, &pubkey) {
        tracing::error!(error = %e, "user registry flush failed");
        return Response::err(ErrorCode::InvalidToken);
    }

    Response::ok(format!("REGISTER {username}"))
}

fn handle_join(shared: &mut Shared, room: &str, user: &str) -> Response {
    if shared.rooms.is_in(room, user) {
        return Response::err(ErrorCode::AlreadyInRoom);
    }

    shared.rooms.join(room, user);
    router::broadcast_room(
        &shared.clients,
        &shared.rooms,
        room,
        &Response::Joined { room: room.to_string(), user: user.to_string() }.format(),
        user,
    );

    Response::ok(format!("JOIN {room}"))
}

fn handle_leave(shared: &mut Shared, room: &str, user: &str) -> Response {
    if !shared.rooms.exists(room) {
        return Response::err(ErrorCode::RoomNotFound);
    }
    if !shared.rooms.is_in(room, user) {
        return Response::err(ErrorCode::NotInRoom);
    }

    router::broadcast_room(
        &shared.clients,
        &shared.rooms,
        room,
        &Response::Left { room: room.to_string(), user: user.to_string() }.format(),
        user,
    );
    shared.rooms.leave(room, user);

    Response::ok(format!("LEAVE {room}"))
}

fn handle_msg(shared: &mut Shared, room: &str, user: &str, body: &str) -> Response {
    if !shared.rooms.exists(room) {
        return Response::err(ErrorCode::RoomNotFound);
    }
    if !shared.rooms.is_in(room, user) {
        return Response::err(ErrorCode::NotInRoom);
    }

    router::broadcast_room(
        &shared.clients,
        &shared.rooms,
        room,
        &Response::Room { room: room.to_string(), sender: user.to_string(), body: body.to_string() }
            .format(),
        user,
    );

    Response::ok("MSG")
}

fn handle_privmsg(shared: &mut Shared, user: &str, target: &str, body: &str) -> Response {
    let Some(target_client) = shared.clients.find_online(target) else {
        return Response::err_detail(ErrorCode::UserNotFound, target);
    };
    let target_id = target_client.id;

    router::send(
        &shared.clients,
        target_id,
        &Response::Priv { sender: user.to_string(), body: body.to_string() }.format(),
    );

    Response::ok("PRIVMSG")
}

fn handle_who(shared: &Shared, room: &str) -> Response {
    Response::WhoList { room: room.to_string(), users: shared.rooms.members(room) }
}

fn handle_users(shared: &Shared) -> Response {
    Response::UserList(shared.clients.authenticated_usernames())
}

/// Runs disconnect cleanup exactly once: sweeps room membership,
/// broadcasts `LEFT`/`QUIT`, and drops every index.
fn cleanup(state: &AppState, id: u64) {
    let mut shared = state.shared.lock().unwrap();

    let was_authenticated = shared.clients.get(id).is_some_and(|c| c.state == ConnState::Authenticated);
    let username = shared.clients.get(id).map(|c| c.username.clone()).unwrap_or_default();

    if was_authenticated {
        let rooms = shared.rooms.remove_user_from_all(&username);
        for room in rooms {
            router::broadcast_room(
                &shared.clients,
                &shared.rooms,
                &room,
                &Response::Left { room: room.clone(), user: username.clone() }.format(),
                &username,
            );
        }
        router::broadcast_all(&shared.clients, &Response::Quit(username.clone()).format(), id);
    }

    shared.clients.remove(id);
}
