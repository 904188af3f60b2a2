//! Client manager (C6): per-connection state, rate limiting, auth
//! lockout, and the socket/username indexes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;

use crate::auth::AuthSession;

/// Messages queued for a connection's writer half, pushed by the
/// router (C8) from other connections' dispatch.
pub type Outbox = UnboundedSender<String>;

const RATE_WINDOW: Duration = Duration::from_secs(1);
const LOCKOUT_THRESHOLD: u32 = 5;
const LOCKOUT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connected,
    AuthPending,
    Authenticated,
}

pub struct Client {
    pub id: u64,
    pub remote_addr: SocketAddr,
    pub outbox: Outbox,
    pub state: ConnState,
    /// Empty iff `state == Connected`.
    pub username: String,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub auth_session: Option<AuthSession>,

    rate_count: u32,
    rate_window_start: Instant,
    auth_failures: u32,
    last_auth_failure: Option<Instant>,
}

impl Client {
    fn new(id: u64, remote_addr: SocketAddr, outbox: Outbox) -> Self {
        let now = Instant::now();
        Self {
            id,
            remote_addr,
            outbox,
            state: ConnState::Connected,
            username: String::new(),
            connected_at: now,
            last_activity: now,
            auth_session: None,
            rate_count: 0,
            rate_window_start: now,
            auth_failures: 0,
            last_auth_failure: None,
        }
    }
}

#[derive(Default)]
pub struct ClientManager {
    clients: HashMap<u64, Client>,
    socket_index: HashMap<SocketAddr, u64>,
    username_index: HashMap<String, u64>,
    next_id: u64,
}

impl ClientManager {
    /// Registers a newly-accepted connection in `Connected` state.
    /// Returns its stable id.
    pub fn add(&mut self, remote_addr: SocketAddr, outbox: Outbox) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.clients.insert(id, Client::new(id, remote_addr, outbox));
        self.socket_index.insert(remote_addr, id);
        id
    }

    /// Drops all bookkeeping for `id`: the client table entry, the
    /// socket index, and (if authenticated) the username index.
    pub fn remove(&mut self, id: u64) -> Option<Client> {
        let client = self.clients.remove(&id)?;
        self.socket_index.remove(&client.remote_addr);
        if client.state == ConnState::Authenticated {
            self.username_index.remove(&client.username);
        }
        Some(client)
    }

    pub fn get(&self, id: u64) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.username_index.contains_key(username)
    }

    pub fn find_online(&self, username: &str) -> Option<&Client> {
        let id = *self.username_index.get(username)?;
        self.clients.get(&id)
    }

    pub fn authenticated_ids_except(&self, except_id: u64) -> Vec<u64> {
        self.clients
            .values()
            .filter(|c| c.state == ConnState::Authenticated && c.id != except_id)
            .map(|c| c.id)
            .collect()
    }

    /// Usernames of every `Authenticated` client, sorted.
    pub fn authenticated_usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .clients
            .values()
            .filter(|c| c.state == ConnState::Authenticated)
            .map(|c| c.username.clone())
            .collect();
        names.sort();
        names
    }

    /// Sliding 1s window: resets and allows if the window has elapsed,
    /// otherwise increments and allows iff the count is still within
    /// `rate_limit`.
    pub fn check_rate_limit(&mut self, id: u64, rate_limit: u32, now: Instant) -> bool {
        let Some(client) = self.clients.get_mut(&id) else {
            return false;
        };

        if now.duration_since(client.rate_window_start) > RATE_WINDOW {
            client.rate_count = 1;
            client.rate_window_start = now;
            return true;
        }

        client.rate_count += 1;
        client.rate_count <= rate_limit
    }

    pub fn touch(&mut self, id: u64, now: Instant) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.last_activity = now;
        }
    }

    /// `true` iff this connection is currently locked out of AUTH
    /// attempts. A lockout that has outlived its cooldown resets the
    /// failure counter as a side effect and returns `false`.
    pub fn is_locked_out(&mut self, id: u64, now: Instant) -> bool {
        let Some(client) = self.clients.get_mut(&id) else {
            return false;
        };
        if client.auth_failures < LOCKOUT_THRESHOLD {
            return false;
        }
        let Some(last_failure) = client.last_auth_failure else {
            return false;
        };
        if now.duration_since(last_failure) > LOCKOUT_COOLDOWN {
            client.auth_failures = 0;
            client.last_auth_failure = None;
            return false;
        }
        true
    }

    pub fn record_auth_failure(&mut self, id: u64, now: Instant) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.auth_failures += 1;
            client.last_auth_failure = Some(now);
        }
    }

    pub fn reset_auth_failures(&mut self, id: u64) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.auth_failures = 0;
            client.last_auth_failure = None;
        }
    }

    /// Publishes `id -> username` in the username index, rejecting if
    /// another `Authenticated` client already owns that username. This
    /// is the hard uniqueness guarantee; `HELLO`'s online check is
    /// only a cheap early hint.
    pub fn complete_auth(&mut self, id: u64, username: &str) -> bool {
        if self.is_online(username) {
            return false;
        }
        let Some(client) = self.clients.get_mut(&id) else {
            return false;
        };
        client.state = ConnState::Authenticated;
        client.username = username.to_string();
        self.username_index.insert(username.to_string(), id);
        true
    }
}
