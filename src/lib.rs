//! `embercast`: a secure, line-oriented group-chat relay.
//!
//! `session` drives each connection's state machine; `state` holds
//! the single coarse-grained lock every handler reads and writes
//! through. See the module docs for the rest of the pieces: `auth`
//! (challenge/response), `users`/`tokens` (persisted registries),
//! `rooms`/`client` (in-memory membership and connection bookkeeping),
//! `router` (fan-out), `protocol` (the wire format), and `server` (the
//! TLS listener).

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod persist;
pub mod protocol;
pub mod rooms;
pub mod router;
pub mod server;
pub mod session;
pub mod state;
pub mod tokens;
pub mod users;
