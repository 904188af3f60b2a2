//! Shared, mutex-guarded state.
//!
//! The user registry, token registry, client manager, and room manager
//! are wrapped in a single coarse-grained lock. Every
//! handler body is short and non-blocking apart from the occasional
//! registry flush (a synchronous, local file write), so contention is
//! a non-issue at expected scale and we never hold the lock across an
//! `.await`.

use std::sync::Mutex;

use crate::client::ClientManager;
use crate::config::Config;
use crate::rooms::RoomManager;
use crate::tokens::TokenRegistry;
use crate::users::UserRegistry;

pub struct Shared {
    pub users: UserRegistry,
    pub tokens: TokenRegistry,
    pub clients: ClientManager,
    pub rooms: RoomManager,
}

pub struct AppState {
    pub shared: Mutex<Shared>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config, users: UserRegistry, tokens: TokenRegistry) -> Self {
        Self {
            shared: Mutex::new(Shared {
                users,
                tokens,
                clients: ClientManager::default(),
                rooms: RoomManager::default(),
            }),
            config,
        }
    }
}
