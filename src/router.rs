//! Fan-out router (C8): send-to-one, send-to-room-except-sender, and
//! send-to-all-except-sender primitives.
//!
//! Fan-out is best-effort: a slow or gone recipient never blocks or
//! fails the sender's command. The outbox channel absorbs back-pressure
//! for us (a dead receiver just makes `send` return an error we drop).

use crate::client::ClientManager;
use crate::rooms::RoomManager;

/// Queues `line` for delivery to `id`, if it's still connected.
/// Write errors (peer gone) are silently swallowed.
pub fn send(clients: &ClientManager, id: u64, line: &str) {
    if let Some(client) = clients.get(id) {
        let _ = client.outbox.send(line.to_string());
    }
}

/// Sends `line` to every member of `room` except `except_user`.
pub fn broadcast_room(
    clients: &ClientManager,
    rooms: &RoomManager,
    room: &str,
    line: &str,
    except_user: &str,
) {
    for member in rooms.members_except(room, except_user) {
        if let Some(client) = clients.find_online(&member) {
            let _ = client.outbox.send(line.to_string());
        }
    }
}

/// Sends `line` to every `Authenticated` client except `except_id`.
pub fn broadcast_all(clients: &ClientManager, line: &str, except_id: u64) {
    for id in clients.authenticated_ids_except(except_id) {
        send(clients, id, line);
    }
}
