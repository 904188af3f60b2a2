//! Room manager (C5): in-memory, ephemeral named multicast groups.
//!
//! A room with zero members does not exist. It is auto-deleted on the
//! last leave and on disconnect sweep.

use std::collections::{BTreeSet, HashMap};

pub struct Room {
    pub creator: String,
    pub topic: Option<String>,
    members: BTreeSet<String>,
}

#[derive(Default)]
pub struct RoomManager {
    rooms: HashMap<String, Room>,
}

impl RoomManager {
    /// Joins `user` to `room`, auto-creating it (with `user` as
    /// creator) if it doesn't exist yet. Returns `false` if `user` was
    /// already a member.
    pub fn join(&mut self, room: &str, user: &str) -> bool {
        let entry = self.rooms.entry(room.to_string()).or_insert_with(|| Room {
            creator: user.to_string(),
            topic: None,
            members: BTreeSet::new(),
        });
        entry.members.insert(user.to_string())
    }

    /// Removes `user` from `room`. Returns `false` if the room doesn't
    /// exist or `user` wasn't a member. Deletes the room if it becomes
    /// empty.
    pub fn leave(&mut self, room: &str, user: &str) -> bool {
        let Some(entry) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = entry.members.remove(user);
        if entry.members.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }

    pub fn is_in(&self, room: &str, user: &str) -> bool {
        self.rooms.get(room).is_some_and(|r| r.members.contains(user))
    }

    pub fn exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Members of `room`, sorted. Empty if the room doesn't exist.
    pub fn members(&self, room: &str) -> Vec<String> {
        self.rooms.get(room).map(|r| r.members.iter().cloned().collect()).unwrap_or_default()
    }

    /// Members of `room` other than `user`, sorted.
    pub fn members_except(&self, room: &str, user: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|r| r.members.iter().filter(|m| m.as_str() != user).cloned().collect())
            .unwrap_or_default()
    }

    /// All room names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.keys().cloned().collect();
        names.sort();
        names
    }

    /// Removes `user` from every room they belong to, returning the
    /// list of rooms they were removed from. Any room left empty is
    /// auto-deleted.
    pub fn remove_user_from_all(&mut self, user: &str) -> Vec<String> {
        let affected: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, room)| room.members.contains(user))
            .map(|(name, _)| name.clone())
            .collect();

        for room in &affected {
            self.leave(room, user);
        }

        affected
    }
}
