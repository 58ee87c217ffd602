use std::collections::HashMap;
use std::fmt;

/// Opaque handle for one live connection, allocated by the accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Binding {
    room: String,
    name: String,
}

/// What a join actually did, so the caller can emit the right notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// Fresh membership in a room the connection was not in.
    Joined,
    /// Already a member under the same name; nothing changed.
    Unchanged,
    /// Already a member; only the display name changed.
    Renamed,
    /// Was a member of a different room; that binding was removed first.
    Moved { from: String, old_name: String },
}

/// Single source of truth for room membership.
///
/// Maps each connection to at most one `(room, name)` binding and keeps a
/// join-ordered member list per room. Rooms come into existence on first
/// join and are dropped when their last member leaves. The registry is plain
/// data: the hub task owns it exclusively, which serializes all access.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    bindings: HashMap<ConnId, Binding>,
    rooms: HashMap<String, Vec<ConnId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `conn` to `room` under `name`. A connection bound to a different
    /// room is removed from it first, so a member can never appear in two
    /// rooms at once.
    pub fn join(&mut self, conn: ConnId, room: &str, name: &str) -> JoinOutcome {
        if let Some(binding) = self.bindings.get_mut(&conn) {
            if binding.room == room {
                if binding.name == name {
                    return JoinOutcome::Unchanged;
                }
                binding.name = name.to_string();
                return JoinOutcome::Renamed;
            }
        }
        let prior = self.leave(conn);
        self.insert(conn, room, name);
        match prior {
            Some((from, old_name)) => JoinOutcome::Moved { from, old_name },
            None => JoinOutcome::Joined,
        }
    }

    fn insert(&mut self, conn: ConnId, room: &str, name: &str) {
        self.bindings.insert(
            conn,
            Binding {
                room: room.to_string(),
                name: name.to_string(),
            },
        );
        self.rooms.entry(room.to_string()).or_default().push(conn);
    }

    /// Remove `conn` from its room, returning the prior `(room, name)`
    /// binding. Idempotent: a connection with no binding returns `None`.
    pub fn leave(&mut self, conn: ConnId) -> Option<(String, String)> {
        let Binding { room, name } = self.bindings.remove(&conn)?;
        if let Some(members) = self.rooms.get_mut(&room) {
            members.retain(|c| *c != conn);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
        Some((room, name))
    }

    /// The `(room, name)` binding of a connection, if it has joined.
    pub fn binding(&self, conn: ConnId) -> Option<(&str, &str)> {
        self.bindings
            .get(&conn)
            .map(|b| (b.room.as_str(), b.name.as_str()))
    }

    /// Join-ordered member handles, for building a broadcast recipient set.
    pub fn members(&self, room: &str) -> Vec<ConnId> {
        self.rooms.get(room).cloned().unwrap_or_default()
    }

    /// Join-ordered display names; empty for unknown or empty rooms.
    pub fn member_names(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|c| self.bindings.get(c).map(|b| b.name.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Member count; zero for unknown rooms.
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, Vec::len)
    }
}
