use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::EventError;
use crate::protocol::{
    EventType, MessagePayload, Packet, RoomUsersPayload, TypingEventPayload,
};
use crate::registry::{ConnId, JoinOutcome, RoomRegistry};

use super::router::Router;

/// Everything a connection task can ask the hub to do.
#[derive(Debug)]
pub enum HubCommand {
    /// A new transport-level connection; gives the hub its outbound queue.
    Register {
        conn: ConnId,
        tx: mpsc::Sender<Vec<u8>>,
    },
    Join {
        conn: ConnId,
        username: String,
        room: String,
    },
    Chat {
        conn: ConnId,
        /// Room the client referenced, if any; must match its bound room.
        room: Option<String>,
        text: String,
    },
    Typing {
        conn: ConnId,
        room: Option<String>,
        stopped: bool,
    },
    /// Graceful or detected close. Idempotent.
    Disconnect { conn: ConnId },
}

/// Owns all room state and performs every membership mutation together with
/// its presence notifications. `run_hub` drives one `Hub` from a command
/// channel on a single task, so each command (and the notification sequence
/// it produces) is an uninterruptible unit: no two joins or leaves can
/// interleave their notices.
pub struct Hub {
    registry: RoomRegistry,
    router: Router,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            registry: RoomRegistry::new(),
            router: Router::new(),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn apply(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { conn, tx } => {
                self.router.register(conn, tx);
                debug!(%conn, "connection registered");
            }
            HubCommand::Join {
                conn,
                username,
                room,
            } => self.handle_join(conn, &username, &room),
            HubCommand::Chat { conn, room, text } => {
                if let Err(e) = self.handle_chat(conn, room.as_deref(), &text) {
                    debug!(%conn, error = %e, "chat ignored");
                }
            }
            HubCommand::Typing {
                conn,
                room,
                stopped,
            } => {
                if let Err(e) = self.handle_typing(conn, room.as_deref(), stopped) {
                    debug!(%conn, error = %e, "typing ignored");
                }
            }
            HubCommand::Disconnect { conn } => self.handle_disconnect(conn),
        }
    }

    fn handle_join(&mut self, conn: ConnId, username: &str, room: &str) {
        match self.registry.join(conn, room, username) {
            JoinOutcome::Unchanged => {
                debug!(%conn, room, username, "duplicate join ignored");
            }
            JoinOutcome::Renamed => {
                info!(%conn, room, username, "member renamed");
                self.broadcast_view(room);
            }
            JoinOutcome::Moved { from, old_name } => {
                info!(%conn, %from, to = room, username, "member moved rooms");
                self.notify_left(&from, &old_name);
                self.notify_joined(conn, username, room);
            }
            JoinOutcome::Joined => {
                info!(%conn, room, username, count = self.registry.member_count(room), "member joined");
                self.notify_joined(conn, username, room);
            }
        }
    }

    /// The three-step join sequence: welcome to the joiner, joined notice to
    /// the rest of the room, membership view to everyone.
    fn notify_joined(&self, conn: ConnId, username: &str, room: &str) {
        if let Some(pkt) = system_packet(format!("Welcome to {room}, {username}!")) {
            self.router.send_to(conn, &pkt);
        }
        if let Some(pkt) = system_packet(format!("{username} has joined the chat")) {
            self.router
                .to_room_except(&self.registry, room, conn, &pkt);
        }
        self.broadcast_view(room);
    }

    /// Leave notice plus updated view, to the remaining members. The caller
    /// has already removed the leaver from the registry.
    fn notify_left(&self, room: &str, username: &str) {
        if let Some(pkt) = system_packet(format!("{username} has left the chat")) {
            self.router.to_room(&self.registry, room, &pkt);
        }
        self.broadcast_view(room);
    }

    fn broadcast_view(&self, room: &str) {
        let payload = RoomUsersPayload {
            room: room.to_string(),
            count: self.registry.member_count(room),
            users: self.registry.member_names(room),
        };
        if let Ok(pkt) = Packet::new(EventType::RoomUsers, payload) {
            self.router.to_room(&self.registry, room, &pkt);
        }
    }

    fn handle_chat(
        &mut self,
        conn: ConnId,
        room: Option<&str>,
        text: &str,
    ) -> Result<(), EventError> {
        let (bound_room, username) = self.sender_room(conn, room)?;
        let payload = MessagePayload {
            username,
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        if let Ok(pkt) = Packet::new(EventType::Message, payload) {
            self.router.to_room(&self.registry, &bound_room, &pkt);
        }
        Ok(())
    }

    fn handle_typing(
        &mut self,
        conn: ConnId,
        room: Option<&str>,
        stopped: bool,
    ) -> Result<(), EventError> {
        let (bound_room, username) = self.sender_room(conn, room)?;
        let payload = TypingEventPayload {
            username,
            room: bound_room.clone(),
        };
        let event = if stopped {
            EventType::StopTyping
        } else {
            EventType::Typing
        };
        if let Ok(pkt) = Packet::new(event, payload) {
            self.router
                .to_room_except(&self.registry, &bound_room, conn, &pkt);
        }
        Ok(())
    }

    /// Resolve the sender's bound room and name, rejecting unidentified
    /// senders and references to a room the sender is not in.
    fn sender_room(
        &self,
        conn: ConnId,
        referenced: Option<&str>,
    ) -> Result<(String, String), EventError> {
        let (bound_room, username) = self.registry.binding(conn).ok_or(EventError::NotJoined)?;
        if let Some(referenced) = referenced {
            if referenced != bound_room {
                return Err(EventError::RoomMismatch {
                    referenced: referenced.to_string(),
                    current: bound_room.to_string(),
                });
            }
        }
        Ok((bound_room.to_string(), username.to_string()))
    }

    fn handle_disconnect(&mut self, conn: ConnId) {
        self.router.unregister(conn);
        if let Some((room, username)) = self.registry.leave(conn) {
            info!(%conn, %room, %username, count = self.registry.member_count(&room), "member left");
            self.notify_left(&room, &username);
        } else {
            debug!(%conn, "disconnect with no room binding");
        }
    }
}

fn system_packet(text: String) -> Option<Packet> {
    Packet::new(EventType::Message, MessagePayload::system(text)).ok()
}

/// Drains the command channel until every sender is gone.
/// Must be spawned as a tokio task.
pub async fn run_hub(mut rx: mpsc::Receiver<HubCommand>) {
    let mut hub = Hub::new();
    while let Some(cmd) = rx.recv().await {
        hub.apply(cmd);
    }
}
