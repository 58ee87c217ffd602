pub mod hub;
pub mod router;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::EventError;
use crate::protocol::{ChatPayload, EventType, JoinPayload, Packet, TypingPayload};
use crate::registry::ConnId;
use hub::{run_hub, HubCommand};

const SEND_BUF: usize = 256;
const HUB_BUF: usize = 1024;

/// Per-connection lifecycle. `Unidentified` accepts only a join;
/// `Closed` is terminal and reached exactly once, when the read pump ends.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ConnPhase {
    Unidentified,
    Joined,
    Closed,
}

// ─── Event shaping ──────────────────────────────────────────────────────────
//
// Pure payload-to-command functions: no transport, no shared state, so the
// validation rules are unit-testable on their own. Room references are
// checked against the sender's actual room later, by the hub.

fn shape_join(
    conn: ConnId,
    default_room: &str,
    raw: serde_json::Value,
) -> Result<HubCommand, EventError> {
    let p: JoinPayload =
        serde_json::from_value(raw).map_err(|e| EventError::Malformed(e.to_string()))?;
    let username = p.username.trim().to_string();
    if username.is_empty() {
        return Err(EventError::Malformed("join requires a username".into()));
    }
    let room = p
        .room
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| default_room.to_string());
    Ok(HubCommand::Join {
        conn,
        username,
        room,
    })
}

fn shape_chat(
    conn: ConnId,
    phase: ConnPhase,
    raw: serde_json::Value,
) -> Result<HubCommand, EventError> {
    if phase != ConnPhase::Joined {
        return Err(EventError::NotJoined);
    }
    let p: ChatPayload =
        serde_json::from_value(raw).map_err(|e| EventError::Malformed(e.to_string()))?;
    if p.text.trim().is_empty() {
        return Err(EventError::EmptyMessage);
    }
    Ok(HubCommand::Chat {
        conn,
        room: p.room,
        text: p.text,
    })
}

fn shape_typing(
    conn: ConnId,
    phase: ConnPhase,
    raw: serde_json::Value,
    stopped: bool,
) -> Result<HubCommand, EventError> {
    if phase != ConnPhase::Joined {
        return Err(EventError::NotJoined);
    }
    let p: TypingPayload =
        serde_json::from_value(raw).map_err(|e| EventError::Malformed(e.to_string()))?;
    Ok(HubCommand::Typing {
        conn,
        room: p.room,
        stopped,
    })
}

// ─── Server ─────────────────────────────────────────────────────────────────

pub struct Server {
    default_room: String,
    hub_tx: mpsc::Sender<HubCommand>,
    conn_counter: AtomicU64,
}

impl Server {
    /// Spawns the hub task. The registry lives and dies with it; nothing is
    /// persisted across restarts.
    pub fn new(default_room: impl Into<String>) -> Self {
        let (hub_tx, hub_rx) = mpsc::channel(HUB_BUF);
        tokio::spawn(run_hub(hub_rx));
        Self {
            default_room: default_room.into(),
            hub_tx,
            conn_counter: AtomicU64::new(0),
        }
    }

    pub async fn listen_and_serve(self: Arc<Self>, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr, "listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted");
                    let srv = self.clone();
                    tokio::spawn(srv.serve_conn(stream));
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                    return Ok(());
                }
            }
        }
    }

    async fn serve_conn(self: Arc<Self>, stream: TcpStream) {
        let conn = ConnId(self.conn_counter.fetch_add(1, Ordering::Relaxed));
        let (send_tx, mut send_rx) = mpsc::channel::<Vec<u8>>(SEND_BUF);
        self.hub_tx
            .send(HubCommand::Register { conn, tx: send_tx })
            .await
            .ok();

        let (reader, mut writer) = stream.into_split();

        // Write pump: the connection's transport layer. The hub only ever
        // hands encoded packets to this queue, it never awaits delivery.
        tokio::spawn(async move {
            while let Some(data) = send_rx.recv().await {
                if writer.write_all(&data).await.is_err() {
                    break;
                }
            }
            debug!(%conn, "write pump ended");
        });

        // Read pump (runs in this task).
        let mut phase = ConnPhase::Unidentified;
        let mut lines = BufReader::new(reader).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let pkt: Packet = match serde_json::from_str(&line) {
                Ok(p) => p,
                Err(e) => {
                    debug!(%conn, error = %e, "malformed packet ignored");
                    continue;
                }
            };
            self.dispatch(conn, &mut phase, pkt).await;
        }

        // EOF, error, or client close all land here, once. The hub's leave
        // handling is idempotent anyway.
        phase = ConnPhase::Closed;
        self.hub_tx.send(HubCommand::Disconnect { conn }).await.ok();
        info!(%conn, ?phase, "connection closed");
    }

    async fn dispatch(&self, conn: ConnId, phase: &mut ConnPhase, pkt: Packet) {
        let shaped = match pkt.event {
            EventType::JoinRoom => shape_join(conn, &self.default_room, pkt.payload),
            EventType::ChatMessage => shape_chat(conn, *phase, pkt.payload),
            EventType::Typing => shape_typing(conn, *phase, pkt.payload, false),
            EventType::StopTyping => shape_typing(conn, *phase, pkt.payload, true),
            EventType::Message | EventType::RoomUsers => {
                debug!(%conn, "server-only event from client ignored");
                return;
            }
        };

        match shaped {
            Ok(cmd) => {
                if matches!(cmd, HubCommand::Join { .. }) {
                    *phase = ConnPhase::Joined;
                }
                self.hub_tx.send(cmd).await.ok();
            }
            Err(e) => debug!(%conn, error = %e, "event ignored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CONN: ConnId = ConnId(7);

    #[test]
    fn join_requires_a_username() {
        let err = shape_join(CONN, "lobby", json!({})).unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));

        let err = shape_join(CONN, "lobby", json!({"username": "  "})).unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));
    }

    #[test]
    fn join_defaults_the_room() {
        let cmd = shape_join(CONN, "lobby", json!({"username": "alice"})).unwrap();
        match cmd {
            HubCommand::Join { room, username, .. } => {
                assert_eq!(room, "lobby");
                assert_eq!(username, "alice");
            }
            _ => panic!("expected join"),
        }

        let cmd = shape_join(CONN, "lobby", json!({"username": "alice", "room": "games"}))
            .unwrap();
        match cmd {
            HubCommand::Join { room, .. } => assert_eq!(room, "games"),
            _ => panic!("expected join"),
        }
    }

    #[test]
    fn chat_before_join_is_rejected() {
        let err =
            shape_chat(CONN, ConnPhase::Unidentified, json!({"text": "hi"})).unwrap_err();
        assert_eq!(err, EventError::NotJoined);
    }

    #[test]
    fn chat_requires_nonempty_text() {
        let err = shape_chat(CONN, ConnPhase::Joined, json!({"text": " "})).unwrap_err();
        assert_eq!(err, EventError::EmptyMessage);

        let err = shape_chat(CONN, ConnPhase::Joined, json!({})).unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));
    }

    #[test]
    fn typing_carries_the_referenced_room_through() {
        let cmd =
            shape_typing(CONN, ConnPhase::Joined, json!({"room": "games"}), true).unwrap();
        match cmd {
            HubCommand::Typing { room, stopped, .. } => {
                assert_eq!(room.as_deref(), Some("games"));
                assert!(stopped);
            }
            _ => panic!("expected typing"),
        }
    }
}
