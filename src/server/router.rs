use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::Packet;
use crate::registry::{ConnId, RoomRegistry};

/// Fans packets out to connections' outbound queues.
///
/// Recipient sets are computed from a registry snapshot at call time.
/// Delivery is `try_send`: a recipient whose queue is closed (disconnected
/// mid-broadcast) or full is skipped, and the broadcast continues. Eviction
/// is not the router's job; the disconnect path unregisters connections.
#[derive(Default)]
pub struct Router {
    senders: HashMap<ConnId, mpsc::Sender<Vec<u8>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, conn: ConnId, tx: mpsc::Sender<Vec<u8>>) {
        self.senders.insert(conn, tx);
    }

    pub fn unregister(&mut self, conn: ConnId) {
        self.senders.remove(&conn);
    }

    /// Deliver to one connection. A dead or backed-up recipient is a no-op.
    pub fn send_to(&self, conn: ConnId, pkt: &Packet) {
        let Ok(data) = pkt.encode() else { return };
        self.deliver(conn, data);
    }

    /// Deliver to every current member of `room`.
    pub fn to_room(&self, registry: &RoomRegistry, room: &str, pkt: &Packet) {
        let Ok(data) = pkt.encode() else { return };
        for conn in registry.members(room) {
            self.deliver(conn, data.clone());
        }
    }

    /// Deliver to every current member of `room` except `excluded`.
    pub fn to_room_except(
        &self,
        registry: &RoomRegistry,
        room: &str,
        excluded: ConnId,
        pkt: &Packet,
    ) {
        let Ok(data) = pkt.encode() else { return };
        for conn in registry.members(room) {
            if conn != excluded {
                self.deliver(conn, data.clone());
            }
        }
    }

    /// Deliver to every live connection, joined or not.
    pub fn to_all(&self, pkt: &Packet) {
        let Ok(data) = pkt.encode() else { return };
        for (conn, tx) in &self.senders {
            if tx.try_send(data.clone()).is_err() {
                debug!(%conn, "dropping packet for unreachable connection");
            }
        }
    }

    fn deliver(&self, conn: ConnId, data: Vec<u8>) {
        match self.senders.get(&conn) {
            Some(tx) => {
                if tx.try_send(data).is_err() {
                    debug!(%conn, "dropping packet for unreachable connection");
                }
            }
            None => debug!(%conn, "recipient already unregistered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EventType, MessagePayload};

    fn packet() -> Packet {
        Packet::new(EventType::Message, MessagePayload::system("x")).unwrap()
    }

    #[test]
    fn except_excludes_only_the_one_connection() {
        let mut registry = RoomRegistry::new();
        let mut router = Router::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        registry.join(ConnId(1), "lobby", "alice");
        registry.join(ConnId(2), "lobby", "bob");
        router.register(ConnId(1), tx_a);
        router.register(ConnId(2), tx_b);

        router.to_room_except(&registry, "lobby", ConnId(1), &packet());

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn dead_recipient_does_not_stop_the_broadcast() {
        let mut registry = RoomRegistry::new();
        let mut router = Router::new();
        let (tx_a, rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        registry.join(ConnId(1), "lobby", "alice");
        registry.join(ConnId(2), "lobby", "bob");
        router.register(ConnId(1), tx_a);
        router.register(ConnId(2), tx_b);
        drop(rx_a); // alice's write pump is gone

        router.to_room(&registry, "lobby", &packet());

        assert!(rx_b.try_recv().is_ok());
    }
}
