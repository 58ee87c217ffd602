//! Joins racing through a live hub task must each produce exactly one
//! welcome, and the final membership view must reflect every joiner.

use std::time::Duration;

use roomchat::protocol::{EventType, MessagePayload, Packet, RoomUsersPayload, SYSTEM_NAME};
use roomchat::registry::ConnId;
use roomchat::server::hub::{run_hub, HubCommand};
use tokio::sync::mpsc;
use tokio::time::timeout;

const N: u64 = 16;

fn parse(data: Vec<u8>) -> Packet {
    let line = String::from_utf8(data).expect("utf8 wire data");
    serde_json::from_str(line.trim_end()).expect("valid packet")
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_joins_yield_one_welcome_each_and_a_consistent_view() {
    let (hub_tx, hub_rx) = mpsc::channel(256);
    tokio::spawn(run_hub(hub_rx));

    let mut receivers = Vec::new();
    for i in 0..N {
        let (tx, rx) = mpsc::channel(1024);
        hub_tx
            .send(HubCommand::Register {
                conn: ConnId(i),
                tx,
            })
            .await
            .unwrap();
        receivers.push(rx);
    }

    // Race all joins from independent tasks.
    let mut handles = Vec::new();
    for i in 0..N {
        let hub_tx = hub_tx.clone();
        handles.push(tokio::spawn(async move {
            hub_tx
                .send(HubCommand::Join {
                    conn: ConnId(i),
                    username: format!("user{i}"),
                    room: "lobby".into(),
                })
                .await
                .unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    // Every member eventually sees the view with all N names; each sequence
    // ends there because no further commands are sent.
    for (i, rx) in receivers.iter_mut().enumerate() {
        let mut welcomes = 0;
        let mut final_view: Option<RoomUsersPayload> = None;

        loop {
            let data = timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap_or_else(|_| panic!("receiver {i} timed out before full view"))
                .expect("hub dropped a live connection's sender");
            let pkt = parse(data);
            match pkt.event {
                EventType::Message => {
                    let msg: MessagePayload = serde_json::from_value(pkt.payload).unwrap();
                    assert_eq!(msg.username, SYSTEM_NAME);
                    if msg.text.starts_with("Welcome to") {
                        welcomes += 1;
                    }
                }
                EventType::RoomUsers => {
                    let view: RoomUsersPayload = serde_json::from_value(pkt.payload).unwrap();
                    if view.count == N as usize {
                        final_view = Some(view);
                        break;
                    }
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert_eq!(welcomes, 1, "receiver {i} got {welcomes} welcomes");

        let view = final_view.unwrap();
        let mut users = view.users.clone();
        users.sort();
        let mut expected: Vec<String> = (0..N).map(|i| format!("user{i}")).collect();
        expected.sort();
        assert_eq!(users, expected, "receiver {i} saw a torn membership view");

        // Nothing may follow the full view.
        assert!(rx.try_recv().is_err(), "receiver {i} got packets after the full view");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn interleaved_joins_and_leaves_keep_the_count_consistent() {
    let (hub_tx, hub_rx) = mpsc::channel(256);
    tokio::spawn(run_hub(hub_rx));

    // One stable observer plus N churning members.
    let (obs_tx, mut obs_rx) = mpsc::channel(4096);
    hub_tx
        .send(HubCommand::Register {
            conn: ConnId(1000),
            tx: obs_tx,
        })
        .await
        .unwrap();
    hub_tx
        .send(HubCommand::Join {
            conn: ConnId(1000),
            username: "observer".into(),
            room: "lobby".into(),
        })
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..N {
        let hub_tx = hub_tx.clone();
        handles.push(tokio::spawn(async move {
            let (tx, _rx) = mpsc::channel(1024);
            hub_tx
                .send(HubCommand::Register { conn: ConnId(i), tx })
                .await
                .unwrap();
            hub_tx
                .send(HubCommand::Join {
                    conn: ConnId(i),
                    username: format!("user{i}"),
                    room: "lobby".into(),
                })
                .await
                .unwrap();
            hub_tx.send(HubCommand::Disconnect { conn: ConnId(i) }).await.unwrap();
            // Double-disconnect from a racing cleanup path must stay silent.
            hub_tx.send(HubCommand::Disconnect { conn: ConnId(i) }).await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    // After all churn the observer is alone again. Views never go torn or
    // negative; each leave is reported at most once.
    let mut leaves = 0;
    let mut last_view = None;
    loop {
        let data = timeout(Duration::from_secs(5), obs_rx.recv())
            .await
            .expect("observer timed out")
            .expect("observer sender dropped");
        let pkt = parse(data);
        match pkt.event {
            EventType::Message => {
                let msg: MessagePayload = serde_json::from_value(pkt.payload).unwrap();
                if msg.text.ends_with("has left the chat") {
                    leaves += 1;
                }
            }
            EventType::RoomUsers => {
                let view: RoomUsersPayload = serde_json::from_value(pkt.payload).unwrap();
                assert_eq!(view.count, view.users.len(), "torn view");
                assert!(view.count >= 1, "observer missing from its own room");
                let done = view.count == 1 && leaves == N as usize;
                last_view = Some(view);
                if done {
                    break;
                }
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    assert_eq!(leaves, N as usize);
    assert_eq!(last_view.unwrap().users, vec!["observer"]);
}
