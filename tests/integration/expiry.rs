// S4 — expiry: an item whose lifetime lapses before any delivery attempt is
// never delivered.

use mq_client::{EventHandler, Message, MqClient};
use mq_protocol::Command;
use mq_test_utils::{RawConnection, TestBroker};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

struct Collector {
    messages: mpsc::UnboundedSender<Message>,
}

impl EventHandler for Collector {
    fn message_received(&self, message: &Message) {
        let _ = self.messages.send(message.clone());
    }
}

fn collector() -> (Arc<Collector>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Collector { messages: tx }), rx)
}

/// A notification whose expiry deadline already lapsed `lapsed_ms` ago.
fn backdated(peer_id: Uuid, queue: &str, body: &str, expire_seconds: u32, lapsed_ms: i64) -> Message {
    let mut message = Message::notification(peer_id, queue, "", body, expire_seconds);
    message.enqueued_at -= i64::from(expire_seconds) * 1000 + lapsed_ms;
    message
}

#[tokio::test]
async fn expired_item_is_not_delivered_to_a_late_subscriber() {
    let broker = TestBroker::start().await;

    // Publish an already-expired item while nobody subscribes.
    let mut publisher = RawConnection::connect(broker.addr()).await;
    let peer_id = Uuid::new_v4();
    publisher.hello(peer_id).await;
    let stale = backdated(peer_id, "t1", "stale", 1, 4_000);
    publisher.send(Command::enqueue(stale)).await;
    publisher.expect_command().await; // receipt ack

    // Subscribe afterwards, then publish a live item as the control probe.
    let (events, mut rx) = collector();
    let subscriber = MqClient::connect(broker.addr_string(), events).await.unwrap();
    subscriber.subscribe("t1").await.unwrap();

    let live = Message::notification(peer_id, "t1", "", "live", 0);
    publisher.send(Command::enqueue(live)).await;
    publisher.expect_command().await;

    let first = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no delivery at all")
        .expect("collector closed");
    assert_eq!(first.body, "live", "the expired item must be skipped");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(rx.try_recv().is_err(), "the stale item was delivered late");
}

#[tokio::test]
async fn unexpired_item_waits_for_its_first_subscriber() {
    let broker = TestBroker::start().await;

    let mut publisher = RawConnection::connect(broker.addr()).await;
    let peer_id = Uuid::new_v4();
    publisher.hello(peer_id).await;
    let durable = Message::notification(peer_id, "t1", "", "kept", 0);
    publisher.send(Command::enqueue(durable)).await;
    publisher.expect_command().await;

    let (events, mut rx) = collector();
    let subscriber = MqClient::connect(broker.addr_string(), events).await.unwrap();
    subscriber.subscribe("t1").await.unwrap();

    let got = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("parked item never delivered")
        .expect("collector closed");
    assert_eq!(got.body, "kept");
}
