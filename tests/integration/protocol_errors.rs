// S6 — protocol faults: each fault ends exactly the faulty session and
// leaves every other peer undisturbed.

use mq_client::{EventHandler, Message, MqClient, NoopEvents};
use mq_protocol::{Command, Message as WireMessage};
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

/// The healthy session must keep working after the rogue one dies.
async fn assert_broker_still_serves(broker: &TestBroker) {
    let (events, mut rx) = collector();
    let subscriber = MqClient::connect(broker.addr_string(), events).await.unwrap();
    subscriber.subscribe("healthy").await.unwrap();

    let publisher = MqClient::connect(broker.addr_string(), Arc::new(NoopEvents))
        .await
        .unwrap();
    publisher.enqueue("healthy", "", "still-up", 0).await.unwrap();

    let got = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("broker stopped serving healthy sessions")
        .expect("collector closed");
    assert_eq!(got.body, "still-up");
}

#[tokio::test]
async fn unknown_command_kind_closes_only_that_session() {
    let broker = TestBroker::start().await;

    let mut rogue = RawConnection::connect(broker.addr()).await;
    let peer_id = Uuid::new_v4();
    rogue.hello(peer_id).await;
    rogue.send_kind_byte(255, peer_id).await;
    rogue.expect_closed().await;

    assert_broker_still_serves(&broker).await;
}

#[tokio::test]
async fn crc_mismatch_closes_the_session() {
    let broker = TestBroker::start().await;

    let mut rogue = RawConnection::connect(broker.addr()).await;
    let peer_id = Uuid::new_v4();
    rogue.hello(peer_id).await;
    rogue.send_corrupt_crc(peer_id).await;
    rogue.expect_closed().await;

    assert_broker_still_serves(&broker).await;
}

#[tokio::test]
async fn oversize_frame_closes_the_session() {
    let broker = TestBroker::start().await;

    let mut rogue = RawConnection::connect(broker.addr()).await;
    let peer_id = Uuid::new_v4();
    rogue.hello(peer_id).await;
    rogue.send_oversize_header(u32::MAX).await;
    rogue.expect_closed().await;

    assert_broker_still_serves(&broker).await;
}

#[tokio::test]
async fn enqueue_with_empty_queue_name_closes_the_session() {
    let broker = TestBroker::start().await;

    let mut rogue = RawConnection::connect(broker.addr()).await;
    let peer_id = Uuid::new_v4();
    rogue.hello(peer_id).await;
    let message = WireMessage::notification(peer_id, "", "", "nowhere", 0);
    rogue.send(Command::enqueue(message)).await;
    rogue.expect_closed().await;

    assert_broker_still_serves(&broker).await;
}

#[tokio::test]
async fn first_frame_must_be_hello() {
    let broker = TestBroker::start().await;

    let mut rogue = RawConnection::connect(broker.addr()).await;
    rogue
        .send(Command::subscribe(Uuid::new_v4(), "too-eager"))
        .await;
    rogue.expect_closed().await;

    assert_broker_still_serves(&broker).await;
}
