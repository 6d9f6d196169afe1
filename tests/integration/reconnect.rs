// S5 — reconnect: after the broker goes away and comes back on the same
// address, the client reconnects within a tick and its subscriptions are
// replayed without caller involvement.

use broker::BrokerConfig;
use mq_client::{ClientConfig, EventHandler, Message, MqClient, NoopEvents};
use mq_test_utils::TestBroker;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

#[derive(Default)]
struct LifecycleCollector {
    connected: AtomicU64,
    disconnected: AtomicU64,
    messages: std::sync::Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl EventHandler for LifecycleCollector {
    fn connected(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnected(&self) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }

    fn message_received(&self, message: &Message) {
        if let Some(tx) = self.messages.lock().unwrap().as_ref() {
            let _ = tx.send(message.clone());
        }
    }
}

async fn wait_for(limit: Duration, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn fast_reconnect_config() -> ClientConfig {
    ClientConfig {
        reconnect_interval_ms: 100,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn client_reconnects_and_replays_subscriptions() {
    let broker = TestBroker::start().await;
    let addr = broker.addr();

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    let events = Arc::new(LifecycleCollector::default());
    *events.messages.lock().unwrap() = Some(msg_tx);

    let client = MqClient::connect_with_config(
        addr.to_string(),
        fast_reconnect_config(),
        events.clone(),
    )
    .await
    .unwrap();
    client.subscribe("x").await.unwrap();
    assert_eq!(events.connected.load(Ordering::SeqCst), 1);

    // Sever: stop the broker, which ends every live session.
    broker.stop();
    wait_for(Duration::from_secs(5), || {
        events.disconnected.load(Ordering::SeqCst) == 1
    })
    .await;

    // Bring a broker back on the same address; queue state starts empty but
    // the client replays its subscription on its own.
    let _broker2 = TestBroker::start_with_config(BrokerConfig {
        bind: addr.to_string(),
        ..BrokerConfig::default()
    })
    .await;
    wait_for(Duration::from_secs(5), || {
        events.connected.load(Ordering::SeqCst) == 2
    })
    .await;

    let publisher = MqClient::connect(addr.to_string(), Arc::new(NoopEvents))
        .await
        .unwrap();
    publisher.enqueue("x", "", "after-restart", 0).await.unwrap();

    let got = timeout(Duration::from_secs(5), msg_rx.recv())
        .await
        .expect("replayed subscription did not deliver")
        .expect("collector closed");
    assert_eq!(got.body, "after-restart");

    assert_eq!(events.connected.load(Ordering::SeqCst), 2);
    assert_eq!(events.disconnected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn supervisor_keeps_retrying_until_the_broker_returns() {
    let broker = TestBroker::start().await;
    let addr = broker.addr();

    let events = Arc::new(LifecycleCollector::default());
    let _client = MqClient::connect_with_config(
        addr.to_string(),
        fast_reconnect_config(),
        events.clone(),
    )
    .await
    .unwrap();

    broker.stop();
    wait_for(Duration::from_secs(5), || {
        events.disconnected.load(Ordering::SeqCst) == 1
    })
    .await;

    // Leave the broker down across several reconnect ticks.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(events.connected.load(Ordering::SeqCst), 1);

    let _broker2 = TestBroker::start_with_config(BrokerConfig {
        bind: addr.to_string(),
        ..BrokerConfig::default()
    })
    .await;
    wait_for(Duration::from_secs(5), || {
        events.connected.load(Ordering::SeqCst) == 2
    })
    .await;
}
