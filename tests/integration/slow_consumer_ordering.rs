// S3 — slow consumer: per-subscriber FIFO order holds, the slow subscriber
// is paced by its own acks, and the fast one is not held back.

use mq_client::{EventHandler, Message, MqClient, NoopEvents};
use mq_test_utils::TestBroker;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

const HANDLER_DELAY: Duration = Duration::from_millis(200);

struct TimedCollector {
    tx: mpsc::UnboundedSender<(Message, Instant)>,
    delay: Duration,
}

impl EventHandler for TimedCollector {
    fn message_received(&self, message: &Message) {
        // Blocking the handler delays the delivery ack, which is exactly the
        // pacing mechanism under test.
        std::thread::sleep(self.delay);
        let _ = self.tx.send((message.clone(), Instant::now()));
    }
}

fn timed_collector(
    delay: Duration,
) -> (Arc<TimedCollector>, mpsc::UnboundedReceiver<(Message, Instant)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(TimedCollector { tx, delay }), rx)
}

async fn collect_n(
    rx: &mut mpsc::UnboundedReceiver<(Message, Instant)>,
    n: usize,
) -> Vec<(Message, Instant)> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let item = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out collecting deliveries")
            .expect("collector closed");
        out.push(item);
    }
    out
}

#[tokio::test]
async fn slow_subscriber_gets_fifo_one_at_a_time() {
    let broker = TestBroker::start().await;

    let (slow_events, mut slow_rx) = timed_collector(HANDLER_DELAY);
    let (fast_events, mut fast_rx) = timed_collector(Duration::ZERO);
    let slow = MqClient::connect(broker.addr_string(), slow_events)
        .await
        .unwrap();
    let fast = MqClient::connect(broker.addr_string(), fast_events)
        .await
        .unwrap();
    slow.subscribe("t1").await.unwrap();
    fast.subscribe("t1").await.unwrap();
    // Let both subscriptions land before the burst so every item fans out to
    // the same pair.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let publisher = MqClient::connect(broker.addr_string(), Arc::new(NoopEvents))
        .await
        .unwrap();
    let mut sent_ids = Vec::new();
    for i in 0..3 {
        let m = publisher
            .enqueue("t1", "", &format!("m{i}"), 0)
            .await
            .unwrap();
        sent_ids.push(m.message_id);
    }

    let slow_got = collect_n(&mut slow_rx, 3).await;
    let fast_got = collect_n(&mut fast_rx, 3).await;

    // FIFO per subscriber, for both of them.
    let slow_ids: Vec<_> = slow_got.iter().map(|(m, _)| m.message_id).collect();
    let fast_ids: Vec<_> = fast_got.iter().map(|(m, _)| m.message_id).collect();
    assert_eq!(slow_ids, sent_ids);
    assert_eq!(fast_ids, sent_ids);

    // One inflight at a time: each delivery to the slow subscriber waits for
    // the previous handler (and therefore its ack) to finish first.
    for pair in slow_got.windows(2) {
        let gap = pair[1].1.duration_since(pair[0].1);
        assert!(
            gap >= HANDLER_DELAY,
            "deliveries {gap:?} apart; pacing by ack is broken"
        );
    }

    // The fast subscriber is not held back by the slow one.
    let fast_done = fast_got.last().unwrap().1;
    let slow_done = slow_got.last().unwrap().1;
    assert!(fast_done < slow_done, "fast subscriber was throttled");
}

#[tokio::test]
async fn no_duplicates_under_slow_acks() {
    let broker = TestBroker::start().await;

    let (slow_events, mut slow_rx) = timed_collector(Duration::from_millis(50));
    let slow = MqClient::connect(broker.addr_string(), slow_events)
        .await
        .unwrap();
    slow.subscribe("t1").await.unwrap();

    let publisher = MqClient::connect(broker.addr_string(), Arc::new(NoopEvents))
        .await
        .unwrap();
    for i in 0..5 {
        publisher
            .enqueue("t1", "", &format!("m{i}"), 0)
            .await
            .unwrap();
    }

    let got = collect_n(&mut slow_rx, 5).await;
    let mut ids: Vec<_> = got.iter().map(|(m, _)| m.message_id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5, "duplicate delivery observed");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(slow_rx.try_recv().is_err(), "extra delivery after the batch");
}
