// S2 — query/reply: the reply is correlated to the query and routed to the
// originator only.

use mq_client::{EventHandler, Message, MqClient, NoopEvents, QueryReply};
use mq_test_utils::TestBroker;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

/// Answers "ping" with "pong"; counts stray replies it observes.
#[derive(Default)]
struct Responder {
    replies_seen: AtomicU64,
}

impl EventHandler for Responder {
    fn query_received(&self, query: &Message) -> Option<QueryReply> {
        (query.body == "ping").then(|| QueryReply::new("", "pong"))
    }

    fn query_reply_received(&self, _reply: &Message, _has_open_query: bool) {
        self.replies_seen.fetch_add(1, Ordering::SeqCst);
    }
}

/// Subscribes but never answers; counts queries and replies it observes.
#[derive(Default)]
struct Bystander {
    queries_seen: AtomicU64,
    replies_seen: AtomicU64,
}

impl EventHandler for Bystander {
    fn query_received(&self, _query: &Message) -> Option<QueryReply> {
        self.queries_seen.fetch_add(1, Ordering::SeqCst);
        None
    }

    fn query_reply_received(&self, _reply: &Message, _has_open_query: bool) {
        self.replies_seen.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn reply_reaches_the_originator_with_correlation() {
    let broker = TestBroker::start().await;

    let responder = Arc::new(Responder::default());
    let b = MqClient::connect(broker.addr_string(), responder.clone())
        .await
        .unwrap();
    b.subscribe("rpc").await.unwrap();

    let a = MqClient::connect(broker.addr_string(), Arc::new(NoopEvents))
        .await
        .unwrap();
    let reply = a
        .query_with_timeout("rpc", "", "ping", Duration::from_secs(5))
        .await
        .unwrap()
        .expect("query timed out");

    assert_eq!(reply.body, "pong");
    assert!(reply.is_reply);
    assert!(reply.in_reply_to.is_some());
    assert_eq!(reply.queue_name, "rpc");
}

#[tokio::test]
async fn no_other_subscriber_receives_the_reply() {
    let broker = TestBroker::start().await;

    let responder = Arc::new(Responder::default());
    let bystander = Arc::new(Bystander::default());
    let b = MqClient::connect(broker.addr_string(), responder.clone())
        .await
        .unwrap();
    let d = MqClient::connect(broker.addr_string(), bystander.clone())
        .await
        .unwrap();
    b.subscribe("rpc").await.unwrap();
    d.subscribe("rpc").await.unwrap();
    // Let both subscriptions land before the query's fan-out snapshot.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let a = MqClient::connect(broker.addr_string(), Arc::new(NoopEvents))
        .await
        .unwrap();
    let reply = a
        .query_with_timeout("rpc", "", "ping", Duration::from_secs(5))
        .await
        .unwrap()
        .expect("query timed out");
    assert_eq!(reply.body, "pong");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        bystander.queries_seen.load(Ordering::SeqCst) >= 1,
        "the query itself fans out to every subscriber"
    );
    assert_eq!(
        bystander.replies_seen.load(Ordering::SeqCst),
        0,
        "the reply must go to the originator only"
    );
    assert_eq!(responder.replies_seen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unanswered_query_returns_none_at_the_timeout() {
    let broker = TestBroker::start().await;

    let a = MqClient::connect(broker.addr_string(), Arc::new(NoopEvents))
        .await
        .unwrap();
    // Nobody subscribes to this queue; the query can never be answered.
    let reply = a
        .query_with_timeout("void", "", "anyone?", Duration::from_millis(300))
        .await
        .unwrap();
    assert!(reply.is_none());
}
