use broker::{Broker, BrokerConfig};
use std::net::SocketAddr;

/// An in-process broker for integration testing.
///
/// Binds to port 0 (random) and exposes the actual bound address, so each
/// test can spin up its own isolated instance.  Dropping the handle aborts
/// the accept loop, which also drops the broker's shutdown channel and ends
/// every live session — tests use this to sever connections.
pub struct TestBroker {
    addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl TestBroker {
    /// Start a broker on an ephemeral local port with default tuning.
    pub async fn start() -> TestBroker {
        TestBroker::start_with_config(local_config()).await
    }

    /// Start a broker with explicit tuning.  Set `config.bind` to a fixed
    /// address to restart a broker on the same port (reconnect scenarios).
    pub async fn start_with_config(config: BrokerConfig) -> TestBroker {
        let broker = Broker::bind(config).await.expect("bind test broker");
        let addr = broker.local_addr().expect("local_addr after bind");
        let task = tokio::spawn(broker.run());
        TestBroker { addr, task }
    }

    /// The address the broker is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn addr_string(&self) -> String {
        self.addr.to_string()
    }

    /// Stop the broker, severing every live session.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Ephemeral-port config for tests.
pub fn local_config() -> BrokerConfig {
    BrokerConfig {
        bind: "127.0.0.1:0".to_owned(),
        ..BrokerConfig::default()
    }
}
