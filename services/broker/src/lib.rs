//! In-memory message broker service.
//!
//! The broker accepts framed TCP sessions, holds named FIFO queues in
//! volatile memory, fans notifications out to subscribers, and correlates
//! query/reply pairs.  Nothing survives a restart.

pub mod config;
pub mod queue;
pub mod registry;
pub mod session;

pub use config::{load_config_from_path, load_config_from_str, BrokerConfig, ConfigError};
pub use registry::BrokerState;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// A bound broker, ready to accept peers.
///
/// Dropping the `Broker` (or the future returned by [`Broker::run`]) drops
/// the shutdown sender, which ends every live session.
pub struct Broker {
    listener: TcpListener,
    state: Arc<BrokerState>,
    shutdown_tx: watch::Sender<bool>,
}

impl Broker {
    /// Bind the configured listen address.  Use a port of 0 to let the OS
    /// choose (the bound address is available via [`Broker::local_addr`]).
    pub async fn bind(config: BrokerConfig) -> std::io::Result<Broker> {
        let listener = TcpListener::bind(&config.bind).await?;
        info!(addr = %listener.local_addr()?, "broker listening");
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Broker {
            listener,
            state: Arc::new(BrokerState::new(config)),
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept peers until the listener fails.  Each session runs in its own
    /// task; a failed accept is logged and does not stop the loop.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&self.state);
                    let shutdown = self.shutdown_tx.subscribe();
                    tokio::spawn(session::run_session(stream, addr, state, shutdown));
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                }
            }
        }
    }
}
