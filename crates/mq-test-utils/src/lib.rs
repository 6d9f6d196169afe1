// mq-test-utils: Shared test utilities for the broker suite.
//
// Provides an in-process broker on an ephemeral port and a hand-driven
// framed connection for protocol-level fault injection.

pub mod raw_connection;
pub mod test_broker;

pub use raw_connection::RawConnection;
pub use test_broker::TestBroker;
