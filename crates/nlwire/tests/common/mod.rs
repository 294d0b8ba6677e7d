//! Common helpers for live-kernel integration tests.

use nlwire::{Config, Conn, Protocol};

/// Dial a route-protocol connection, or `None` when the environment cannot
/// create netlink sockets at all.
pub fn route_conn() -> Option<Conn> {
    route_conn_with(Config::default())
}

/// Dial a route-protocol connection with explicit configuration.
pub fn route_conn_with(config: Config) -> Option<Conn> {
    init_tracing();

    match Conn::dial(Protocol::Route, config) {
        Ok(conn) => Some(conn),
        Err(e) => {
            eprintln!("skipping: cannot dial netlink: {}", e);
            None
        }
    }
}

/// Route crate logs to the test harness for `--nocapture` runs.
fn init_tracing() {
    use std::sync::Once;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Skip the current test when netlink is unavailable.
macro_rules! require_netlink {
    () => {
        match crate::common::route_conn() {
            Some(conn) => conn,
            None => return,
        }
    };
    ($config:expr) => {
        match crate::common::route_conn_with($config) {
            Some(conn) => conn,
            None => return,
        }
    };
}
