//! Shared helpers for integration tests

#![allow(dead_code)]

use byteweave::Session;

/// Route `tracing` output through the test harness. Safe to call from every
/// test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn session(content: &str) -> Session {
    init_tracing();
    Session::from_bytes(content.as_bytes())
}

/// Whole logical content as a string
pub fn text(session: &Session) -> String {
    String::from_utf8(session.read_all().unwrap()).unwrap()
}
