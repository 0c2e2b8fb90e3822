//! Integration test helpers for wagate flows.
//!
//! The harness replaces the protocol backend with an in-memory device store
//! and scripted connections that count every upstream call.

pub mod harness;

use std::time::Duration;

/// Poll `check` until it holds or `timeout` passes. Returns the last result.
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Initialize tracing for tests (only once per process).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("wagate=debug,wagate_server=debug,wagate_cron=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}
