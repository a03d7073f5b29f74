//! Shared helpers for integration tests.
#![allow(dead_code)]

pub mod client;
pub mod server;

pub use client::TestClient;
pub use server::TestServer;

use std::future::Future;
use std::time::Duration;

/// Poll `cond` until it returns true or the deadline elapses.
pub async fn wait_for<F, Fut>(mut cond: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
