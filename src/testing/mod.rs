//! Testing utilities for the coordination crate.
//!
//! Provides a recording [`mock::MockManager`] for driving a single state
//! in isolation, an in-memory bus plus cluster fixture for end-to-end
//! scenarios ([`harness`]), and a polling helper for asynchronous
//! assertions.

pub mod harness;
pub mod mock;


use std::time::Duration;

/// Poll a predicate until it holds or the timeout expires.
pub async fn wait_for(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let started = tokio::time::Instant::now();
    while started.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}
