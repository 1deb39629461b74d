//! Platform-specific functionality.
//!
//! Everything here runs on a single thread: tasks are spawned into the
//! current [`LocalSet`], and all the timers are [`tokio::time`] ones, so
//! they may be paused and advanced in tests.
//!
//! [`LocalSet`]: tokio::task::LocalSet

use std::{future::Future, time::Duration};

pub use tokio::time::Instant;

/// Runs a Rust [`Future`] on the current thread.
///
/// # Panics
///
/// If called outside of a [`LocalSet`](tokio::task::LocalSet) context.
pub fn spawn<F>(task: F)
where
    F: Future<Output = ()> + 'static,
{
    drop(tokio::task::spawn_local(task));
}

/// [`Future`] which resolves after the provided [`Duration`].
pub async fn delay_for(delay: Duration) {
    tokio::time::sleep(delay).await;
}
