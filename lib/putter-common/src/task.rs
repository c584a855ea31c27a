//! Helpers for working with asynchronous tasks.

use std::future::Future;

use tokio::task::{AbortHandle, JoinSet};
use tracing::Instrument as _;

/// Helper trait for traced spawning onto a [`JoinSet`].
pub trait JoinSetExt<T> {
    /// Spawns a new named asynchronous task, returning an [`AbortHandle`] for it.
    ///
    /// The task runs inside a child span of the current span carrying `task_name`.
    fn spawn_traced_named<S, F>(&mut self, name: S, f: F) -> AbortHandle
    where
        S: Into<String>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static;
}

impl<T> JoinSetExt<T> for JoinSet<T> {
    fn spawn_traced_named<S, F>(&mut self, name: S, f: F) -> AbortHandle
    where
        S: Into<String>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();
        self.spawn(f.instrument(tracing::debug_span!("task", task_name = %name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_set_spawns_run_to_completion() {
        let mut tasks = JoinSet::new();
        for i in 0..4u32 {
            tasks.spawn_traced_named(format!("worker-{}", i), async move { i * 2 });
        }

        let mut results = tasks.join_all().await;
        results.sort_unstable();
        assert_eq!(results, vec![0, 2, 4, 6]);
    }
}
