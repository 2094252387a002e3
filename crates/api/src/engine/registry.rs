use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Tracks running jobs so they can be cancelled individually or all at
/// once on shutdown.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
pub struct JobRegistry {
    /// Cancellation token of each running job, by prompt id.
    jobs: RwLock<HashMap<String, CancellationToken>>,
    root: CancellationToken,
    tasks: TaskTracker,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            root: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Register a job and spawn its task.
    ///
    /// `run` receives the job's cancellation token. The entry is removed
    /// by the caller through [`remove`](Self::remove) when the task ends.
    pub async fn spawn<F, Fut>(&self, prompt_id: &str, run: F) -> CancellationToken
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.root.child_token();
        self.jobs
            .write()
            .await
            .insert(prompt_id.to_string(), cancel.clone());
        self.tasks.spawn(run(cancel.clone()));
        cancel
    }

    /// Cancel a running job. Returns `false` if the job is not running.
    pub async fn cancel(&self, prompt_id: &str) -> bool {
        match self.jobs.read().await.get(prompt_id) {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, prompt_id: &str) {
        self.jobs.write().await.remove(prompt_id);
    }

    /// Whether a task for `prompt_id` is running in this process.
    pub async fn contains(&self, prompt_id: &str) -> bool {
        self.jobs.read().await.contains_key(prompt_id)
    }

    /// Return the number of running jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Cancel every job and wait up to `grace` for their tasks to finish.
    pub async fn shutdown(&self, grace: Duration) {
        let running = self.len().await;
        tracing::info!(running, "Cancelling running jobs");
        self.root.cancel();
        self.tasks.close();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            tracing::warn!("Jobs did not finish within the shutdown grace period");
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn cancel_reaches_running_task() {
        let registry = Arc::new(JobRegistry::new());
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let reg = Arc::clone(&registry);
        registry
            .spawn("p1", move |cancel| async move {
                cancel.cancelled().await;
                reg.remove("p1").await;
                let _ = done_tx.send(());
            })
            .await;

        assert!(registry.contains("p1").await);
        assert!(registry.cancel("p1").await);
        done_rx.await.unwrap();
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn cancel_unknown_job_returns_false() {
        let registry = JobRegistry::new();
        assert!(!registry.cancel("missing").await);
    }

    #[tokio::test]
    async fn shutdown_cancels_all_jobs() {
        let registry = JobRegistry::new();
        let first = registry
            .spawn("p1", |cancel| async move { cancel.cancelled().await })
            .await;
        let second = registry
            .spawn("p2", |cancel| async move { cancel.cancelled().await })
            .await;
        assert_eq!(registry.len().await, 2);

        registry.shutdown(Duration::from_secs(1)).await;
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
    }
}
