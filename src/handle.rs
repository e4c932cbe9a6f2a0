use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Stop capability for a running watcher.
///
/// Stopping is idempotent and takes effect promptly: no callback starts after [`stop`] returns,
/// and a pending sleep or subscription wait is interrupted. Dropping the handle stops the watcher.
///
/// [`stop`]: WatchHandle::stop
#[must_use = "dropping a WatchHandle stops the watcher"]
#[derive(Debug)]
pub struct WatchHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub(crate) fn new(token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { token, task: Some(task) }
    }

    /// Stops the watcher. Calling it again has no effect.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            debug!("Stopping watcher");
        }
        self.token.cancel();
    }

    /// Returns `true` once [`WatchHandle::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops the watcher and waits for its task to finish.
    ///
    /// A callback that was already running when the watcher was stopped completes first.
    pub async fn join(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(error = %e, "Watcher task panicked");
                }
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use super::*;

    fn spawn_watcher() -> (WatchHandle, Arc<AtomicBool>) {
        let token = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn({
            let token = token.clone();
            let finished = finished.clone();
            async move {
                token.cancelled().await;
                finished.store(true, Ordering::SeqCst);
            }
        });
        (WatchHandle::new(token, task), finished)
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (handle, finished) = spawn_watcher();

        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());

        handle.join().await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drop_stops_the_task() {
        let (handle, finished) = spawn_watcher();

        drop(handle);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(finished.load(Ordering::SeqCst));
    }
}
