//! Download progress reporting and its background observer task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Byte counters updated by a remote fetch while it runs.
#[derive(Debug, Default)]
pub struct FetchProgress {
    done: AtomicU64,
    total: AtomicU64,
}

impl FetchProgress {
    /// Creates an empty progress tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the expected total size in bytes.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    /// Adds `bytes` to the completed count.
    pub fn advance(&self, bytes: u64) {
        self.done.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Overwrites the completed count.
    pub fn set_done(&self, done: u64) {
        self.done.store(done, Ordering::Relaxed);
    }

    /// Bytes completed so far.
    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// Expected total bytes, zero if unknown.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Completion percentage in `0..=100`; zero while the total is unknown.
    pub fn percent(&self) -> u8 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        ((self.done().min(total) as u128 * 100) / total as u128) as u8
    }
}

/// Background task logging a fetch's progress at every 10% step.
///
/// Owners must call [`ProgressObserver::stop`], which cancels the task and
/// waits for it to finish. Dropping the observer aborts the task as well.
#[derive(Debug)]
pub struct ProgressObserver {
    handle: Option<JoinHandle<()>>,
    observations: Arc<AtomicU64>,
}

impl ProgressObserver {
    /// Spawns an observer for `progress`, polling every `interval`.
    pub fn spawn(label: impl Into<String>, progress: Arc<FetchProgress>, interval: Duration) -> Self {
        let label = label.into();
        let observations = Arc::new(AtomicU64::new(0));
        let counter = observations.clone();
        let handle = tokio::spawn(async move {
            let mut last_logged: Option<u8> = None;
            loop {
                counter.fetch_add(1, Ordering::Relaxed);
                let percent = progress.percent();
                if percent % 10 == 0 && last_logged != Some(percent) {
                    info!(file = %label, percent, "download progress");
                    last_logged = Some(percent);
                }
                if percent >= 100 {
                    debug!(file = %label, "download complete");
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });
        Self {
            handle: Some(handle),
            observations,
        }
    }

    /// Number of times the task has sampled progress.
    pub fn observations(&self) -> u64 {
        self.observations.load(Ordering::Relaxed)
    }

    /// Cancels the task and waits until it has fully stopped.
    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => debug!(error = %e, "progress observer ended abnormally"),
            }
        }
    }
}

impl Drop for ProgressObserver {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        let p = FetchProgress::new();
        assert_eq!(p.percent(), 0);
        p.set_total(200);
        p.advance(50);
        assert_eq!(p.percent(), 25);
        p.set_done(500);
        assert_eq!(p.percent(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_observation() {
        let progress = Arc::new(FetchProgress::new());
        progress.set_total(100);
        let observer = ProgressObserver::spawn("dump.zst", progress.clone(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let seen = observer.observations();
        assert!(seen >= 3);

        let counter = observer.observations.clone();
        observer.stop().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::Relaxed), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_exits_at_completion() {
        let progress = Arc::new(FetchProgress::new());
        progress.set_total(10);
        progress.set_done(10);
        let observer = ProgressObserver::spawn("done.zst", progress, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(observer.observations(), 1);
        observer.stop().await;
    }
}
