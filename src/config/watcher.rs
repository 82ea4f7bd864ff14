//! Configuration file watcher for reload.
//!
//! A [`FileWatcher`] fires at most once: it polls the file, and on the first
//! change it runs the callback and returns. Callers that want to keep
//! watching call `watch` again after reloading.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::BoxError;

/// Why a call to [`FileWatcher::watch`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The contents changed and the callback ran.
    Changed,
    /// The file disappeared; the callback did not run.
    Removed,
    /// The token was cancelled first; the callback did not run.
    Cancelled,
    /// The file could not be read when watching started.
    Unreadable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
    digest: String,
}

impl Fingerprint {
    async fn take(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let contents = tokio::fs::read(path).await?;
        Ok(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
            digest: hex::encode(Sha256::digest(&contents)),
        })
    }
}

/// Polls one file for a single change.
#[derive(Debug, Clone)]
pub struct FileWatcher {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the file changes, disappears, or `cancel` fires.
    ///
    /// `callback` runs only on a change. Its error is logged and dropped.
    pub async fn watch<F>(&self, cancel: CancellationToken, callback: F) -> WatchOutcome
    where
        F: FnOnce() -> Result<(), BoxError>,
    {
        let initial = match Fingerprint::take(&self.path).await {
            Ok(fp) => fp,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Cannot read watched file");
                return WatchOutcome::Unreadable;
            }
        };
        tracing::debug!(path = %self.path.display(), digest = %initial.digest, "Watching file");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return WatchOutcome::Cancelled,
                _ = ticker.tick() => {}
            }

            let current = match Fingerprint::take(&self.path).await {
                Ok(fp) => fp,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::info!(path = %self.path.display(), "Watched file removed");
                    return WatchOutcome::Removed;
                }
                Err(e) => {
                    tracing::debug!(path = %self.path.display(), error = %e, "Watched file unreadable, retrying");
                    continue;
                }
            };

            if current != initial {
                tracing::info!(path = %self.path.display(), "Watched file changed");
                if let Err(e) = callback() {
                    tracing::warn!(path = %self.path.display(), error = %e, "Change callback failed");
                }
                return WatchOutcome::Changed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast(path: &Path) -> FileWatcher {
        FileWatcher::new(path).poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_edit_fires_callback_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(&path, "a = 1").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let watcher = fast(&path);
        let task = tokio::spawn(async move {
            watcher
                .watch(CancellationToken::new(), move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        std::fs::write(&path, "a = 22").unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(outcome, WatchOutcome::Changed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_same_length_edit_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(&path, "a = 1").unwrap();

        let watcher = fast(&path);
        let task = tokio::spawn(async move { watcher.watch(CancellationToken::new(), || Ok(())).await });

        tokio::time::sleep(Duration::from_millis(60)).await;
        std::fs::write(&path, "a = 2").unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(outcome, WatchOutcome::Changed);
    }

    #[tokio::test]
    async fn test_unreadable_at_start_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = fast(&dir.path().join("missing.toml"))
            .watch(CancellationToken::new(), || panic!("callback must not run"))
            .await;
        assert_eq!(outcome, WatchOutcome::Unreadable);
    }

    #[tokio::test]
    async fn test_cancel_before_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(&path, "a = 1").unwrap();

        let cancel = CancellationToken::new();
        let watcher = fast(&path);
        let token = cancel.clone();
        let task = tokio::spawn(async move { watcher.watch(token, || panic!("callback must not run")).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(outcome, WatchOutcome::Cancelled);
    }
}
