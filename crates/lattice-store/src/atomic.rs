//! Atomic, per-path serialized file writes.
//!
//! Each write runs: ensure parent dir → back up the current file → write a
//! uniquely named temp sibling (retried with exponential backoff) → read it
//! back and compare → rename onto the target. The rename is the only step
//! that touches the target path, so a failed write never leaves a partial
//! file behind.
//!
//! Writes to the same path are strictly FIFO: every path has its own
//! `tokio::sync::Mutex`, which grants the lock in request order. Writes to
//! different paths interleave freely.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as PathLock, Notify, OwnedMutexGuard};

use lattice_core::config::VaultConfig;
use lattice_core::error::{LatticeError, Result};

use crate::backup::BackupManager;

/// Retry schedule for the temp-file write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &VaultConfig) -> Self {
        Self {
            max_retries: config.write_retries,
            base_delay: config.retry_base_delay(),
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.min(16))
    }
}

/// Run `op` until it succeeds or the policy's retries are used up.
///
/// # Errors
///
/// Returns [`LatticeError::RetriesExhausted`] carrying the last I/O error.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, path: &Path, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retry < policy.max_retries => {
                let delay = policy.delay_for(retry);
                tracing::warn!(
                    file = %path.display(),
                    attempt = retry + 1,
                    "write failed, retrying in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(e) => {
                return Err(LatticeError::RetriesExhausted {
                    path: path.to_path_buf(),
                    attempts: retry + 1,
                    source: e,
                })
            }
        }
    }
}

/// Snapshot of queue activity for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Operations waiting for their path lock.
    pub queued: usize,
    /// Operations currently holding a path lock.
    pub in_flight: usize,
    /// Paths with an outstanding lock (held or awaited).
    pub locks: usize,
}

/// Serializes writes per path and performs them atomically.
#[derive(Debug)]
pub struct WriteQueue {
    locks: Mutex<HashMap<PathBuf, Arc<PathLock<()>>>>,
    pending: AtomicUsize,
    in_flight: AtomicUsize,
    idle: Notify,
    temp_seq: AtomicU64,
    backups: BackupManager,
    retry: RetryPolicy,
    /// Overwrites the temp file between write and verification.
    #[cfg(test)]
    tamper_temp: std::sync::atomic::AtomicBool,
}

impl WriteQueue {
    #[must_use]
    pub fn new(backups: BackupManager, retry: RetryPolicy) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            pending: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            temp_seq: AtomicU64::new(0),
            backups,
            retry,
            #[cfg(test)]
            tamper_temp: std::sync::atomic::AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Write `content` to `path`. Resolves once the bytes are on disk and
    /// verified.
    ///
    /// # Errors
    ///
    /// - [`LatticeError::RetriesExhausted`] if the temp write kept failing
    /// - [`LatticeError::VerificationFailed`] if the read-back differed
    /// - [`LatticeError::Io`] for directory creation or rename failures
    pub async fn write(&self, path: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<()> {
        let key = lock_key(path.as_ref())?;
        let _pending = PendingGuard::enter(self);
        let (_lease, _held) = self.acquire(&key).await;
        let _active = ActiveGuard::enter(&self.in_flight);

        if let Some(parent) = key.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Err(e) = self.backups.snapshot(&key).await {
            tracing::warn!(file = %key.display(), "backup failed, writing anyway: {e}");
        }
        self.replace(&key, content.as_ref()).await
    }

    /// Overwrite `path` with its most recent backup, under the same path
    /// lock as writes. Returns `false` if no backup exists.
    ///
    /// # Errors
    ///
    /// Same as [`WriteQueue::write`], plus I/O errors reading the backup.
    pub async fn restore_from_backup(&self, path: impl AsRef<Path>) -> Result<bool> {
        let key = lock_key(path.as_ref())?;
        let Some(name) = key.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            return Ok(false);
        };

        let _pending = PendingGuard::enter(self);
        let (_lease, _held) = self.acquire(&key).await;
        let _active = ActiveGuard::enter(&self.in_flight);

        let Some(backup) = self.backups.latest(&name).await? else {
            return Ok(false);
        };
        let bytes = fs::read(&backup).await?;
        if let Some(parent) = key.parent() {
            fs::create_dir_all(parent).await?;
        }
        self.replace(&key, &bytes).await?;
        tracing::info!(file = %key.display(), backup = %backup.display(), "restored from backup");
        Ok(true)
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let pending = self.pending.load(Ordering::Acquire);
        let in_flight = self.in_flight.load(Ordering::Acquire);
        let locks = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        QueueStats {
            queued: pending.saturating_sub(in_flight),
            in_flight,
            locks,
        }
    }

    /// Wait until no write is queued or in flight.
    pub async fn drain(&self) {
        loop {
            let idle = self.idle.notified();
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }

    async fn acquire(&self, key: &Path) -> (PathLease<'_>, OwnedMutexGuard<()>) {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.to_path_buf()).or_default())
        };
        // The lease exists before the await so the map entry is cleaned up
        // even if this future is dropped while waiting.
        let lease = PathLease {
            queue: self,
            key: key.to_path_buf(),
            lock: Some(Arc::clone(&lock)),
        };
        let held = lock.lock_owned().await;
        (lease, held)
    }

    /// Temp-write, verify, rename. Cleans up the temp file on failure.
    async fn replace(&self, target: &Path, content: &[u8]) -> Result<()> {
        let tmp = self.temp_path(target);
        let result = self.write_verify_rename(&tmp, target, content).await;
        if result.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        result
    }

    async fn write_verify_rename(&self, tmp: &Path, target: &Path, content: &[u8]) -> Result<()> {
        with_retry(&self.retry, target, || write_synced(tmp, content)).await?;
        #[cfg(test)]
        if self.tamper_temp.load(Ordering::Relaxed) {
            fs::write(tmp, b"tampered").await?;
        }
        if !matches_on_disk(tmp, content).await? {
            return Err(LatticeError::VerificationFailed {
                path: target.to_path_buf(),
            });
        }
        fs::rename(tmp, target).await?;
        Ok(())
    }

    fn temp_path(&self, target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("write");
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        target.with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()))
    }
}

/// Lock-map key for `path`: absolute, so `a.json` and `./a.json` share a lock.
fn lock_key(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

async fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}

/// `true` if `path` holds exactly `expected`.
async fn matches_on_disk(path: &Path, expected: &[u8]) -> std::io::Result<bool> {
    Ok(fs::read(path).await? == expected)
}

/// Holds a reference to a path's lock; the map entry is dropped with the
/// last lease so the map only holds paths with outstanding work.
struct PathLease<'a> {
    queue: &'a WriteQueue,
    key: PathBuf,
    lock: Option<Arc<PathLock<()>>>,
}

impl Drop for PathLease<'_> {
    fn drop(&mut self) {
        drop(self.lock.take());
        let mut locks = self
            .queue
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
            tracing::trace!(file = %self.key.display(), "released path lock");
        }
    }
}

struct PendingGuard<'a>(&'a WriteQueue);

impl<'a> PendingGuard<'a> {
    fn enter(queue: &'a WriteQueue) -> Self {
        queue.pending.fetch_add(1, Ordering::AcqRel);
        Self(queue)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn queue_in(dir: &Path) -> Arc<WriteQueue> {
        Arc::new(WriteQueue::new(
            BackupManager::new(dir.join(".backups"), 5),
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
            },
        ))
    }

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let value = with_retry(&policy, Path::new("x"), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(std::io::Error::other("flaky disk"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_with_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let err = with_retry(&policy, Path::new("x"), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(std::io::Error::other("still broken")) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            LatticeError::RetriesExhausted {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(source.to_string(), "still broken");
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_creates_parents_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        let target = dir.path().join("nested").join("deeper").join("doc.json");

        queue.write(&target, "hello").await.unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
        let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn overwrite_takes_backup_first() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        let target = dir.path().join("doc.json");

        queue.write(&target, "first").await.unwrap();
        assert!(queue.backups().list("doc.json").await.unwrap().is_empty());

        queue.write(&target, "second").await.unwrap();
        let backups = queue.backups().list("doc.json").await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(std::fs::read_to_string(&backups[0]).unwrap(), "first");
    }

    #[tokio::test]
    async fn back_to_back_writes_land_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        let target = dir.path().join("race.json");

        // Neither write is awaited before the other is issued.
        let big = "x".repeat(256 * 1024);
        let first = {
            let queue = Arc::clone(&queue);
            let target = target.clone();
            tokio::spawn(async move { queue.write(&target, big).await })
        };
        let second = {
            let queue = Arc::clone(&queue);
            let target = target.clone();
            tokio::spawn(async move { queue.write(&target, "second").await })
        };

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "second");
    }

    #[tokio::test]
    async fn many_concurrent_writes_to_one_path_stay_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        let target = dir.path().join("fifo.json");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let queue = Arc::clone(&queue);
                let target = target.clone();
                tokio::spawn(async move { queue.write(&target, format!("v{i}")).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "v7");
        // Every overwrite was preceded by a backup; retention keeps the last 5.
        let backups = queue.backups().list("fifo.json").await.unwrap();
        let contents: Vec<String> = backups
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap())
            .collect();
        assert_eq!(contents, ["v2", "v3", "v4", "v5", "v6"]);
    }

    #[tokio::test]
    async fn drain_waits_for_outstanding_writes() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());

        let mut handles = Vec::new();
        for i in 0..5 {
            let queue = Arc::clone(&queue);
            let target = dir.path().join(format!("f{i}.json"));
            handles.push(tokio::spawn(async move { queue.write(target, "data").await }));
        }
        // Let the spawned writes register before draining.
        tokio::task::yield_now().await;
        assert!(queue.stats().locks > 0);

        queue.drain().await;
        assert_eq!(queue.stats(), QueueStats::default());
        for i in 0..5 {
            assert!(dir.path().join(format!("f{i}.json")).exists());
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn mismatched_read_back_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("check.json");
        std::fs::write(&file, "on disk").unwrap();
        assert!(matches_on_disk(&file, b"on disk").await.unwrap());
        assert!(!matches_on_disk(&file, b"intended").await.unwrap());
    }

    fn temp_siblings(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.to_string_lossy().ends_with(".tmp"))
            .collect()
    }

    #[tokio::test]
    async fn failed_verification_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        let target = dir.path().join("doc.json");
        queue.write(&target, "old").await.unwrap();

        queue.tamper_temp.store(true, Ordering::Relaxed);
        let err = queue.write(&target, "new").await.unwrap_err();

        assert!(matches!(err, LatticeError::VerificationFailed { .. }));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "old");
        assert!(temp_siblings(dir.path()).is_empty());
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[tokio::test]
    async fn exhausted_retries_leave_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        let target = dir.path().join("doc.json");
        std::fs::write(&target, "old").unwrap();

        // The first write's temp path is taken by a directory, so creating
        // the temp file fails on every attempt.
        let blocker = dir
            .path()
            .join(format!(".doc.json.{}.0.tmp", std::process::id()));
        std::fs::create_dir(&blocker).unwrap();

        let err = queue.write(&target, "new").await.unwrap_err();

        match err {
            LatticeError::RetriesExhausted { attempts, path, .. } => {
                assert_eq!(attempts, 4);
                assert_eq!(path, target);
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "old");
        assert!(temp_siblings(dir.path()).is_empty());
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[tokio::test]
    async fn restore_brings_back_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        let target = dir.path().join("doc.json");

        assert!(!queue.restore_from_backup(&target).await.unwrap());

        queue.write(&target, "good").await.unwrap();
        queue.write(&target, "bad").await.unwrap();
        assert!(queue.restore_from_backup(&target).await.unwrap());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "good");
    }
}
