use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TelegramMcpError};

/// Maximum acquisition attempts before giving up.
const MAX_ATTEMPTS: u32 = 6;
/// Base delay for exponential backoff between attempts.
const BASE_DELAY_MS: u64 = 50;

/// Advisory file lock using flock(2) on a sibling .lock file.
/// The lock is released when the guard is dropped.
pub struct FileLock {
    _file: fs::File,
}

impl FileLock {
    /// Acquire the lock for `path`, retrying with exponential backoff.
    pub async fn acquire(path: &Path) -> Result<Self> {
        let mut delay = Duration::from_millis(BASE_DELAY_MS);
        for attempt in 1..=MAX_ATTEMPTS {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(TelegramMcpError::LockContended {
            path: path.to_path_buf(),
            attempts: MAX_ATTEMPTS,
        })
    }

    /// One non-blocking attempt. Ok(None) means the lock is held elsewhere.
    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let lock_path = lock_path_for(path);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        if flock_exclusive_nonblocking(&file)? {
            Ok(Some(Self { _file: file }))
        } else {
            Ok(None)
        }
    }
}

// When FileLock is dropped, the file is closed and the lock is released.

fn lock_path_for(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

#[cfg(unix)]
fn flock_exclusive_nonblocking(file: &fs::File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err.into())
    }
}

#[cfg(not(unix))]
fn flock_exclusive_nonblocking(_file: &fs::File) -> Result<bool> {
    // No-op on non-Unix platforms
    Ok(true)
}

/// Run `operation` while holding the exclusive lock for `path`.
///
/// The operation's error propagates after the lock is released; two
/// concurrent calls on the same path never run their operations at once.
pub async fn with_lock<T, Fut>(path: &Path, operation: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let guard = FileLock::acquire(path).await?;
    let result = operation.await;
    drop(guard);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn with_lock_runs_operation_and_returns_value() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("queue.jsonl");

        let value = with_lock(&path, async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn lock_released_after_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("queue.jsonl");

        let result: Result<()> = with_lock(&path, async {
            Err(TelegramMcpError::Validation {
                reason: "boom".into(),
            })
        })
        .await;
        assert!(result.is_err());

        // The lock must be free again.
        let value = with_lock(&path, async { Ok(1) }).await.unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn contended_lock_fails_after_bounded_retries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("queue.jsonl");

        let _held = FileLock::acquire(&path).await.unwrap();

        let result = FileLock::acquire(&path).await;
        match result {
            Err(TelegramMcpError::LockContended { attempts, .. }) => {
                assert_eq!(attempts, MAX_ATTEMPTS);
            }
            other => panic!("expected LockContended, got {:?}", other.is_ok()),
        }
    }

    #[tokio::test]
    async fn concurrent_holders_never_overlap() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let tmp = TempDir::new().unwrap();
        let path = Arc::new(tmp.path().join("queue.jsonl"));
        let in_section = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let path = path.clone();
            let in_section = in_section.clone();
            handles.push(tokio::spawn(async move {
                with_lock(&path, async {
                    let now = in_section.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(now, 0, "another task held the lock concurrently");
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_section.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }
}
