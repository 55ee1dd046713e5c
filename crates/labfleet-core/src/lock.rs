//! Advisory file locks
//!
//! Used for the fleet store's cross-process writer lock and to tell whether a
//! device's job runner is still alive.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::block_in_place;
use tracing::debug;

/// Try to acquire an exclusive flock on a file (non-blocking).
///
/// Returns `Ok(true)` if the lock was acquired, `Ok(false)` if the file is
/// already locked by another open file description.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: flock is a standard POSIX call. fd is a valid file descriptor
        // owned by `file`. LOCK_EX | LOCK_NB is non-blocking exclusive lock.
        #[allow(unsafe_code)]
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

/// An exclusive flock, released when dropped
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    _file: File,
}

impl FileLock {
    /// Lock `path`, creating it if needed, trying `attempts` times
    ///
    /// The first attempt never waits. Retries sleep on the calling thread,
    /// which is handed over to the blocking pool first when it is a worker of
    /// a multi-threaded tokio runtime.
    ///
    /// # Errors
    /// Returns the I/O error, or `Ok(None)` when the lock stayed held.
    pub fn acquire(path: &Path, attempts: u32, delay: Duration) -> io::Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        let mut locked = attempts > 0 && try_flock_exclusive(&file)?;
        if !locked && attempts > 1 {
            debug!(path = %path.display(), attempt = 1, "lock busy");
            locked = off_worker(|| -> io::Result<bool> {
                for attempt in 2..=attempts {
                    std::thread::sleep(delay);
                    if try_flock_exclusive(&file)? {
                        return Ok(true);
                    }
                    debug!(path = %path.display(), attempt, "lock busy");
                }
                Ok(false)
            })?;
        }

        Ok(locked.then(|| Self {
            path: path.to_path_buf(),
            _file: file,
        }))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Run a blocking wait without stalling the tasks of the current runtime
///
/// Outside a runtime, or on a current-thread runtime, `f` simply runs here.
pub(crate) fn off_worker<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => block_in_place(f),
        _ => f(),
    }
}

/// What inspecting a lock found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// No lock file
    Missing,
    /// The lock could be taken, so nobody holds it
    Free,
    /// Someone kept the lock through every attempt
    Held,
}

/// Check whether somebody holds the flock on `path`
///
/// The lock is released right away when it could be taken. An unreadable
/// lock file counts as missing.
pub async fn inspect_lock(path: &Path, attempts: u32, delay: Duration) -> LockStatus {
    let Ok(file) = File::open(path) else {
        return LockStatus::Missing;
    };

    for attempt in 1..=attempts {
        match try_flock_exclusive(&file) {
            Ok(true) => return LockStatus::Free,
            Ok(false) => {}
            Err(e) => {
                debug!(path = %path.display(), error = %e, "lock inspection failed");
                return LockStatus::Missing;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    LockStatus::Held
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    const RETRY_DELAY: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn test_inspect_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let status = inspect_lock(&dir.path().join("nope.lock"), 3, RETRY_DELAY).await;
        assert_eq!(status, LockStatus::Missing);
    }

    #[tokio::test]
    async fn test_inspect_sees_held_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.lock");

        let lock = FileLock::acquire(&path, 1, RETRY_DELAY).unwrap().unwrap();
        assert_eq!(inspect_lock(&path, 3, RETRY_DELAY).await, LockStatus::Held);

        drop(lock);
        assert_eq!(inspect_lock(&path, 3, RETRY_DELAY).await, LockStatus::Free);
    }

    #[test]
    fn test_second_acquire_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.lock");

        let first = FileLock::acquire(&path, 1, RETRY_DELAY).unwrap();
        assert!(first.is_some());
        assert!(FileLock::acquire(&path, 2, RETRY_DELAY).unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_waiting_for_a_lock_leaves_the_runtime_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.lock");
        let _held = FileLock::acquire(&path, 1, RETRY_DELAY).unwrap().unwrap();

        let ticks = Arc::new(AtomicU32::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        // Runs on the only worker thread, next to the ticker
        let waiter = tokio::spawn(async move {
            let before = ticks.load(Ordering::SeqCst);
            let lock = FileLock::acquire(&path, 6, Duration::from_millis(40)).unwrap();
            (lock.is_none(), ticks.load(Ordering::SeqCst) - before)
        });
        let (timed_out, ticked_while_waiting) = waiter.await.unwrap();
        ticker.abort();

        assert!(timed_out);
        assert!(ticked_while_waiting >= 5, "ticker advanced {ticked_while_waiting} times");
    }
}
