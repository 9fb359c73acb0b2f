//! OS-visible synchronization objects.
//!
//! A `NamedMutex` is an advisory `flock` on a lock file in the runtime
//! directory. Each acquisition opens its own descriptor, so the lock
//! excludes other threads of this process as well as other processes.
//! Acquisition is always bounded; on expiry the caller gets a
//! `Timeout` naming the lock file.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::POLL_INTERVAL;
use crate::error::{Error, Result, SyncObject};

/// Named, cross-process mutex
#[derive(Debug, Clone)]
pub struct NamedMutex {
    path: PathBuf,
    object: SyncObject,
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct MutexGuard {
    file: File,
    path: PathBuf,
}

impl NamedMutex {
    pub fn new(path: impl Into<PathBuf>, object: SyncObject) -> Self {
        Self {
            path: path.into(),
            object,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, waiting at most `timeout`
    pub fn acquire(&self, timeout: Duration) -> Result<MutexGuard> {
        let start = Instant::now();
        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)
                .map_err(|e| Error::process("failed to open lock file", e))?;

            if try_lock(&file)? {
                // The last client unlinks lock files during teardown. A lock
                // on an unlinked inode protects nothing, so start over.
                if same_inode(&file, &self.path) {
                    log::trace!("acquired {}", self.path.display());
                    return Ok(MutexGuard {
                        file,
                        path: self.path.clone(),
                    });
                }
                continue;
            }

            if start.elapsed() >= timeout {
                return Err(Error::Timeout {
                    object: self.object,
                    path: self.path.clone(),
                    waited: start.elapsed(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl MutexGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        // SAFETY: the descriptor belongs to `self.file` and is still open.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        log::trace!("released {}", self.path.display());
    }
}

fn try_lock(file: &File) -> Result<bool> {
    // SAFETY: flock on a valid descriptor owned by `file`.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(false),
        _ => Err(Error::process("flock failed", err)),
    }
}

fn same_inode(file: &File, path: &Path) -> bool {
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(named)) => held.ino() == named.ino() && held.dev() == named.dev(),
        _ => false,
    }
}

/// Wait until `counter` moves away from `seen`, or until `timeout` expires.
/// Returns the new value on change.
pub fn wait_for_change(counter: &AtomicU32, seen: u32, timeout: Duration) -> Option<u32> {
    let start = Instant::now();
    loop {
        let current = counter.load(Ordering::Acquire);
        if current != seen {
            return Some(current);
        }
        if start.elapsed() >= timeout {
            return None;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Signal an event living in shared memory
pub fn signal(counter: &AtomicU32) -> u32 {
    counter.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = TempDir::new().unwrap();
        let mutex = NamedMutex::new(dir.path().join("s.lock"), SyncObject::SessionLock);

        let _held = mutex.acquire(Duration::from_millis(100)).unwrap();
        let err = mutex.acquire(Duration::from_millis(50)).unwrap_err();
        match err {
            Error::Timeout { object, path, .. } => {
                assert_eq!(object, SyncObject::SessionLock);
                assert_eq!(path, dir.path().join("s.lock"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn release_on_drop_lets_next_waiter_in() {
        let dir = TempDir::new().unwrap();
        let mutex = NamedMutex::new(dir.path().join("q.lock"), SyncObject::QueryLock);

        let held = mutex.acquire(Duration::from_millis(100)).unwrap();
        let waiter = {
            let mutex = mutex.clone();
            thread::spawn(move || mutex.acquire(Duration::from_secs(2)).map(|_| ()))
        };
        thread::sleep(Duration::from_millis(50));
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn unlinked_lock_file_is_not_trusted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.lock");
        let mutex = NamedMutex::new(&path, SyncObject::SessionLock);

        let held = mutex.acquire(Duration::from_millis(100)).unwrap();
        let waiter = {
            let mutex = mutex.clone();
            thread::spawn(move || mutex.acquire(Duration::from_secs(2)))
        };
        thread::sleep(Duration::from_millis(30));
        std::fs::remove_file(&path).unwrap();
        drop(held);

        let guard = waiter.join().unwrap().unwrap();
        assert!(same_inode(&guard.file, &path));
    }

    #[test]
    fn event_wait_sees_signal_or_times_out() {
        let counter = Arc::new(AtomicU32::new(7));
        assert_eq!(wait_for_change(&counter, 7, Duration::from_millis(30)), None);

        let signaller = {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                signal(&counter)
            })
        };
        assert_eq!(wait_for_change(&counter, 7, Duration::from_secs(2)), Some(8));
        assert_eq!(signaller.join().unwrap(), 8);
    }
}
