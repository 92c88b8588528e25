//! Per-host request lock
//!
//! Two scheduler RPCs for the same host must not interleave writes to that
//! host's row, so each request takes a non-blocking advisory lock keyed by
//! host id before doing anything else. A held lock is a retryable condition
//! for the client, never a server failure.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{Result, SchedError};

/// Held per-host lock; released on drop.
#[derive(Debug)]
pub struct HostLock {
    _lock: Flock<File>,
    pub path: PathBuf,
}

/// Single non-blocking acquisition attempt.
pub fn try_acquire(lock_dir: &Path, hostid: u64) -> Result<HostLock> {
    std::fs::create_dir_all(lock_dir)?;
    let path = lock_dir.join(format!("host_{hostid}.lock"));
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)?;
    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(lock) => Ok(HostLock { _lock: lock, path }),
        Err((_, Errno::EWOULDBLOCK)) => Err(SchedError::LockConflict { hostid }),
        Err((_, errno)) => Err(std::io::Error::from_raw_os_error(errno as i32).into()),
    }
}

/// Run `op` until it stops returning [`SchedError::LockConflict`], sleeping
/// `delay` (doubled each round) between attempts. Exhausting the attempt
/// budget is a [`SchedError::Timeout`].
pub fn retry_with_backoff<T>(
    attempts: u32,
    mut delay: Duration,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    for attempt in 0..attempts {
        match op() {
            Err(SchedError::LockConflict { hostid }) => {
                tracing::debug!(hostid, attempt, "host lock busy, backing off");
                std::thread::sleep(delay);
                delay = delay.saturating_mul(2);
            }
            other => return other,
        }
    }
    Err(SchedError::Timeout { attempts })
}

/// Acquire the per-host lock with a bounded retry.
pub fn acquire(lock_dir: &Path, hostid: u64, attempts: u32, delay: Duration) -> Result<HostLock> {
    retry_with_backoff(attempts, delay, || try_acquire(lock_dir, hostid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = try_acquire(dir.path(), 7).unwrap();
        assert!(lock.path.exists());
        drop(lock);
        // Released: a second acquisition succeeds.
        try_acquire(dir.path(), 7).unwrap();
    }

    #[test]
    fn test_held_lock_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let _held = try_acquire(dir.path(), 7).unwrap();
        let err = try_acquire(dir.path(), 7).unwrap_err();
        assert!(matches!(err, SchedError::LockConflict { hostid: 7 }));
    }

    #[test]
    fn test_distinct_hosts_do_not_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let _a = try_acquire(dir.path(), 1).unwrap();
        let _b = try_acquire(dir.path(), 2).unwrap();
    }

    #[test]
    fn test_retry_exhaustion_is_timeout() {
        let err = retry_with_backoff(3, Duration::from_millis(1), || -> Result<()> {
            Err(SchedError::LockConflict { hostid: 9 })
        })
        .unwrap_err();
        assert!(matches!(err, SchedError::Timeout { attempts: 3 }));
    }

    #[test]
    fn test_retry_passes_through_other_errors() {
        let mut calls = 0;
        let err = retry_with_backoff(5, Duration::from_millis(1), || -> Result<()> {
            calls += 1;
            Err(SchedError::Database("down".into()))
        })
        .unwrap_err();
        assert!(matches!(err, SchedError::Database(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_succeeds_after_conflicts() {
        let mut calls = 0;
        let value = retry_with_backoff(5, Duration::from_millis(1), || {
            calls += 1;
            if calls < 3 {
                Err(SchedError::LockConflict { hostid: 1 })
            } else {
                Ok(42)
            }
        })
        .unwrap();
        assert_eq!(value, 42);
    }
}
