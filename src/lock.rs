//! File-based mutual exclusion between reconciliation runs.
//!
//! The scheduler may fire a new run while the previous one is still talking
//! to the API. Presence of the lock file denotes "locked"; the file carries
//! `{pid, created_at}` so a crashed run's lock can be reclaimed once it is
//! older than [`STALE_AFTER`], and so release never deletes a lock acquired
//! by a different process.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A lock this old belongs to a run that died without releasing it.
pub const STALE_AFTER: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    created_at: DateTime<Utc>,
}

/// Guards one monitored app/repository pair. One lock file per bundle id.
pub struct RunLock {
    path: PathBuf,
    held: bool,
}

impl RunLock {
    /// Lock file under the OS temp dir, name derived from the bundle id.
    pub fn for_bundle(bundle_id: &str) -> Self {
        let sanitized: String = bundle_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        Self::at_path(std::env::temp_dir().join(format!("shiptag-{}.lock", sanitized)))
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self { path, held: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically create the lock file. Returns `false` when another run
    /// holds an unexpired lock; a stale lock is force-removed first.
    pub fn acquire(&mut self) -> Result<bool> {
        match self.try_create() {
            Ok(()) => {
                self.held = true;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if !self.existing_is_stale() {
                    return Ok(false);
                }
                warn!(
                    "removing stale lock {} (older than {:?})",
                    self.path.display(),
                    STALE_AFTER
                );
                std::fs::remove_file(&self.path)
                    .with_context(|| format!("Failed to remove stale lock {}", self.path.display()))?;
                match self.try_create() {
                    Ok(()) => {
                        self.held = true;
                        Ok(true)
                    }
                    // Lost the race to another process that reclaimed it first.
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
                    Err(e) => Err(e).context("Failed to create lock file"),
                }
            }
            Err(e) => Err(e).context("Failed to create lock file"),
        }
    }

    /// Delete the lock file, but only if this process owns it.
    pub fn release(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        let owner = self.read_record().map(|r| r.pid);
        match owner {
            Some(pid) if pid != std::process::id() => {
                // A stale lock of ours was reclaimed by another run; its lock
                // is not ours to delete.
                warn!(
                    "lock {} now owned by pid {}, leaving it in place",
                    self.path.display(),
                    pid
                );
                Ok(())
            }
            _ => {
                if self.path.exists() {
                    std::fs::remove_file(&self.path).with_context(|| {
                        format!("Failed to remove lock file {}", self.path.display())
                    })?;
                    info!("released lock {}", self.path.display());
                }
                Ok(())
            }
        }
    }

    fn try_create(&self) -> std::io::Result<()> {
        let record = LockRecord {
            pid: std::process::id(),
            created_at: Utc::now(),
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let json = serde_json::to_string(&record).map_err(std::io::Error::other)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    fn read_record(&self) -> Option<LockRecord> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn existing_is_stale(&self) -> bool {
        if let Some(record) = self.read_record() {
            let age = Utc::now().signed_duration_since(record.created_at);
            return age.to_std().map(|a| a > STALE_AFTER).unwrap_or(false);
        }
        // Unreadable record: fall back to filesystem mtime.
        match self.path.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified
                .elapsed()
                .map(|age| age > STALE_AFTER)
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn lock_in(dir: &Path) -> RunLock {
        RunLock::at_path(dir.join("test.lock"))
    }

    fn write_record(path: &Path, pid: u32, age: chrono::Duration) {
        let record = LockRecord {
            pid,
            created_at: Utc::now() - age,
        };
        std::fs::write(path, serde_json::to_string(&record).unwrap()).unwrap();
    }

    #[test]
    fn test_acquire_then_second_acquire_fails() {
        let dir = tempdir().unwrap();
        let mut first = lock_in(dir.path());
        assert!(first.acquire().unwrap());

        let mut second = lock_in(dir.path());
        assert!(!second.acquire().unwrap());
    }

    #[test]
    fn test_release_allows_reacquire() {
        let dir = tempdir().unwrap();
        let mut lock = lock_in(dir.path());
        assert!(lock.acquire().unwrap());
        lock.release().unwrap();
        assert!(!lock.path().exists());

        let mut again = lock_in(dir.path());
        assert!(again.acquire().unwrap());
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = tempdir().unwrap();
        let mut lock = lock_in(dir.path());
        write_record(lock.path(), 99999, chrono::Duration::minutes(31));

        assert!(lock.acquire().unwrap());
        // The stale record was replaced with ours.
        let content = std::fs::read_to_string(lock.path()).unwrap();
        let record: LockRecord = serde_json::from_str(&content).unwrap();
        assert_eq!(record.pid, std::process::id());
    }

    #[test]
    fn test_fresh_lock_is_not_reclaimed() {
        let dir = tempdir().unwrap();
        let mut lock = lock_in(dir.path());
        write_record(lock.path(), 99999, chrono::Duration::minutes(5));

        assert!(!lock.acquire().unwrap());
    }

    #[test]
    fn test_release_skips_lock_owned_by_other_pid() {
        let dir = tempdir().unwrap();
        let mut lock = lock_in(dir.path());
        assert!(lock.acquire().unwrap());

        // Simulate another process reclaiming the lock mid-run.
        write_record(lock.path(), std::process::id() + 1, chrono::Duration::zero());
        lock.release().unwrap();
        assert!(lock.path().exists(), "foreign lock must not be deleted");
    }

    #[test]
    fn test_release_without_acquire_is_noop() {
        let dir = tempdir().unwrap();
        let mut lock = lock_in(dir.path());
        lock.release().unwrap();
    }

    #[test]
    fn test_bundle_lock_name_is_sanitized() {
        let lock = RunLock::for_bundle("com.example.My App");
        let name = lock.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("shiptag-com-example-My-App"));
        assert!(!name.contains(' '));
    }
}
