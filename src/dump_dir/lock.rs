//! Advisory record lock.
//!
//! A record is locked by creating a symlink named `.lock` inside it whose
//! target is the holder's pid. Symlink creation is atomic, so whoever
//! creates it first holds the lock. A lock naming a process that no longer
//! exists is stale and gets broken.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::config::DumpDirConfig;

pub(crate) const LOCK_FILE: &str = ".lock";

/// Result of one lock attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LockAttempt {
    Acquired,
    /// Another live process (or this one, through another handle) holds it.
    HeldBy(String),
}

pub(crate) fn lock_path(dir: &Path) -> PathBuf {
    dir.join(LOCK_FILE)
}

pub(crate) fn our_pid() -> String {
    std::process::id().to_string()
}

/// Tries to take the lock on `dir` once.
///
/// Loops only to get past transient states: a lock that disappeared between
/// our `symlink` and `readlink`, or a stale lock we just removed.
pub(crate) fn try_lock(dir: &Path, config: &DumpDirConfig) -> io::Result<LockAttempt> {
    let lock_file = lock_path(dir);
    let pid = our_pid();

    loop {
        match symlink(&pid, &lock_file) {
            Ok(()) => {
                debug!("Locked '{}'", lock_file.display());
                return Ok(LockAttempt::Acquired);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }

        let holder = match fs::read_link(&lock_file) {
            Ok(target) => target.to_string_lossy().into_owned(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Unlocked under our feet.
                DumpDirConfig::sleep(config.symlink_retry_ms);
                continue;
            }
            Err(e) => return Err(e),
        };

        if holder == pid {
            info!("Lock file '{}' is already locked by us", lock_file.display());
            return Ok(LockAttempt::HeldBy(holder));
        }
        if let Ok(holder_pid) = holder.parse::<i32>() {
            if holder_pid > 0 && process_alive(holder_pid) {
                debug!("Lock file '{}' is locked by process {}", lock_file.display(), holder);
                return Ok(LockAttempt::HeldBy(holder));
            }
        }

        warn!(
            "Lock file '{}' was locked by process {}, but it crashed?",
            lock_file.display(),
            holder
        );
        match fs::remove_file(&lock_file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
}

/// Removes our lock. A missing lock file is not an error.
pub(crate) fn unlock(dir: &Path) {
    let lock_file = lock_path(dir);
    match fs::remove_file(&lock_file) {
        Ok(()) => debug!("Unlocked '{}'", lock_file.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Can't remove lock file '{}': {}", lock_file.display(), e),
    }
}

fn process_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // Exists, but belongs to someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
