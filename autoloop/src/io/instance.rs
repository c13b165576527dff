//! Single-instance guard for `autoloop run`.
//!
//! An exclusive advisory lock on `.auto-company.pid` is held for the lifetime
//! of the loop. The file also carries the owner's pid for operators. The lock
//! is released by the OS when the process dies, so a crashed loop never leaves
//! a stale guard behind.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs4::FileExt;
use tracing::{debug, warn};

/// Another process already holds the loop lock for this project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadyRunning {
    pub pid: Option<u32>,
}

impl fmt::Display for AlreadyRunning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "autoloop already running (PID: {pid}). Stop it first."),
            None => write!(f, "autoloop already running. Stop it first."),
        }
    }
}

impl std::error::Error for AlreadyRunning {}

/// Held loop lock. Dropping it clears the pid and releases the lock.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock or fail with [`AlreadyRunning`].
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open {}", path.display()))?;

        if let Err(err) = FileExt::try_lock_exclusive(&file) {
            if err.kind() == ErrorKind::WouldBlock {
                let pid = read_pid(&mut file);
                return Err(AlreadyRunning { pid }.into());
            }
            return Err(err).with_context(|| format!("lock {}", path.display()));
        }

        write_pid(&mut file).with_context(|| format!("write pid to {}", path.display()))?;
        debug!(path = %path.display(), pid = std::process::id(), "loop lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // The file stays so a racing `acquire` never locks an unlinked inode.
        if let Err(err) = self.file.set_len(0) {
            warn!(path = %self.path.display(), err = %err, "failed to clear pid file");
        }
    }
}

fn write_pid(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut raw = String::new();
    file.read_to_string(&mut raw).ok()?;
    raw.trim().parse().ok()
}
