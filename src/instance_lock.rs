use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use fd_lock::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Who holds the coordinator lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            hostname: hostname::get()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            started_at: Utc::now(),
        }
    }
}

/// Exclusive claim on a state directory; only one coordinator may own it.
///
/// Released when dropped or when the process exits.
pub struct InstanceLock {
    path: PathBuf,
    holder: LockHolder,
    _guard: RwLockWriteGuard<'static, File>,
}

impl InstanceLock {
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory {}", parent.display()))?;
        }

        // Not truncated on open: a losing contender must not wipe the holder record
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        let lock = Box::leak(Box::new(RwLock::new(file)));
        let mut guard = lock.try_write().map_err(|_| {
            let holder = Self::read_holder(&path)
                .map(|h| format!(" (held by pid {} on {} since {})", h.pid, h.hostname, h.started_at))
                .unwrap_or_default();
            anyhow!("Another coordinator is already running on this state directory{holder}")
        })?;

        let holder = LockHolder::current();
        guard.set_len(0)?;
        guard.seek(SeekFrom::Start(0))?;
        guard.write_all(serde_json::to_string(&holder)?.as_bytes())?;
        guard.flush()?;

        info!(
            lock_file = %path.display(),
            pid = holder.pid,
            hostname = %holder.hostname,
            "Acquired coordinator instance lock"
        );
        Ok(Self {
            path,
            holder,
            _guard: guard,
        })
    }

    /// Holder recorded in an existing lock file
    pub fn read_holder(path: impl AsRef<Path>) -> Option<LockHolder> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_coordinator_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("warden.lock");

        let first = InstanceLock::acquire(&path).unwrap();
        assert_eq!(first.holder().pid, std::process::id());
        assert_eq!(InstanceLock::read_holder(&path).as_ref(), Some(first.holder()));

        let err = InstanceLock::acquire(&path).err().unwrap();
        assert!(err.to_string().contains("already running"));
        // The losing attempt leaves the holder record intact
        assert_eq!(InstanceLock::read_holder(&path).as_ref(), Some(first.holder()));
    }

    #[test]
    fn test_lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.lock");

        drop(InstanceLock::acquire(&path).unwrap());
        InstanceLock::acquire(&path).unwrap();
    }
}
