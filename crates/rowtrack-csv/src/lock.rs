//! Exclusive advisory lock on a sidecar `.lock` file.
//!
//! Every write path of the CSV manager runs under this lock. Acquisition is
//! polled at a fixed interval and gives up after a timeout instead of
//! blocking forever.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::LockError;

/// Lock file used for a given data file: `output.csv` → `output.csv.lock`.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}

/// Held lock. Released on drop.
pub struct FileLockGuard {
    path: PathBuf,
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl std::fmt::Debug for FileLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLockGuard").field("path", &self.path).finish_non_exhaustive()
    }
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(not(unix))]
impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Acquire the exclusive lock guarding `target`.
pub fn acquire(
    target: &Path,
    timeout: Duration,
    check_interval: Duration,
) -> Result<FileLockGuard, LockError> {
    let path = lock_path_for(target);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| LockError::io(&path, &e))?;
        }
    }

    let started = Instant::now();
    loop {
        match try_acquire(&path)? {
            Some(guard) => {
                trace!(path = %path.display(), waited_ms = started.elapsed().as_millis() as u64, "Acquired file lock");
                return Ok(guard);
            }
            None if started.elapsed() >= timeout => {
                debug!(path = %path.display(), "Timed out waiting for file lock");
                return Err(LockError::Timeout {
                    path,
                    waited: started.elapsed(),
                });
            }
            None => std::thread::sleep(check_interval),
        }
    }
}

#[cfg(unix)]
fn try_acquire(path: &Path) -> Result<Option<FileLockGuard>, LockError> {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LockError::io(path, &e))?;

    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(flock) => Ok(Some(FileLockGuard {
            path: path.to_path_buf(),
            _flock: flock,
        })),
        Err((_, errno)) if errno == Errno::EWOULDBLOCK || errno == Errno::EINTR => Ok(None),
        Err((_, errno)) => Err(LockError::Io {
            path: path.to_path_buf(),
            message: errno.desc().to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn try_acquire(path: &Path) -> Result<Option<FileLockGuard>, LockError> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(FileLockGuard {
            path: path.to_path_buf(),
            _file: file,
        })),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(LockError::io(path, &e)),
    }
}
