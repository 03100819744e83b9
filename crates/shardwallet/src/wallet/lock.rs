use crate::{errors::WalletError, retry::BackoffConfig};
use eyre::Context as _;
use fs2::FileExt as _;
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    time::Duration,
};

/// Exclusive advisory lock on a file; released on drop.
///
/// Each acquisition opens its own handle, so the lock excludes other threads of this
/// process as well as other processes.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "unlock failed");
        }
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || (e.raw_os_error().is_some()
            && e.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}

fn open_lock_file(path: &Path) -> eyre::Result<File> {
    let mut oo = OpenOptions::new();
    oo.create(true).read(true).write(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        oo.mode(crate::fsutil::MODE_FILE_PRIVATE);
    }
    oo.open(path)
        .with_context(|| format!("open lock file {}", path.display()))
}

/// Acquires file locks with a bounded, backed-off wait.
#[derive(Debug, Clone)]
pub struct Locker {
    timeout: Duration,
    backoff: BackoffConfig,
}

impl Locker {
    pub const fn new(timeout: Duration, backoff: BackoffConfig) -> Self {
        Self { timeout, backoff }
    }

    /// Lock `path`, creating the lock file if needed. Its parent directory must exist.
    pub fn acquire(&self, path: &Path) -> eyre::Result<FileLock> {
        let file = open_lock_file(path)?;
        let locked = crate::retry::poll_until(self.timeout, &self.backoff, || {
            match file.try_lock_exclusive() {
                Ok(()) => Ok(Some(())),
                Err(e) if is_contended(&e) => Ok(None),
                Err(e) => Err(eyre::Report::new(e).wrap_err(format!("lock {}", path.display()))),
            }
        })?;
        if locked.is_none() {
            tracing::warn!(
                path = %path.display(),
                timeout_ms = self.timeout.as_millis(),
                "lock wait timed out"
            );
            return Err(WalletError::LockTimeout(path.display().to_string()).into());
        }
        Ok(FileLock {
            file,
            path: path.to_path_buf(),
        })
    }
}
