use crate::{SharedState, StateError};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Owns the path of the shared state file and its sidecar lock file.
///
/// Writers hold [`StateLock`] across read-modify-write; every write replaces
/// the file with a rename, so lock-free readers see either the old or the new
/// state and never a partial one.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

/// Exclusive advisory lock on `<state>.lock`, released on drop.
///
/// `flock` locks belong to the open file, so taking a second lock from the
/// same process while one is held blocks forever.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    pub fn lock(&self) -> Result<StateLock, StateError> {
        let path = self.lock_path();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| StateError::Lock {
                path: path.clone(),
                source,
            })?;
        lock_exclusive(&file).map_err(|source| StateError::Lock {
            path: path.clone(),
            source,
        })?;
        Ok(StateLock { file, path })
    }

    /// Reads the state without locking. Missing file is [`StateError::Missing`].
    pub fn load(&self) -> Result<SharedState, StateError> {
        SharedState::load_from_file(&self.path)
    }

    /// Reads the state, writing an empty one first if the file is absent.
    pub fn load_or_init(&self) -> Result<SharedState, StateError> {
        match self.load() {
            Err(StateError::Missing(_)) => {
                let lock = self.lock()?;
                self.load_or_init_locked(&lock)
            }
            other => other,
        }
    }

    /// As [`StateStore::load_or_init`], for callers already holding the lock.
    pub fn load_or_init_locked(&self, _lock: &StateLock) -> Result<SharedState, StateError> {
        match self.load() {
            Err(StateError::Missing(_)) => {
                log::info!(
                    "no state file at {}, starting with no experiments",
                    self.path.display()
                );
                let state = SharedState::default();
                state.save_to_file(&self.path)?;
                Ok(state)
            }
            other => other,
        }
    }

    pub fn save(&self, _lock: &StateLock, state: &SharedState) -> Result<(), StateError> {
        state.save_to_file(&self.path)
    }

    /// Locked read-modify-write. The closure's result is returned alongside the
    /// state that was written.
    pub fn update<T, F>(&self, f: F) -> Result<(SharedState, T), StateError>
    where
        F: FnOnce(&mut SharedState) -> T,
    {
        let lock = self.lock()?;
        let mut state = self.load_or_init_locked(&lock)?;
        let out = f(&mut state);
        self.save(&lock, &state)?;
        Ok((state, out))
    }
}

impl StateLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = unlock(&self.file);
    }
}

pub(crate) fn write_atomically(path: &Path, data: &[u8]) -> Result<(), StateError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> std::io::Result<()> {
    Ok(())
}
