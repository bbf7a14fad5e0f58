use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use fd_lock::{RwLock, RwLockWriteGuard};

use crate::error::AppRunError;
use crate::sink::csv::SampleSink;

pub const OUTPUT_FILE_PREFIX: &str = "data_dump";

/// Picks `<dir>/data_dump<N>.csv`, where N is the number of entries already in `dir`, so that
/// every run writes a new file. Creates `dir` if it does not exist.
pub fn next_output_path(dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let offset = fs::read_dir(dir)?.count();

    Ok(dir.join(format!("{}{}.csv", OUTPUT_FILE_PREFIX, offset)))
}

/// Exclusive lock on the output file, so that two recorders never append to the same file.
pub struct OutputLock {
    path: PathBuf,
    rw_lock: RwLock<File>,
}

impl OutputLock {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        Ok(OutputLock { path: path.to_path_buf(), rw_lock: RwLock::new(file) })
    }

    /// Fails immediately if another process holds the file. Keep the guard for as long as
    /// samples are written.
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<File>, AppRunError> {
        match self.rw_lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(source) => Err(AppRunError::OutputLocked { path: self.path.clone(), source }),
        }
    }
}

/// A sink writing through the locked file handle.
pub fn locked_sink(path: &Path, guard: &RwLockWriteGuard<File>) -> io::Result<SampleSink> {
    Ok(SampleSink::new(path.to_path_buf(), guard.try_clone()?))
}
