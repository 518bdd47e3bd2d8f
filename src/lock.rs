//! Root directory lock: one daemon per storage root.
//!
//! fs2 advisory exclusive lock on `<root>/lock`, taken without blocking.
//! The holder writes its pid into the file so a refused second instance can say who
//! owns the root. Lock is released on Drop (or by the OS when the process dies).

use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::consts::LOCK_FILE;

pub struct RootLock {
    file: File,
    path: PathBuf,
}

impl RootLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        // unlock errors on drop are ignored; the fd close releases it anyway
        let _ = self.file.unlock();
    }
}

pub fn lock_file_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

/// Take the root lock or fail immediately if another process holds it.
pub fn try_lock_root(root: &Path) -> Result<RootLock> {
    let path = lock_file_path(root);
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;

    if file.try_lock_exclusive().is_err() {
        let mut holder = String::new();
        let _ = file.read_to_string(&mut holder);
        let holder = holder.trim();
        return Err(anyhow!(
            "root {} is locked by another volumed instance{} (lock file {})",
            root.display(),
            if holder.is_empty() {
                String::new()
            } else {
                format!(" (pid {holder})")
            },
            path.display()
        ));
    }

    file.set_len(0)
        .and_then(|_| file.seek(SeekFrom::Start(0)))
        .and_then(|_| writeln!(file, "{}", std::process::id()))
        .with_context(|| format!("write pid into {}", path.display()))?;

    Ok(RootLock { file, path })
}
