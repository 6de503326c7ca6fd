#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod fs;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

pub use fs::FsSnapshotStore;

#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    #[error("invalid snapshot path: {0}")]
    InvalidPath(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable home for encoded status-table snapshots.
///
/// - `put_snapshot` replaces the previous snapshot atomically; readers never
///   observe a partially written file.
/// - The store does not interpret the bytes.
pub trait SnapshotStore: Send + Sync + 'static {
    fn put_snapshot(&self, bytes: &[u8]) -> Result<(), SnapshotStoreError>;
    fn get_snapshot(&self) -> Result<Option<Vec<u8>>, SnapshotStoreError>;

    /// Human-readable destination, used in logs and responses.
    fn location(&self) -> String;
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SnapshotStoreError> {
    use std::io::Write;

    let parent = path
        .parent()
        .ok_or_else(|| SnapshotStoreError::InvalidPath(path.display().to_string()))?;
    if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SnapshotStoreError::InvalidPath(path.display().to_string()))?;
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut tmp = path.to_path_buf();
    tmp.set_file_name(format!(
        ".{file_name}.tmp.{}.{}.{seq}",
        std::process::id(),
        unix_time_ms()
    ));

    {
        let mut f = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }

    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(SnapshotStoreError::Io(err));
    }
    Ok(())
}

pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .min(u64::MAX as u128) as u64
}
