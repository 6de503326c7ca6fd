use std::path::PathBuf;

use crate::{write_atomic, SnapshotStore, SnapshotStoreError};

/// Keeps the latest snapshot in a single file.
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    path: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotStore for FsSnapshotStore {
    fn put_snapshot(&self, bytes: &[u8]) -> Result<(), SnapshotStoreError> {
        if self.path.file_name().is_none() {
            return Err(SnapshotStoreError::InvalidPath(
                self.path.display().to_string(),
            ));
        }
        write_atomic(&self.path, bytes)
    }

    fn get_snapshot(&self) -> Result<Option<Vec<u8>>, SnapshotStoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SnapshotStoreError::Io(err)),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
