//! The upload queue directory.
//!
//! Records carry credentials, so every file is created owner-only and the
//! directory itself is restricted to the owner. Writes go to a temporary
//! file in the same directory which is then renamed over the record, so a
//! reader never observes a half-written record.
//!
//! All mutations from one process are serialized through an internal lock.
//! Two processes writing the same directory are not coordinated.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use lifted_core::{CoreError, JobId, JobRecord};

use crate::error::StoreError;

/// Prefix of in-flight temporary files. Never a valid UUID, so `list`
/// skips them.
const TEMP_PREFIX: &str = ".tmp-";

/// Durable, file-per-record job storage.
#[derive(Debug)]
pub struct JobStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JobStore {
    /// Open the queue directory, creating it if absent.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        restrict_permissions(&dir, 0o700)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist the full record, atomically replacing any previous version.
    pub fn put(&self, record: &JobRecord) -> Result<(), StoreError> {
        let _guard = self.lock();
        self.write(record)
    }

    /// Load one record.
    pub fn get(&self, id: JobId) -> Result<JobRecord, StoreError> {
        let bytes = match fs::read(self.path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NotFound(id)),
            Err(e) => return Err(StoreError::Io(e)),
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt { id, source })
    }

    /// Ids of every record file in the directory, in no particular order.
    pub fn list(&self) -> Result<Vec<JobId>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| uuid::Uuid::parse_str(n).ok()) else {
                continue;
            };
            ids.push(id);
        }
        Ok(ids)
    }

    /// Load every readable record, skipping missing and corrupt ones.
    ///
    /// Only a failure to list the directory itself is an error.
    pub fn load_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        let mut records = Vec::new();
        for id in self.list()? {
            match self.get(id) {
                Ok(record) => records.push(record),
                Err(e) if e.is_skippable() => {
                    tracing::warn!(job_id = %id, error = %e, "Skipping unreadable upload record");
                }
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "Failed to read upload record");
                }
            }
        }
        Ok(records)
    }

    /// Remove a record.
    pub fn delete(&self, id: JobId) -> Result<(), StoreError> {
        let _guard = self.lock();
        match fs::remove_file(self.path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Remove a record only if `check` accepts its current state.
    ///
    /// The check and the removal happen under the store lock, so no other
    /// mutation from this process can slip in between.
    pub fn delete_if<E, F>(&self, id: JobId, check: F) -> Result<(), E>
    where
        E: From<StoreError>,
        F: FnOnce(&JobRecord) -> Result<(), E>,
    {
        let _guard = self.lock();
        let record = self.get(id)?;
        check(&record)?;
        fs::remove_file(self.path(id)).map_err(StoreError::Io)?;
        Ok(())
    }

    /// Read-modify-persist one record under the store lock.
    ///
    /// `mutate` works on a copy; when it fails, or when persisting fails,
    /// the stored record is unchanged and the error is returned. On success
    /// the persisted record is returned.
    pub fn update<F>(&self, id: JobId, mutate: F) -> Result<JobRecord, StoreError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), CoreError>,
    {
        let _guard = self.lock();
        let mut record = self.get(id)?;
        mutate(&mut record)?;
        self.write(&record)?;
        Ok(record)
    }

    fn path(&self, id: JobId) -> PathBuf {
        self.dir.join(id.to_string())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no torn state.
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self, record: &JobRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record).map_err(StoreError::Serialize)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)?;
        restrict_permissions(tmp.path(), 0o600)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(record.id()))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
