use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::IdentityStoreError;
use crate::paths::{identity_path, temp_path};
use crate::schema::{IdentityRecord, IDENTITY_VERSION};

/// File-backed store for the local user identity.
///
/// The identity is created lazily on the first [`IdentityStore::resolve_identity`] call
/// and never rewritten afterwards. A record that fails validation is reported and left
/// untouched on disk.
pub struct IdentityStore {
    path: PathBuf,
    cached: Mutex<Option<String>>,
}

impl IdentityStore {
    #[must_use]
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::at_path(identity_path(data_dir))
    }

    /// Store under the platform data directory.
    pub fn default_location() -> Result<Self, IdentityStoreError> {
        let data_dir = dirs::data_dir().ok_or(IdentityStoreError::NoDataDir)?;
        Ok(Self::in_dir(&data_dir))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and validates the persisted record. A missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<IdentityRecord>, IdentityStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(IdentityStoreError::io(
                    "reading identity record",
                    &self.path,
                    source,
                ))
            }
        };

        let record = serde_json::from_str::<IdentityRecord>(&raw)
            .map_err(|source| IdentityStoreError::parse(&self.path, source))?;
        validate_record(&self.path, &record)?;
        Ok(Some(record))
    }

    /// Returns the persisted identity, creating and persisting one on first use.
    pub fn resolve_identity(&self) -> Result<String, IdentityStoreError> {
        let mut cached = lock_unpoisoned(&self.cached);
        if let Some(user_id) = cached.as_ref() {
            return Ok(user_id.clone());
        }

        let record = match self.load()? {
            Some(record) => record,
            None => self.persist_new()?,
        };
        *cached = Some(record.user_id.clone());
        Ok(record.user_id)
    }

    fn persist_new(&self) -> Result<IdentityRecord, IdentityStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| {
                IdentityStoreError::io("creating identity directory", parent, source)
            })?;
        }

        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(IdentityStoreError::ClockFormat)?;
        let record = IdentityRecord::v1(Uuid::new_v4().to_string(), created_at);
        let mut contents = serde_json::to_string_pretty(&record)
            .map_err(|source| IdentityStoreError::serialize(&self.path, source))?;
        contents.push('\n');

        let temp = temp_path(&self.path, &Uuid::new_v4().simple().to_string());
        write_synced(&temp, contents.as_bytes())?;

        // hard_link refuses to replace an existing file, so a concurrent writer that got
        // there first keeps its record.
        match fs::hard_link(&temp, &self.path) {
            Ok(()) => {
                let _ = fs::remove_file(&temp);
                Ok(record)
            }
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp);
                self.load()?.ok_or_else(|| {
                    IdentityStoreError::io("reading identity record", &self.path, error)
                })
            }
            Err(_) => {
                fs::rename(&temp, &self.path).map_err(|source| {
                    let _ = fs::remove_file(&temp);
                    IdentityStoreError::io("installing identity record", &self.path, source)
                })?;
                Ok(record)
            }
        }
    }
}

fn write_synced(path: &Path, contents: &[u8]) -> Result<(), IdentityStoreError> {
    let mut file = File::create(path)
        .map_err(|source| IdentityStoreError::io("creating identity temp file", path, source))?;
    file.write_all(contents)
        .map_err(|source| IdentityStoreError::io("writing identity temp file", path, source))?;
    file.sync_all()
        .map_err(|source| IdentityStoreError::io("syncing identity temp file", path, source))
}

pub(crate) fn validate_record(
    path: &Path,
    record: &IdentityRecord,
) -> Result<(), IdentityStoreError> {
    if record.version != IDENTITY_VERSION {
        return Err(IdentityStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: record.version,
        });
    }

    if record.user_id.trim().is_empty() {
        return Err(IdentityStoreError::EmptyUserId {
            path: path.to_path_buf(),
        });
    }

    if OffsetDateTime::parse(&record.created_at, &Rfc3339).is_err() {
        return Err(IdentityStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            value: record.created_at.clone(),
        });
    }

    Ok(())
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
