use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::Mutex,
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use strum_macros::{AsRefStr, EnumString};
use thiserror::Error;

/// Keys used for persisting client state to storage.
#[derive(Debug, Clone, Copy, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageKey {
    /// Unique identifier for this client, generated once
    ClientId,
    /// The active admin session, if any
    AdminSession,
    /// The admin's locally-gated user data set
    LocalUsers,
    /// Whether data loads should go to the backend or the local data set
    UseServerData,
}

impl From<StorageKey> for String {
    fn from(value: StorageKey) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_ref().fmt(f)
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read storage file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse storage file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Storage directory not found")]
    StorageDirNotFound,
}

/// JSON-file-backed key/value store for client-held state.
///
/// Values are kept in memory and flushed to the backing file on every write.
/// A single `Storage` instance is assumed to be the only writer of its file.
#[derive(Debug)]
pub struct Storage {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl Storage {
    /// Opens the store at `path`, loading existing values if the file exists.
    ///
    /// # Errors
    ///
    /// * If the storage file exists but cannot be read
    /// * If the storage file is malformed
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();

        let values = if path.is_file() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Opens the store at its default location in the `UserManager` config
    /// directory (`state.json`).
    ///
    /// # Errors
    ///
    /// * If the config directory cannot be determined or created
    /// * If the storage file exists but cannot be read or parsed
    pub fn from_config_dir() -> Result<Self, StorageError> {
        let dir = usermanager_config::make_config_dir_path()
            .ok_or(StorageError::StorageDirNotFound)?;

        Self::new(dir.join("state.json"))
    }

    /// Gets the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// * If the stored value cannot be deserialized into `T`
    ///
    /// # Panics
    ///
    /// * If the internal `Mutex` is poisoned
    pub fn get<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Option<T>, StorageError> {
        let value = self.values.lock().unwrap().get(key.as_ref()).cloned();

        value
            .map(|x| serde_json::from_value(x))
            .transpose()
            .map_err(Into::into)
    }

    /// Stores `value` under `key` and flushes to disk.
    ///
    /// # Errors
    ///
    /// * If the value cannot be serialized
    /// * If the storage file cannot be written
    ///
    /// # Panics
    ///
    /// * If the internal `Mutex` is poisoned
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: StorageKey,
        value: &T,
    ) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap();
        values.insert(key.to_string(), serde_json::to_value(value)?);
        self.persist(&values)
    }

    /// Removes and returns the value stored under `key`, flushing to disk.
    ///
    /// # Errors
    ///
    /// * If the stored value cannot be deserialized into `T`
    /// * If the storage file cannot be written
    ///
    /// # Panics
    ///
    /// * If the internal `Mutex` is poisoned
    pub fn take<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Option<T>, StorageError> {
        let mut values = self.values.lock().unwrap();
        let value = values.remove(key.as_ref());
        self.persist(&values)?;
        drop(values);

        value
            .map(|x| serde_json::from_value(x))
            .transpose()
            .map_err(Into::into)
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.is_dir()
        {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&self.path, serde_json::to_string_pretty(values)?)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_get_returns_none_for_missing_key() {
        let temp = tempfile::tempdir().unwrap();
        let storage = Storage::new(temp.path().join("state.json")).unwrap();

        assert_eq!(storage.get::<String>(StorageKey::ClientId).unwrap(), None);
    }

    #[test]
    fn test_set_then_get_round_trips() {
        let temp = tempfile::tempdir().unwrap();
        let storage = Storage::new(temp.path().join("state.json")).unwrap();

        storage.set(StorageKey::ClientId, "client_1").unwrap();

        assert_eq!(
            storage.get::<String>(StorageKey::ClientId).unwrap(),
            Some("client_1".to_string())
        );
    }

    #[test]
    fn test_values_survive_reopening_the_store() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("state.json");

        {
            let storage = Storage::new(&path).unwrap();
            storage.set(StorageKey::UseServerData, &true).unwrap();
        }

        let storage = Storage::new(&path).unwrap();
        assert_eq!(
            storage.get::<bool>(StorageKey::UseServerData).unwrap(),
            Some(true)
        );
    }

    #[test]
    fn test_take_removes_the_value() {
        let temp = tempfile::tempdir().unwrap();
        let storage = Storage::new(temp.path().join("state.json")).unwrap();

        storage.set(StorageKey::ClientId, "client_1").unwrap();

        assert_eq!(
            storage.take::<String>(StorageKey::ClientId).unwrap(),
            Some("client_1".to_string())
        );
        assert_eq!(storage.get::<String>(StorageKey::ClientId).unwrap(), None);
    }

    #[test]
    fn test_mismatched_type_is_a_parse_error() {
        let temp = tempfile::tempdir().unwrap();
        let storage = Storage::new(temp.path().join("state.json")).unwrap();

        storage.set(StorageKey::ClientId, "client_1").unwrap();

        assert!(matches!(
            storage.get::<u64>(StorageKey::ClientId),
            Err(StorageError::Parse(_))
        ));
    }
}
