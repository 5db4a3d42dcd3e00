use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key {0} does not exist")]
    NotFound(String),

    #[error("store file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error encoding store contents: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Keyed persistence for tasks and task events. Keys are identifier
/// strings; `get` on a missing key fails with [`StoreError::NotFound`].
pub trait Store<T> {
    fn put(&mut self, key: &str, value: T) -> Result<(), StoreError>;
    fn get(&self, key: &str) -> Result<T, StoreError>;
    fn list(&self) -> Result<Vec<T>, StoreError>;
    fn count(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore<T> {
    db: HashMap<String, T>,
}

impl<T> InMemoryStore<T> {
    pub fn new() -> Self {
        InMemoryStore { db: HashMap::new() }
    }
}

impl<T: Clone> Store<T> for InMemoryStore<T> {
    fn put(&mut self, key: &str, value: T) -> Result<(), StoreError> {
        self.db.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<T, StoreError> {
        self.db
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn list(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.db.values().cloned().collect())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.db.len())
    }
}

/// Disk-backed store: the whole keyed collection lives in one JSON
/// document, loaded on open and rewritten on every put. Survives process
/// restarts, promises nothing beyond put/get/list/count.
#[derive(Debug)]
pub struct FileStore<T> {
    path: PathBuf,
    db: HashMap<String, T>,
}

impl<T: Clone + Serialize + DeserializeOwned> FileStore<T> {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let db = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };

        Ok(FileStore { path, db })
    }

    fn flush(&self) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&self.db)?;
        std::fs::write(&self.path, bytes).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl<T: Clone + Serialize + DeserializeOwned> Store<T> for FileStore<T> {
    fn put(&mut self, key: &str, value: T) -> Result<(), StoreError> {
        self.db.insert(key.to_string(), value);
        self.flush()
    }

    fn get(&self, key: &str) -> Result<T, StoreError> {
        self.db
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn list(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.db.values().cloned().collect())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.db.len())
    }
}

/// Which store backend a runtime component should own.
#[derive(Debug, Clone)]
pub enum StoreKind {
    Memory,
    File(PathBuf),
}

impl StoreKind {
    /// Opens a store named `name` under this backend. The name keys the
    /// on-disk file; in-memory stores ignore it.
    pub fn open<T>(&self, name: &str) -> Result<Box<dyn Store<T> + Send>, StoreError>
    where
        T: Clone + Serialize + DeserializeOwned + Send + 'static,
    {
        match self {
            StoreKind::Memory => Ok(Box::new(InMemoryStore::new())),
            StoreKind::File(dir) => {
                let path = Path::new(dir).join(format!("{name}.json"));
                Ok(Box::new(FileStore::open(path)?))
            }
        }
    }
}
