use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{internal_error, DlResult};

/// Key-value storage backing the credential state.
///
/// Implementations must make each individual `get`/`set`/`remove` atomic; callers namespace
/// keys by application id so one store can serve several clients.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> DlResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> DlResult<()>;
    fn remove(&self, key: &str) -> DlResult<()>;
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn get(&self, key: &str) -> DlResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> DlResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> DlResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Stores every key in a single JSON object on disk.
#[derive(Clone)]
pub struct FileCredentialStore {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for FileCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCredentialStore")
            .field("path", &self.path)
            .finish()
    }
}

impl FileCredentialStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Arc::new(path.as_ref().to_path_buf()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn read_all(&self) -> DlResult<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let mut file = File::open(&*self.path).map_err(|err| {
            internal_error(format!("Failed to open credential file: {err}"))
        })?;
        let mut buffer = String::new();
        file.read_to_string(&mut buffer).map_err(|err| {
            internal_error(format!("Failed to read credential file: {err}"))
        })?;
        if buffer.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&buffer)
            .map_err(|err| internal_error(format!("Failed to parse credential file: {err}")))
    }

    fn write_all(&self, values: &HashMap<String, String>) -> DlResult<()> {
        if values.is_empty() {
            if self.path.exists() {
                fs::remove_file(&*self.path).map_err(|err| {
                    internal_error(format!("Failed to remove credential file: {err}"))
                })?;
            }
            return Ok(());
        }
        let serialized = serde_json::to_string(values).map_err(|err| {
            internal_error(format!("Failed to serialize credentials: {err}"))
        })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                internal_error(format!("Failed to create credential directory: {err}"))
            })?;
        }
        let mut file = File::create(&*self.path).map_err(|err| {
            internal_error(format!("Failed to create credential file: {err}"))
        })?;
        file.write_all(serialized.as_bytes())
            .map_err(|err| internal_error(format!("Failed to write credential file: {err}")))
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: &str) -> DlResult<Option<String>> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> DlResult<()> {
        let _guard = self.lock.lock().unwrap();
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn remove(&self, key: &str) -> DlResult<()> {
        let _guard = self.lock.lock().unwrap();
        let mut values = self.read_all()?;
        if values.remove(key).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}
