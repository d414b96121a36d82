//! Small key-value storage for state that should survive restarts.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not read {0:?}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("could not write {0:?}")]
    Write(#[source] std::io::Error, PathBuf),
    #[error("{0:?} does not contain a JSON object")]
    Parse(#[source] serde_json::Error, PathBuf),
    #[error("could not convert the stored value of `{0}`")]
    Convert(#[source] serde_json::Error, String),
}

pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, Error>;
    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), Error>;
    fn contains(&self, key: &str) -> Result<bool, Error> {
        Ok(self.get(key)?.is_some())
    }
}

type Map = BTreeMap<String, serde_json::Value>;

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<Map>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        Ok(self.values.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), Error> {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).insert(key.to_string(), value);
        Ok(())
    }
}

/// All keys in a single JSON object on disk, rewritten in full on every `set`.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<Map>,
}

impl JsonFileStore {
    /// Load the file, or start out empty if it does not exist yet.
    pub fn open(path: PathBuf) -> Result<Self, Error> {
        let values = match std::fs::read(&path) {
            Ok(contents) => {
                serde_json::from_slice(&contents).map_err(|e| Error::Parse(e, path.clone()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(message = "no stored state yet", path = %path.display());
                Map::new()
            }
            Err(e) => return Err(Error::Read(e, path)),
        };
        Ok(Self { path, values: Mutex::new(values) })
    }
}

impl JsonFileStore {
    fn persist(&self, values: &Map, key: &str) -> Result<(), Error> {
        let contents =
            serde_json::to_vec_pretty(values).map_err(|e| Error::Convert(e, key.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::Write(e, self.path.clone()))?;
        }
        // Replace the file atomically.
        let temporary = self.path.with_extension("tmp");
        std::fs::write(&temporary, contents).map_err(|e| Error::Write(e, temporary.clone()))?;
        std::fs::rename(&temporary, &self.path).map_err(|e| Error::Write(e, self.path.clone()))
    }
}

impl Store for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        Ok(self.values.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), Error> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let mut updated = values.clone();
        updated.insert(key.to_string(), value);
        self.persist(&updated, key)?;
        *values = updated;
        Ok(())
    }
}

/// A view of a [`Store`] in which every key is prefixed with a device identity.
#[derive(Clone)]
pub struct ScopedStore {
    inner: Arc<dyn Store>,
    scope: String,
}

impl ScopedStore {
    pub fn new(inner: Arc<dyn Store>, scope: impl Into<String>) -> Self {
        Self { inner, scope: scope.into() }
    }

    fn key(&self, key: &str) -> String {
        format!("{}/{key}", self.scope)
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        let key = self.key(key);
        self.inner
            .get(&key)?
            .map(|v| serde_json::from_value(v).map_err(|e| Error::Convert(e, key)))
            .transpose()
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), Error> {
        let key = self.key(key);
        let value = serde_json::to_value(value).map_err(|e| Error::Convert(e, key.clone()))?;
        self.inner.set(&key, value)
    }

    pub fn contains(&self, key: &str) -> Result<bool, Error> {
        self.inner.contains(&self.key(key))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scopes_do_not_mix() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let a = ScopedStore::new(store.clone(), "tcp:a");
        let b = ScopedStore::new(store.clone(), "tcp:b");
        a.save("alarms", &BTreeMap::from([("filter", "active")])).unwrap();
        assert!(a.contains("alarms").unwrap());
        assert!(!b.contains("alarms").unwrap());
        assert!(store.contains("tcp:a/alarms").unwrap());
        let loaded: Option<BTreeMap<String, String>> = a.load("alarms").unwrap();
        assert_eq!(loaded.unwrap()["filter"], "active");
        assert_eq!(b.load::<BTreeMap<String, String>>("alarms").unwrap(), None);
    }

    #[test]
    fn mismatched_types_are_errors() {
        let scoped = ScopedStore::new(Arc::new(MemoryStore::new()), "x");
        scoped.save("functions", &"not a map").unwrap();
        assert!(matches!(
            scoped.load::<BTreeMap<String, bool>>("functions"),
            Err(Error::Convert(_, key)) if key == "x/functions"
        ));
    }
}
