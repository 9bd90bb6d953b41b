//! # Backing Store
//!
//! Namespaced key/value persistence behind the configuration store.
//!
//! One namespace holds every setting as a string; a second namespace holds
//! opaque radio session material that only the radio collaborator writes.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{NodeError, Result};

/// Namespace holding all settings.
pub const CONFIG_NAMESPACE: &str = "config";

/// Namespace holding radio session and nonce material.
pub const RADIO_NAMESPACE: &str = "radiolib";

type Namespaces = BTreeMap<String, BTreeMap<String, String>>;

/// Persistent namespaced string store.
pub trait KeyValueBackend: Send {
    /// Read every entry of a namespace. A missing namespace reads as empty.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::StoreBusy`] if the store cannot be opened.
    fn read_namespace(&self, namespace: &str) -> Result<BTreeMap<String, String>>;

    /// Read one entry.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self.read_namespace(namespace)?.remove(key))
    }

    /// Persist `entries` into `namespace` as a single write.
    fn write_entries(&mut self, namespace: &str, entries: &[(&str, &str)]) -> Result<()>;

    /// Remove a namespace and everything in it.
    fn erase_namespace(&mut self, namespace: &str) -> Result<()>;
}

/// File-backed store: one TOML document of namespace tables.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Namespaces> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Namespaces::new()),
            Err(e) => {
                return Err(NodeError::StoreBusy(format!(
                    "cannot open {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        toml::from_str(&contents).map_err(|e| {
            NodeError::StoreBusy(format!("cannot parse {}: {}", self.path.display(), e))
        })
    }

    fn write_all(&self, namespaces: &Namespaces) -> Result<()> {
        let contents = toml::to_string(namespaces)
            .map_err(|e| NodeError::StoreBusy(format!("cannot encode store: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Replace atomically so a power loss never leaves half a file.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueBackend for FileBackend {
    fn read_namespace(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.read_all()?.remove(namespace).unwrap_or_default())
    }

    fn write_entries(&mut self, namespace: &str, entries: &[(&str, &str)]) -> Result<()> {
        let mut all = self.read_all()?;
        let table = all.entry(namespace.to_string()).or_default();
        for (key, value) in entries {
            table.insert((*key).to_string(), (*value).to_string());
        }
        self.write_all(&all)?;
        debug!(
            "Wrote {} entries to namespace '{}' in {}",
            entries.len(),
            namespace,
            self.path.display()
        );
        Ok(())
    }

    fn erase_namespace(&mut self, namespace: &str) -> Result<()> {
        let mut all = self.read_all()?;
        if all.remove(namespace).is_some() {
            self.write_all(&all)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory backend that records every write.
    #[derive(Clone, Default)]
    pub struct MemoryBackend {
        pub namespaces: Arc<Mutex<Namespaces>>,
        pub writes: Arc<Mutex<Vec<Vec<String>>>>,
        pub unavailable: Arc<Mutex<bool>>,
    }

    impl MemoryBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_entries(namespace: &str, entries: &[(&str, &str)]) -> Self {
            let backend = Self::new();
            {
                let mut all = backend.namespaces.lock().unwrap();
                let table = all.entry(namespace.to_string()).or_default();
                for (k, v) in entries {
                    table.insert(k.to_string(), v.to_string());
                }
            }
            backend
        }

        /// Number of write operations performed.
        pub fn write_count(&self) -> usize {
            self.writes.lock().unwrap().len()
        }

        /// Keys written by the most recent write.
        pub fn last_written_keys(&self) -> Vec<String> {
            self.writes.lock().unwrap().last().cloned().unwrap_or_default()
        }

        pub fn stored(&self, namespace: &str, key: &str) -> Option<String> {
            self.namespaces
                .lock()
                .unwrap()
                .get(namespace)
                .and_then(|t| t.get(key).cloned())
        }

        pub fn set_unavailable(&self, unavailable: bool) {
            *self.unavailable.lock().unwrap() = unavailable;
        }

        fn check(&self) -> Result<()> {
            if *self.unavailable.lock().unwrap() {
                return Err(NodeError::StoreBusy("mock store unavailable".to_string()));
            }
            Ok(())
        }
    }

    impl KeyValueBackend for MemoryBackend {
        fn read_namespace(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
            self.check()?;
            Ok(self
                .namespaces
                .lock()
                .unwrap()
                .get(namespace)
                .cloned()
                .unwrap_or_default())
        }

        fn write_entries(&mut self, namespace: &str, entries: &[(&str, &str)]) -> Result<()> {
            self.check()?;
            let mut all = self.namespaces.lock().unwrap();
            let table = all.entry(namespace.to_string()).or_default();
            for (k, v) in entries {
                table.insert(k.to_string(), v.to_string());
            }
            self.writes
                .lock()
                .unwrap()
                .push(entries.iter().map(|(k, _)| k.to_string()).collect());
            Ok(())
        }

        fn erase_namespace(&mut self, namespace: &str) -> Result<()> {
            self.check()?;
            self.namespaces.lock().unwrap().remove(namespace);
            Ok(())
        }
    }
}
