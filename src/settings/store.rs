//! # Configuration Store
//!
//! Owns the current value of every setting, with a write-back cache over a
//! [`KeyValueBackend`].
//!
//! This module handles:
//! - Loading all settings from the backing store (defaults for absent keys)
//! - Validating and normalizing every mutation
//! - Tracking which entries differ from what is persisted
//! - Batching mutations into one write with transactions
//! - Rendering groups as `key=value` lines for reporting

use tracing::{debug, info, warn};

use super::backend::{KeyValueBackend, CONFIG_NAMESPACE};
use super::table::{Setting, SettingGroup, SettingRegistry};
use crate::error::{ErrorKind, Result};

#[derive(Debug, Clone, Default)]
struct Entry {
    /// Current value, always canonical once set through the store.
    value: String,
    /// Value last known to be in the backing store (default if absent).
    saved: String,
    /// `false` until loaded, and again after a cancelled transaction.
    cached: bool,
}

impl Entry {
    fn is_dirty(&self) -> bool {
        self.cached && self.value != self.saved
    }
}

/// Validated, persisted settings registry.
pub struct ConfigStore {
    registry: SettingRegistry,
    backend: Box<dyn KeyValueBackend>,
    entries: Vec<Entry>,
    in_transaction: bool,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("settings", &self.registry.len())
            .field("in_transaction", &self.in_transaction)
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// Create a store over the device setting table.
    ///
    /// Nothing is read until [`ConfigStore::load`] or the first `get`.
    pub fn new(backend: Box<dyn KeyValueBackend>) -> Self {
        Self::with_registry(SettingRegistry::device(), backend)
    }

    pub fn with_registry(registry: SettingRegistry, backend: Box<dyn KeyValueBackend>) -> Self {
        let entries = vec![Entry::default(); registry.len()];
        Self {
            registry,
            backend,
            entries,
            in_transaction: false,
        }
    }

    pub fn registry(&self) -> &SettingRegistry {
        &self.registry
    }

    /// Populate every cached value from the backing store.
    ///
    /// Absent keys take their default. All dirty marks are cleared and any
    /// open transaction is closed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::NodeError::StoreBusy`] if the backing store
    /// cannot be opened. Nothing downstream can run without settings, so
    /// callers treat this as fatal for the boot.
    pub fn load(&mut self) -> Result<()> {
        let persisted = self.backend.read_namespace(CONFIG_NAMESPACE)?;

        for (setting, entry) in self.registry.iter().zip(self.entries.iter_mut()) {
            let value = persisted
                .get(setting.key)
                .cloned()
                .unwrap_or_else(|| setting.default.to_string());
            *entry = Entry {
                saved: value.clone(),
                value,
                cached: true,
            };
        }
        self.in_transaction = false;

        info!(
            "Loaded {} settings ({} persisted)",
            self.entries.len(),
            persisted.len()
        );
        Ok(())
    }

    fn ensure_cached(&mut self, idx: usize) -> Result<()> {
        if self.entries[idx].cached {
            return Ok(());
        }
        let setting = self.registry.by_index(idx).map(|s| (s.key, s.default));
        if let Some((key, default)) = setting {
            let value = self
                .backend
                .get(CONFIG_NAMESPACE, key)?
                .unwrap_or_else(|| default.to_string());
            self.entries[idx] = Entry {
                saved: value.clone(),
                value,
                cached: true,
            };
        }
        Ok(())
    }

    /// Current value of `key`, loading it lazily if the cache entry is invalid.
    ///
    /// Returns `None` for an unknown key. If the backing store cannot be read
    /// the default is returned and the entry stays uncached.
    pub fn get(&mut self, key: &str) -> Option<String> {
        let idx = self.registry.index_of(key)?;
        self.get_by_index(idx)
    }

    pub fn get_by_index(&mut self, idx: usize) -> Option<String> {
        let setting = self.registry.by_index(idx)?;
        if let Err(e) = self.ensure_cached(idx) {
            warn!("Could not load '{}', using default: {}", setting.key, e);
            return Some(setting.default.to_string());
        }
        Some(self.entries[idx].value.clone())
    }

    /// Check `raw` against the setting's length limit and validator.
    ///
    /// An empty value stands for the setting's default.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Canonical value that `set` would store
    /// * `Err(ErrorKind)` - `KeyError`, `LengthError` or the validator's rejection
    pub fn validate(&self, key: &str, raw: &str) -> std::result::Result<String, ErrorKind> {
        let setting = self.registry.by_key(key).ok_or(ErrorKind::KeyError)?;
        canonicalize(setting, raw)
    }

    /// Apply a raw value to `key`.
    ///
    /// A rejected value leaves the store unchanged. An accepted value that
    /// differs from the current one is marked dirty and, outside a
    /// transaction, persisted immediately.
    ///
    /// # Arguments
    ///
    /// * `key` - Setting key
    /// * `raw` - Raw input; empty restores the default
    ///
    /// # Returns
    ///
    /// * `ErrorKind::NoError` on success, the rejecting kind otherwise.
    ///   A failed auto-save rolls the change back and reports `BusyError`.
    pub fn set(&mut self, key: &str, raw: &str) -> ErrorKind {
        match self.registry.index_of(key) {
            Some(idx) => self.set_by_index(idx, raw),
            None => {
                warn!("Rejected unknown setting '{}'", key);
                ErrorKind::KeyError
            }
        }
    }

    pub fn set_by_index(&mut self, idx: usize, raw: &str) -> ErrorKind {
        let Some(setting) = self.registry.by_index(idx) else {
            return ErrorKind::KeyError;
        };

        let canonical = match canonicalize(setting, raw) {
            Ok(value) => value,
            Err(kind) => {
                warn!("Rejected {}={:?}: {}", setting.key, raw, kind);
                return kind;
            }
        };

        if let Err(e) = self.ensure_cached(idx) {
            warn!("Cannot set '{}': {}", setting.key, e);
            return ErrorKind::BusyError;
        }
        if self.entries[idx].value == canonical {
            return ErrorKind::NoError;
        }

        let previous = std::mem::replace(&mut self.entries[idx].value, canonical);
        debug!("{} = {}", setting.key, self.entries[idx].value);

        if !self.in_transaction {
            if let Err(e) = self.save() {
                warn!("Auto-save of '{}' failed, rolling back: {}", setting.key, e);
                self.entries[idx].value = previous;
                return ErrorKind::BusyError;
            }
        }
        ErrorKind::NoError
    }

    /// Persist every dirty entry in a single write.
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of entries written
    pub fn save(&mut self) -> Result<usize> {
        let dirty: Vec<(&str, String)> = self
            .registry
            .iter()
            .zip(&self.entries)
            .filter(|(_, entry)| entry.is_dirty())
            .map(|(setting, entry)| (setting.key, entry.value.clone()))
            .collect();

        if dirty.is_empty() {
            return Ok(0);
        }

        let pairs: Vec<(&str, &str)> = dirty.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.backend.write_entries(CONFIG_NAMESPACE, &pairs)?;

        for entry in self.entries.iter_mut().filter(|e| e.is_dirty()) {
            entry.saved = entry.value.clone();
        }
        info!("Saved {} settings", dirty.len());
        Ok(dirty.len())
    }

    /// Persist one entry if it is dirty. Returns whether anything was written.
    pub fn save_setting(&mut self, key: &str) -> Result<bool> {
        let Some(idx) = self.registry.index_of(key) else {
            return Ok(false);
        };
        if !self.entries[idx].is_dirty() {
            return Ok(false);
        }
        let value = self.entries[idx].value.clone();
        self.backend
            .write_entries(CONFIG_NAMESPACE, &[(key, value.as_str())])?;
        self.entries[idx].saved = value;
        Ok(true)
    }

    /// Hold back persistence until [`ConfigStore::commit_transaction`].
    pub fn begin_transaction(&mut self) {
        self.in_transaction = true;
    }

    /// Close the transaction and persist its changes in one write.
    pub fn commit_transaction(&mut self) -> Result<usize> {
        self.in_transaction = false;
        self.save()
    }

    /// Close the transaction and discard its changes.
    ///
    /// Dirty entries are invalidated and reloaded from the backing store on
    /// next access.
    pub fn cancel_transaction(&mut self) {
        self.in_transaction = false;
        let mut discarded = 0;
        for entry in self.entries.iter_mut().filter(|e| e.is_dirty()) {
            entry.cached = false;
            discarded += 1;
        }
        debug!("Cancelled transaction, discarded {} changes", discarded);
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Set every setting back to its default without persisting.
    pub fn reset_to_defaults(&mut self) {
        for idx in 0..self.entries.len() {
            if self.ensure_cached(idx).is_err() {
                // Persisted value unknown: force a write.
                self.entries[idx].saved = "\0".to_string();
                self.entries[idx].cached = true;
            }
            if let Some(setting) = self.registry.by_index(idx) {
                self.entries[idx].value = setting.default.to_string();
            }
        }
    }

    /// Set every setting back to its default and persist.
    pub fn reset_to_defaults_and_save(&mut self) -> Result<usize> {
        self.reset_to_defaults();
        self.save()
    }

    /// Remove a whole namespace from the backing store.
    ///
    /// Erasing the settings namespace invalidates the cache so every setting
    /// reads back as its default.
    pub fn erase_namespace(&mut self, namespace: &str) -> Result<()> {
        self.backend.erase_namespace(namespace)?;
        if namespace == CONFIG_NAMESPACE {
            for entry in self.entries.iter_mut() {
                entry.cached = false;
            }
        }
        info!("Erased namespace '{}'", namespace);
        Ok(())
    }

    pub fn metadata(&self, key: &str) -> Option<&'static Setting> {
        self.registry.by_key(key)
    }

    /// `true` if any entry differs from the backing store.
    pub fn is_dirty(&self) -> bool {
        self.entries.iter().any(Entry::is_dirty)
    }

    pub fn is_setting_dirty(&self, key: &str) -> bool {
        self.registry
            .index_of(key)
            .map(|idx| self.entries[idx].is_dirty())
            .unwrap_or(false)
    }

    /// Render a group as `key=value` lines.
    pub fn print_group(&mut self, group: SettingGroup) -> String {
        let indices: Vec<usize> = (0..self.registry.len())
            .filter(|&idx| {
                self.registry
                    .by_index(idx)
                    .map(|s| s.group == group)
                    .unwrap_or(false)
            })
            .collect();

        let mut out = String::new();
        for idx in indices {
            if let (Some(setting), Some(value)) =
                (self.registry.by_index(idx), self.get_by_index(idx))
            {
                out.push_str(setting.key);
                out.push('=');
                out.push_str(&value);
                out.push('\n');
            }
        }
        out
    }

    /// Render every group, each under a `[Group]` heading.
    pub fn print_all(&mut self) -> String {
        let mut out = String::new();
        for group in SettingGroup::ALL {
            out.push_str(&format!("[{}]\n", group));
            out.push_str(&self.print_group(group));
        }
        out
    }
}

fn canonicalize(setting: &Setting, raw: &str) -> std::result::Result<String, ErrorKind> {
    if raw.is_empty() {
        return Ok(setting.default.to_string());
    }
    if setting.max_length > 0 && raw.chars().count() > setting.max_length {
        return Err(ErrorKind::LengthError);
    }
    (setting.validator)(raw)
}
