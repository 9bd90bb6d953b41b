//! # Settings Module
//!
//! The device configuration: a static table of settings, their validators,
//! a write-back store over namespaced persistence, and a typed view.
//!
//! This module handles:
//! - Defining every setting with its group, default and validator
//! - Normalizing raw input to canonical values
//! - Persisting only entries that changed
//! - Parsing the canonical strings into explicit enums

pub mod backend;
pub mod store;
pub mod table;
pub mod typed;
pub mod validators;
pub mod values;

pub use backend::{FileBackend, KeyValueBackend, CONFIG_NAMESPACE, RADIO_NAMESPACE};
pub use store::ConfigStore;
pub use table::{keys, Setting, SettingGroup, SettingRegistry, SETTINGS};
pub use typed::NodeSettings;
