// Configuration module
//
// This module contains all configuration-related functionality split into focused submodules:
// - types: Moon snapshot structures and their pure mutations
// - loader: JSON file loading and saving, file-backed repository
// - validator: Snapshot validation logic
// - settings: Application settings file
// - watcher: Moon file watching

pub mod loader;
pub mod settings;
pub mod types;
pub mod validator;
pub mod watcher;

pub use loader::JsonFileRepository;
pub use settings::Settings;
pub use types::{CATCH_ALL, GroupKind, LOCAL_GROUP_UID, MoonConfig, MoonPatch, ProxyGroup, ProxyNode, Rule};
