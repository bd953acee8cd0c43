//! Proxy group, node and routing-rule store.
//!
//! Holds the "Moon" configuration (proxy groups with their nodes, plus an
//! ordered list of process rules), applies edits to it, and keeps two
//! backends in step on every edit: the persisted Moon snapshot and the
//! proxies/rules configuration loaded by the proxy engine.

pub mod config;
pub mod engine;
pub mod error;
pub mod store;
pub mod translate;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use config::{MoonConfig, ProxyGroup, ProxyNode, Rule, Settings};
pub use error::{MoonError, MoonResult};
pub use store::{ConfigStore, Snapshot, StoreOptions};
pub use translate::{ClashConfig, RuleDialect, translate};
