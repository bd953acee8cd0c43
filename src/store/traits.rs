//! Collaborators the store reads from and writes to

use async_trait::async_trait;

use crate::config::types::{MoonConfig, MoonPatch, ProxyGroup};
use crate::error::MoonResult;
use crate::translate::ClashConfig;

/// Durable storage of the raw Moon snapshot.
///
/// Implementations:
/// - `JsonFileRepository`: a pretty-printed JSON file
#[async_trait]
pub trait MoonRepository: Send + Sync {
    /// Read the persisted snapshot. May return a cached value.
    async fn load(&self) -> MoonResult<MoonConfig>;

    /// Store the fields present in `patch`, keeping the others.
    async fn patch(&self, patch: MoonPatch) -> MoonResult<()>;
}

/// The running proxy engine.
///
/// Implementations:
/// - `YamlFileEngine`: writes the rendered config where the engine loads it
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    /// Replace the engine's proxies and rules with `config`.
    async fn apply(&self, config: &ClashConfig) -> MoonResult<()>;
}

/// Source of subscription group contents.
#[async_trait]
pub trait SubscriptionFetcher: Send + Sync {
    /// Fetch the current definition of a subscription group.
    ///
    /// # Arguments
    /// * `group` - A group whose kind is `Subscription`
    async fn fetch(&self, group: &ProxyGroup) -> MoonResult<ProxyGroup>;
}
