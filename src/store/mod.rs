//! Versioned in-memory Moon snapshot and the mutations applied to it.
//!
//! Every mutation runs the same sequence against a copy of the current
//! snapshot: apply the change, render and push the engine config, persist the
//! raw snapshot, then commit in memory and notify subscribers. The two writes
//! are not a transaction. When the engine accepts the config but persisting
//! fails, the mutation returns [`MoonError::Diverged`] and the in-memory
//! snapshot keeps its previous version; the next successful mutation
//! overwrites both backends (last writer wins).
//!
//! Only the group edits (`save_proxy_group`, `save_group_proxies`) are guarded.
//! Other mutations read the snapshot when called, so two overlapping calls may
//! both apply against the same base.

mod lock;
mod traits;

pub use lock::{GroupLease, GroupLocks};
pub use traits::{MoonRepository, ProxyEngine, SubscriptionFetcher};

use crate::config::types::{MoonConfig, MoonPatch, ProxyGroup, ProxyNode, Rule};
use crate::error::{MoonError, MoonResult};
use crate::translate::{ClashConfig, RuleDialect, translate};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

/// A committed configuration and its version. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u64,
    pub config: Arc<MoonConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub dialect: RuleDialect,
    pub local_group_name: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { dialect: RuleDialect::default(), local_group_name: "Local".to_string() }
    }
}

pub struct ConfigStore {
    repository: Arc<dyn MoonRepository>,
    engine: Arc<dyn ProxyEngine>,
    fetcher: Option<Arc<dyn SubscriptionFetcher>>,
    options: StoreOptions,
    current: RwLock<Snapshot>,
    tx: broadcast::Sender<Snapshot>,
    group_locks: GroupLocks,
}

impl ConfigStore {
    /// Read the persisted snapshot and build a store around it.
    pub async fn open(repository: Arc<dyn MoonRepository>, engine: Arc<dyn ProxyEngine>, options: StoreOptions) -> MoonResult<Self> {
        let config = repository.load().await?;
        if let Err(e) = config.validate() {
            warn!("Loaded snapshot violates an invariant: {}", e);
        }
        let (tx, _rx) = broadcast::channel(16);
        Ok(Self {
            repository,
            engine,
            fetcher: None,
            options,
            current: RwLock::new(Snapshot { version: 0, config: Arc::new(config) }),
            tx,
            group_locks: GroupLocks::new(),
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn SubscriptionFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.current.read().await.clone()
    }

    /// Receive every committed snapshot.
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Engine view of the current snapshot.
    pub async fn translated(&self) -> ClashConfig {
        translate(&self.snapshot().await.config, self.options.dialect)
    }

    /// Push the current snapshot to the engine without changing it.
    pub async fn push_engine(&self) -> MoonResult<()> {
        let clash = self.translated().await;
        self.engine.apply(&clash).await
    }

    /// Re-read the repository and commit what it holds.
    /// Returns `false` when the stored snapshot equals the current one.
    pub async fn reload(&self) -> MoonResult<bool> {
        let config = self.repository.load().await?;
        if let Err(e) = config.validate() {
            warn!("Reloaded snapshot violates an invariant: {}", e);
        }
        if *self.snapshot().await.config == config {
            trace!("Reloaded snapshot unchanged");
            return Ok(false);
        }
        self.commit(config).await;
        Ok(true)
    }

    pub async fn save_proxy(&self, mut node: ProxyNode) -> MoonResult<Snapshot> {
        node.validate()?;
        node.ensure_uid();
        debug!("Saving proxy {} in group {}", node.uid, node.group_uid);
        let mut config = self.working_copy().await;
        config.upsert_proxy(node, &self.options.local_group_name);
        let patch = MoonPatch::groups(config.proxy_group_list.clone());
        self.write(config, patch).await
    }

    pub async fn delete_proxy(&self, node: &ProxyNode) -> MoonResult<Snapshot> {
        debug!("Deleting proxy {} from group {}", node.uid, node.group_uid);
        let base = self.snapshot().await;
        let mut config = (*base.config).clone();
        if !config.remove_proxy(node) {
            warn!("Proxy not found: {}", node.uid);
            return Ok(base);
        }
        let patch = MoonPatch { current_proxy_id: current_patch(&base.config, &config), ..MoonPatch::groups(config.proxy_group_list.clone()) };
        self.write(config, patch).await
    }

    /// Insert or replace a whole group. Returns `false` without touching
    /// anything when an edit of the same group is already in flight.
    pub async fn save_proxy_group(&self, group: ProxyGroup) -> MoonResult<bool> {
        let Some(_lease) = self.group_locks.try_acquire(&group.uid) else {
            debug!("Group {} is being edited, save rejected", group.uid);
            return Ok(false);
        };
        group.validate()?;
        debug!("Saving group {} ({})", group.uid, group.label());
        let base = self.snapshot().await;
        let mut config = (*base.config).clone();
        config.upsert_group(group);
        let patch = MoonPatch { current_proxy_id: current_patch(&base.config, &config), ..MoonPatch::groups(config.proxy_group_list.clone()) };
        self.write(config, patch).await?;
        Ok(true)
    }

    /// Replace only the node list of an existing group. Returns `false` when
    /// no group matches or an edit of the same group is already in flight.
    pub async fn save_group_proxies(&self, group: ProxyGroup) -> MoonResult<bool> {
        let Some(_lease) = self.group_locks.try_acquire(&group.uid) else {
            debug!("Group {} is being edited, proxy update rejected", group.uid);
            return Ok(false);
        };
        for node in &group.proxy_list {
            node.validate()?;
        }
        let base = self.snapshot().await;
        let mut config = (*base.config).clone();
        if !config.replace_group_proxies(&group.uid, group.proxy_list) {
            warn!("Group not found: {}", group.uid);
            return Ok(false);
        }
        debug!("Replacing proxies of group {}", group.uid);
        let patch = MoonPatch { current_proxy_id: current_patch(&base.config, &config), ..MoonPatch::groups(config.proxy_group_list.clone()) };
        self.write(config, patch).await?;
        Ok(true)
    }

    pub async fn delete_proxy_group(&self, group: &ProxyGroup) -> MoonResult<Snapshot> {
        debug!("Deleting group {}", group.uid);
        let base = self.snapshot().await;
        let mut config = (*base.config).clone();
        config.remove_group(&group.uid);
        let patch = MoonPatch { current_proxy_id: current_patch(&base.config, &config), ..MoonPatch::groups(config.proxy_group_list.clone()) };
        self.write(config, patch).await
    }

    pub async fn save_rule(&self, mut rule: Rule) -> MoonResult<Snapshot> {
        rule.ensure_uid();
        let mut config = self.working_copy().await;
        config.validate_rule_insert(&rule)?;
        debug!("Saving rule {}: {} -> {}", rule.uid, rule.process, rule.action);
        config.upsert_rule(rule);
        let patch = MoonPatch::rules(config.rule_list.clone());
        self.write(config, patch).await
    }

    pub async fn delete_rule(&self, rule: &Rule) -> MoonResult<Snapshot> {
        debug!("Deleting rule {}", rule.uid);
        let mut config = self.working_copy().await;
        config.remove_rule(&rule.uid);
        let patch = MoonPatch::rules(config.rule_list.clone());
        self.write(config, patch).await
    }

    /// Mark a node as the active proxy, or clear the selection with `None`.
    pub async fn select_proxy(&self, uid: Option<&str>) -> MoonResult<Snapshot> {
        let mut config = self.working_copy().await;
        if let Some(uid) = uid {
            if config.find_proxy(uid).is_none() {
                return Err(MoonError::NotFound(format!("Proxy not found: {}", uid)));
            }
        }
        debug!("Selecting proxy {:?}", uid);
        config.current_proxy_id = uid.map(str::to_string);
        let patch = MoonPatch { current_proxy_id: Some(uid.unwrap_or_default().to_string()), ..Default::default() };
        self.write(config, patch).await
    }

    /// Fetch a subscription group and replace its nodes with the result.
    ///
    /// Returns `false` when the group is being edited. On fetch failure the
    /// group is left unchanged.
    pub async fn refresh_subscription(&self, group_uid: &str) -> MoonResult<bool> {
        let fetcher = self.fetcher.as_ref().ok_or_else(|| MoonError::Subscription("No subscription fetcher configured".to_string()))?;
        let group = self
            .snapshot()
            .await
            .config
            .find_group(group_uid)
            .cloned()
            .ok_or_else(|| MoonError::NotFound(format!("Group not found: {}", group_uid)))?;
        if group.subscription_url().is_none() {
            return Err(MoonError::Validation(format!("Group {} has no subscription url", group_uid)));
        }

        info!("Refreshing subscription {}", group.label());
        let fetched = fetcher.fetch(&group).await.map_err(|e| match e {
            MoonError::Subscription(_) => e,
            other => MoonError::Subscription(other.to_string()),
        })?;

        let proxy_list = fetched
            .proxy_list
            .into_iter()
            .map(|mut node| {
                node.group_uid = group.uid.clone();
                node.ensure_uid();
                node
            })
            .collect();
        self.save_group_proxies(ProxyGroup { proxy_list, ..group }).await
    }

    async fn working_copy(&self) -> MoonConfig {
        (*self.snapshot().await.config).clone()
    }

    async fn write(&self, config: MoonConfig, patch: MoonPatch) -> MoonResult<Snapshot> {
        let clash = translate(&config, self.options.dialect);
        if let Err(e) = self.engine.apply(&clash).await {
            log_failure("Failed to push config to engine", &e);
            return Err(e);
        }
        if let Err(e) = self.repository.patch(patch).await {
            error!("Engine updated but snapshot was not persisted: {}", e);
            return Err(MoonError::Diverged { message: e.to_string() });
        }
        Ok(self.commit(config).await)
    }

    async fn commit(&self, config: MoonConfig) -> Snapshot {
        let snapshot = {
            let mut guard = self.current.write().await;
            *guard = Snapshot { version: guard.version + 1, config: Arc::new(config) };
            guard.clone()
        };
        info!("Committed config version {}", snapshot.version);
        trace!("Committed config: {:#?}", snapshot.config);
        let _ = self.tx.send(snapshot.clone());
        snapshot
    }
}

// Patch value for `current_proxy_id` when a mutation cleared the selection.
fn current_patch(before: &MoonConfig, after: &MoonConfig) -> Option<String> {
    (before.current_proxy_id != after.current_proxy_id).then(|| after.current_proxy_id.clone().unwrap_or_default())
}

fn log_failure(context: &str, e: &MoonError) {
    if e.is_expected() {
        warn!("{}: {}", context, e);
    } else {
        error!("{}: {}", context, e);
    }
}
