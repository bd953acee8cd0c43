//! Mock collaborators and factories for tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};

use crate::config::types::{MoonConfig, MoonPatch, ProxyGroup, ProxyNode};
use crate::error::{MoonError, MoonResult};
use crate::store::{ConfigStore, MoonRepository, ProxyEngine, StoreOptions, SubscriptionFetcher};
use crate::translate::ClashConfig;

// ===== MockRepository =====

pub struct MockRepository {
    config: RwLock<MoonConfig>,
    patches: RwLock<Vec<MoonPatch>>,
    /// If Some, `patch` fails with this message
    patch_error: RwLock<Option<String>>,
}

impl MockRepository {
    pub fn new() -> Self {
        Self::with_config(MoonConfig::default())
    }

    pub fn with_config(config: MoonConfig) -> Self {
        Self { config: RwLock::new(config), patches: RwLock::new(Vec::new()), patch_error: RwLock::new(None) }
    }

    pub async fn set_patch_error(&self, err: Option<String>) {
        *self.patch_error.write().await = err;
    }

    pub async fn config(&self) -> MoonConfig {
        self.config.read().await.clone()
    }

    pub async fn patches(&self) -> Vec<MoonPatch> {
        self.patches.read().await.clone()
    }
}

#[async_trait]
impl MoonRepository for MockRepository {
    async fn load(&self) -> MoonResult<MoonConfig> {
        Ok(self.config.read().await.clone())
    }

    async fn patch(&self, patch: MoonPatch) -> MoonResult<()> {
        if let Some(ref msg) = *self.patch_error.read().await {
            return Err(MoonError::Repository(msg.clone()));
        }
        self.patches.write().await.push(patch.clone());
        self.config.write().await.apply(patch);
        Ok(())
    }
}

// ===== MockEngine =====

/// Pair of signals holding one `apply` call in flight.
#[derive(Clone)]
pub struct Gate {
    /// Notified once the gated call has started
    pub entered: Arc<Notify>,
    /// Notify to let the gated call finish
    pub release: Arc<Notify>,
}

pub struct MockEngine {
    applied: RwLock<Vec<ClashConfig>>,
    error: RwLock<Option<String>>,
    gate: Mutex<Option<Gate>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self { applied: RwLock::new(Vec::new()), error: RwLock::new(None), gate: Mutex::new(None) }
    }

    pub async fn set_error(&self, err: Option<String>) {
        *self.error.write().await = err;
    }

    pub async fn applied(&self) -> Vec<ClashConfig> {
        self.applied.read().await.clone()
    }

    /// Make the next `apply` wait until the returned gate is released.
    pub fn gate_next_apply(&self) -> Gate {
        let gate = Gate { entered: Arc::new(Notify::new()), release: Arc::new(Notify::new()) };
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl ProxyEngine for MockEngine {
    async fn apply(&self, config: &ClashConfig) -> MoonResult<()> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if let Some(ref msg) = *self.error.read().await {
            return Err(MoonError::Engine(msg.clone()));
        }
        self.applied.write().await.push(config.clone());
        Ok(())
    }
}

// ===== MockFetcher =====

pub struct MockFetcher {
    result: Result<ProxyGroup, String>,
}

impl MockFetcher {
    pub fn returning(group: ProxyGroup) -> Self {
        Self { result: Ok(group) }
    }

    pub fn failing(msg: &str) -> Self {
        Self { result: Err(msg.to_string()) }
    }
}

#[async_trait]
impl SubscriptionFetcher for MockFetcher {
    async fn fetch(&self, _group: &ProxyGroup) -> MoonResult<ProxyGroup> {
        self.result.clone().map_err(MoonError::Repository)
    }
}

// ===== Factories =====

pub fn local_node(uid: &str) -> ProxyNode {
    ProxyNode { uid: uid.to_string(), group_uid: "0".to_string(), scheme: "socks5".to_string(), host: "127.0.0.1".to_string(), port: 1080, username: None, password: None }
}

/// Store over an empty mock repository and a mock engine.
pub async fn open_store() -> (ConfigStore, Arc<MockRepository>, Arc<MockEngine>) {
    let repo = Arc::new(MockRepository::new());
    let engine = Arc::new(MockEngine::new());
    let store = ConfigStore::open(repo.clone(), engine.clone(), StoreOptions::default()).await.unwrap();
    (store, repo, engine)
}
