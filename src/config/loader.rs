use crate::config::types::{MoonConfig, MoonPatch};
use crate::error::MoonResult;
use crate::store::MoonRepository;
use async_trait::async_trait;
use log::{debug, error, trace, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Load a JSON file, writing defaults when it does not exist.
///
/// A file that fails to parse is moved to `<stem>.corrupted.<n>` and replaced
/// with defaults.
pub async fn load_or_init<T>(path: &Path) -> MoonResult<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    debug!("Loading config from: {}", path.display());
    if !tokio::fs::try_exists(path).await? {
        warn!("Config file not found, using default config: {}", path.display());
        let value = T::default();
        save_json(path, &value).await?;
        return Ok(value);
    }

    let content = tokio::fs::read_to_string(path).await?;
    match serde_json::from_str::<T>(&content) {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("Failed to parse config file {}: {}", path.display(), e);
            let backup_path = corrupted_backup_path(path);
            tokio::fs::rename(path, &backup_path).await?;
            warn!("Config file corrupted, moved to {} and using default config", backup_path.display());
            let value = T::default();
            save_json(path, &value).await?;
            Ok(value)
        }
    }
}

/// Write `value` as pretty JSON, replacing the file in one rename.
pub async fn save_json<T: Serialize>(path: &Path, value: &T) -> MoonResult<()> {
    debug!("Saving config to: {}", path.display());
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn corrupted_backup_path(path: &Path) -> PathBuf {
    let mut n = 1;
    loop {
        let candidate = path.with_extension(format!("corrupted.{}", n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Moon snapshot stored as a JSON file.
#[derive(Debug)]
pub struct JsonFileRepository {
    path: PathBuf,
    // Serializes read-modify-write cycles of `patch`
    write_lock: Mutex<()>,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MoonRepository for JsonFileRepository {
    async fn load(&self) -> MoonResult<MoonConfig> {
        let config: MoonConfig = load_or_init(&self.path).await?;
        trace!("Loaded moon config: {:#?}", config);
        Ok(config)
    }

    async fn patch(&self, patch: MoonPatch) -> MoonResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut config = self.load().await?;
        config.apply(patch);
        save_json(&self.path, &config).await
    }
}
