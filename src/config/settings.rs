use crate::config::loader::{load_or_init, save_json};
use crate::error::MoonResult;
use crate::store::StoreOptions;
use crate::translate::RuleDialect;
use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};

pub const DEFAULT_SETTINGS_PATH: &str = "./moonproxy.json";

/// Application settings: where the Moon snapshot and the engine config live
/// and how rules are rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(skip)]
    pub(crate) path: PathBuf,
    // Moon snapshot file
    #[serde(deserialize_with = "or_default", default = "default_moon_path")]
    pub(crate) moon_path: String,
    // File the proxy engine loads its proxies and rules from
    #[serde(deserialize_with = "or_default", default = "default_engine_path")]
    pub(crate) engine_path: String,
    #[serde(deserialize_with = "or_default", default)]
    pub(crate) rule_dialect: RuleDialect,
    // Name given to auto-created local groups
    #[serde(deserialize_with = "or_default", default = "default_local_group_name")]
    pub(crate) local_group_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(DEFAULT_SETTINGS_PATH)
    }
}

impl Settings {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            moon_path: default_moon_path(),
            engine_path: default_engine_path(),
            rule_dialect: RuleDialect::default(),
            local_group_name: default_local_group_name(),
        }
    }

    /// Load settings from a file, writing defaults when it is missing or corrupted.
    pub async fn try_load(path: impl AsRef<Path>) -> MoonResult<Self> {
        let path = path.as_ref();
        let mut settings: Settings = load_or_init(path).await?;
        settings.path = path.to_owned();
        settings.fill_blanks();
        Ok(settings)
    }

    pub async fn save(&self) -> MoonResult<()> {
        save_json(&self.path, self).await
    }

    pub fn get_path(&self) -> &PathBuf {
        &self.path
    }

    /// Moon file path, relative paths resolved against the settings file directory.
    pub fn moon_path(&self) -> PathBuf {
        self.resolve(&self.moon_path)
    }

    /// Engine config path, relative paths resolved against the settings file directory.
    pub fn engine_path(&self) -> PathBuf {
        self.resolve(&self.engine_path)
    }

    pub fn rule_dialect(&self) -> RuleDialect {
        self.rule_dialect
    }

    pub fn set_rule_dialect(&mut self, dialect: RuleDialect) {
        self.rule_dialect = dialect;
    }

    pub fn local_group_name(&self) -> &str {
        &self.local_group_name
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions { dialect: self.rule_dialect, local_group_name: self.local_group_name.clone() }
    }

    fn resolve(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            return path.to_owned();
        }
        match self.path.parent() {
            Some(dir) => dir.join(path),
            None => path.to_owned(),
        }
    }

    fn fill_blanks(&mut self) {
        if self.moon_path.trim().is_empty() {
            warn!("moon_path is empty, using default");
            self.moon_path = default_moon_path();
        }
        if self.engine_path.trim().is_empty() {
            warn!("engine_path is empty, using default");
            self.engine_path = default_engine_path();
        }
        if self.local_group_name.trim().is_empty() {
            self.local_group_name = default_local_group_name();
        }
    }
}

impl Display for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string_pretty(self).map_err(|_| std::fmt::Error)?;
        writeln!(f, "{}", json)
    }
}

// Forgiving field: a value of the wrong type falls back to the type's default.
fn or_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    match T::deserialize(deserializer) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("Failed to deserialize settings value: {}, using default", e);
            Ok(T::default())
        }
    }
}

fn default_moon_path() -> String {
    "./moon.json".to_string()
}

fn default_engine_path() -> String {
    "./clash.yaml".to_string()
}

fn default_local_group_name() -> String {
    "Local".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_new() {
        let settings = Settings::new("/etc/moonproxy/moonproxy.json");
        assert_eq!(settings.moon_path(), PathBuf::from("/etc/moonproxy/moon.json"));
        assert_eq!(settings.engine_path(), PathBuf::from("/etc/moonproxy/clash.yaml"));
        assert_eq!(settings.rule_dialect(), RuleDialect::Descriptive);
        assert_eq!(settings.local_group_name(), "Local");
    }

    #[test]
    fn test_absolute_paths_kept() {
        let mut settings = Settings::new("/etc/moonproxy/moonproxy.json");
        settings.moon_path = "/var/lib/moon.json".to_string();
        assert_eq!(settings.moon_path(), PathBuf::from("/var/lib/moon.json"));
    }

    #[test]
    fn test_forgiving_fields() {
        let settings: Settings = serde_json::from_str(r#"{ "moon_path": 42, "rule_dialect": "klingon", "local_group_name": "Mine" }"#).unwrap();
        assert_eq!(settings.moon_path, "");
        assert_eq!(settings.rule_dialect, RuleDialect::Descriptive);
        assert_eq!(settings.local_group_name, "Mine");
        assert_eq!(settings.engine_path, "./clash.yaml");
    }

    #[test]
    fn test_clash_dialect_parsed() {
        let settings: Settings = serde_json::from_str(r#"{ "rule_dialect": "clash" }"#).unwrap();
        assert_eq!(settings.rule_dialect(), RuleDialect::Clash);
    }

    #[tokio::test]
    async fn test_try_load_fills_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moonproxy.json");
        std::fs::write(&path, r#"{ "moon_path": " ", "local_group_name": "" }"#).unwrap();

        let settings = Settings::try_load(&path).await.unwrap();
        assert_eq!(settings.moon_path, "./moon.json");
        assert_eq!(settings.local_group_name(), "Local");
        assert_eq!(settings.get_path(), &path);
    }

    #[tokio::test]
    async fn test_try_load_missing_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moonproxy.json");

        let settings = Settings::try_load(&path).await.unwrap();
        assert_eq!(settings.rule_dialect(), RuleDialect::Descriptive);
        assert!(path.exists());
    }
}
