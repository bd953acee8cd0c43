//! Engine config file writer

use crate::error::{MoonError, MoonResult};
use crate::store::ProxyEngine;
use crate::translate::ClashConfig;
use async_trait::async_trait;
use log::{debug, error};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

const HEADER: &str = "# Generated by moonproxy\n";

// Insert or overwrite a top-level key
macro_rules! revise {
    ($map: expr, $key: expr, $val: expr) => {
        $map.insert(Value::String($key.into()), $val);
    };
}

/// Writes the rendered `proxies` and `rules` into the YAML file the proxy
/// engine loads. Every other key already in the file is kept.
#[derive(Debug, Clone)]
pub struct YamlFileEngine {
    path: PathBuf,
}

impl YamlFileEngine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_existing(&self) -> MoonResult<Mapping> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Mapping::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        // Unreadable files are never overwritten
        match serde_yaml::from_str::<Value>(&content) {
            Ok(Value::Mapping(map)) => Ok(map),
            Ok(Value::Null) => Ok(Mapping::new()),
            Ok(_) => Err(MoonError::Engine(format!("Engine config {} is not a mapping", self.path.display()))),
            Err(e) => {
                error!("Failed to parse engine config {}: {}", self.path.display(), e);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl ProxyEngine for YamlFileEngine {
    async fn apply(&self, config: &ClashConfig) -> MoonResult<()> {
        let mut map = self.read_existing().await?;
        revise!(map, "proxies", serde_yaml::to_value(&config.proxies)?);
        revise!(map, "rules", serde_yaml::to_value(&config.rules)?);

        let content = format!("{}{}", HEADER, serde_yaml::to_string(&map)?);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Wrote {} proxies and {} rules to {}", config.proxies.len(), config.rules.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::ProxyRecord;

    fn temp_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clash.yaml");
        (dir, path)
    }

    fn sample() -> ClashConfig {
        ClashConfig {
            proxies: vec![ProxyRecord {
                name: "n1".to_string(),
                kind: "socks5".to_string(),
                server: "127.0.0.1".to_string(),
                port: 7890,
                username: None,
                password: None,
            }],
            rules: vec!["match-by-process-name,curl,n1".to_string(), "MATCH,DIRECT".to_string()],
        }
    }

    #[tokio::test]
    async fn test_writes_new_file() {
        let (_dir, path) = temp_path();
        YamlFileEngine::new(&path).apply(&sample()).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(HEADER));
        let parsed: ClashConfig = serde_yaml::from_str(&content).unwrap();
        assert_eq!(parsed, sample());
    }

    #[tokio::test]
    async fn test_keeps_other_keys() {
        let (_dir, path) = temp_path();
        std::fs::write(&path, "mixed-port: 7890\nrules:\n  - MATCH,REJECT\n").unwrap();

        YamlFileEngine::new(&path).apply(&sample()).await.unwrap();

        let value: Value = serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["mixed-port"], Value::from(7890));
        assert_eq!(value["rules"][1], Value::from("MATCH,DIRECT"));
        assert_eq!(value["proxies"][0]["type"], Value::from("socks5"));
    }

    #[tokio::test]
    async fn test_unparsable_file_left_untouched() {
        let (dir, path) = temp_path();
        let original = "mixed-port: 7890\nexternal-controller: 127.0.0.1:9090\ndns:\n  enable: true\n\t bad: [\n";
        std::fs::write(&path, original).unwrap();

        let result = YamlFileEngine::new(&path).apply(&ClashConfig::default()).await;
        assert!(matches!(result, Err(MoonError::Yaml(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_non_mapping_file_rejected() {
        let (_dir, path) = temp_path();
        std::fs::write(&path, "- just\n- a list\n").unwrap();

        let result = YamlFileEngine::new(&path).apply(&sample()).await;
        assert!(matches!(result, Err(MoonError::Engine(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "- just\n- a list\n");
    }

    #[tokio::test]
    async fn test_empty_file_rewritten() {
        let (_dir, path) = temp_path();
        std::fs::write(&path, "").unwrap();

        YamlFileEngine::new(&path).apply(&sample()).await.unwrap();
        let parsed: ClashConfig = serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, sample());
    }
}
