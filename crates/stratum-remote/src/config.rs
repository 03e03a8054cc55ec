use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use stratum_store::StoreError;
use tempfile::NamedTempFile;

/// Repository configuration: the set of configured remotes and which one is
/// the default. Persisted as `config.json` under the store root and exchanged
/// verbatim over the configuration bus verbs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub version: u32,
    pub default_repo: String,
    /// Remote name to endpoint URL.
    pub repos: BTreeMap<String, String>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        let mut repos = BTreeMap::new();
        repos.insert(
            "stable".to_owned(),
            "https://packages.example.org/stable".to_owned(),
        );
        Self {
            version: 1,
            default_repo: "stable".to_owned(),
            repos,
        }
    }
}

impl RepoConfig {
    /// A configuration is usable only when its default repository exists.
    pub fn validate(&self) -> Result<(), String> {
        if !self.repos.contains_key(&self.default_repo) {
            return Err(format!(
                "default repository '{}' is not configured",
                self.default_repo
            ));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::Io(std::io::Error::other("config path has no parent")))?;
        std::fs::create_dir_all(dir)?;
        let content = serde_json::to_string_pretty(self)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RepoConfig::default().validate().is_ok());
    }

    #[test]
    fn missing_default_repo_is_invalid() {
        let mut cfg = RepoConfig::default();
        cfg.default_repo = "nowhere".to_owned();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RepoConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(cfg, RepoConfig::default());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut cfg = RepoConfig::default();
        cfg.repos
            .insert("beta".to_owned(), "https://beta.example.org".to_owned());
        cfg.save(&path).unwrap();

        let back = RepoConfig::load(&path).unwrap();
        assert_eq!(back, cfg);
    }
}
