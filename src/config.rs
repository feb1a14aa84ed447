use crate::game::PathOverrides;
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

const CONFIG_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub install_path: String,
    /// Folder holding `loader/` (or `loader.zip`), `UserLibs/` and `Mods/`.
    #[serde(default)]
    pub loader_payload: Option<PathBuf>,
    /// Unity per-user folder with `Player.log` and `Saves/`.
    #[serde(default)]
    pub user_data_dir: Option<PathBuf>,
    #[serde(default)]
    pub saves_dir: Option<PathBuf>,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_in(&base_data_dir()?)
    }

    pub fn load_or_create_in(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).context("create app data dir")?;
        let path = data_dir.join(CONFIG_NAME);
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let mut config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            config.data_dir = data_dir.to_path_buf();
            return Ok(config);
        }

        let config = AppConfig {
            data_dir: data_dir.to_path_buf(),
            ..AppConfig::default()
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).context("create app data dir")?;
        let path = self.data_dir.join(CONFIG_NAME);
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, raw).context("write app config")?;
        fs::rename(&temp, &path).context("finalize app config")?;
        Ok(())
    }

    pub fn overrides(&self) -> PathOverrides {
        PathOverrides {
            unity_dir: self.user_data_dir.clone(),
            saves_dir: self.saves_dir.clone(),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("menace-modman.log")
    }

    pub fn payload_dir(&self) -> PathBuf {
        self.loader_payload
            .clone()
            .unwrap_or_else(|| self.data_dir.join("payload"))
    }
}

fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("menace-modman"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_creates_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_create_in(dir.path()).unwrap();

        assert!(dir.path().join(CONFIG_NAME).is_file());
        assert!(config.install_path.is_empty());
        assert_eq!(config.payload_dir(), dir.path().join("payload"));
    }

    #[test]
    fn saved_values_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::load_or_create_in(dir.path()).unwrap();
        config.install_path = "/games/Menace".to_string();
        config.saves_dir = Some(PathBuf::from("/saves"));
        config.save().unwrap();

        let reloaded = AppConfig::load_or_create_in(dir.path()).unwrap();
        assert_eq!(reloaded.install_path, "/games/Menace");
        assert_eq!(reloaded.overrides().saves_dir, Some(PathBuf::from("/saves")));
        assert!(reloaded.overrides().unity_dir.is_none());
    }

    #[test]
    fn older_config_without_optional_fields_parses() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_NAME), r#"{"install_path":"/x"}"#).unwrap();
        let config = AppConfig::load_or_create_in(dir.path()).unwrap();
        assert_eq!(config.install_path, "/x");
        assert!(config.loader_payload.is_none());
    }
}
