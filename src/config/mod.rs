use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::hierarchy::MatchMode;

const DB_FILE: &str = "workgrove.db";
const LEGACY_FILE: &str = "legacy-project.json";

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    /// Override for the database location. Default: ~/.workgrove/workgrove.db
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Override for the legacy single-project JSON file picked up by migration.
    #[serde(default)]
    pub legacy_data: Option<PathBuf>,

    /// Default log level when `--verbose` is not given (error, warn, info, debug, trace).
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub filters: FilterConfig,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct FilterConfig {
    /// How filters of the same kind combine. Default: all
    #[serde(default)]
    pub mode: MatchMode,
}

impl Config {
    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Ok(base_dir()?.join(DB_FILE)),
        }
    }

    pub fn legacy_data_path(&self) -> Result<PathBuf> {
        match &self.legacy_data {
            Some(path) => Ok(path.clone()),
            None => Ok(base_dir()?.join(LEGACY_FILE)),
        }
    }
}

/// Returns the base workgrove directory: ~/.workgrove/
pub fn base_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home.join(".workgrove"))
}

/// Ensure the base directory exists
pub fn ensure_dirs() -> Result<()> {
    let base = base_dir()?;
    fs::create_dir_all(&base).context("failed to create ~/.workgrove/")?;
    Ok(())
}

/// Load config from ~/.workgrove/config.toml (or return defaults if it doesn't exist)
pub fn load() -> Result<Config> {
    load_from(&base_dir()?.join("config.toml"))
}

pub fn load_from(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(&dir.path().join("config.toml")).unwrap();
        assert!(config.database.is_none());
        assert!(config.log_level.is_none());
        assert_eq!(config.filters.mode, MatchMode::All);
    }

    #[test]
    fn test_parse_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
database = "/tmp/grove.db"
legacy_data = "/tmp/old.json"
log_level = "debug"

[filters]
mode = "any_within_kind"
"#,
        )
        .unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.db_path().unwrap(), PathBuf::from("/tmp/grove.db"));
        assert_eq!(
            config.legacy_data_path().unwrap(),
            PathBuf::from("/tmp/old.json")
        );
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.filters.mode, MatchMode::AnyWithinKind);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "filters = [").unwrap();
        assert!(load_from(&path).is_err());
    }
}
