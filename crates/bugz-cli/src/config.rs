use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "BUGZ_CONFIG_FILE";

/// Contents of the YAML config file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub db_path: Option<PathBuf>,
    pub source_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub extra_series: Vec<String>,
    pub derive_stats: Option<bool>,
}

/// Values given on the command line; they win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub db_path: Option<PathBuf>,
    pub source_dir: Option<PathBuf>,
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub source_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub extra_series: Vec<String>,
    pub derive_stats: bool,
    pub debug: bool,
}

pub fn default_db_path() -> PathBuf {
    dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bugz")
        .join("bugz.db")
}

/// `--config` first, then `BUGZ_CONFIG_FILE`.
pub fn config_path(flag: Option<&Path>) -> Option<PathBuf> {
    flag.map(Path::to_path_buf).or_else(|| {
        std::env::var(CONFIG_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
    })
}

pub fn read_file_config(path: &Path) -> Result<FileConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    if text.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse config {}", path.display()))
}

pub fn resolve(file: FileConfig, overrides: Overrides) -> Config {
    Config {
        db_path: overrides
            .db_path
            .or(file.db_path)
            .unwrap_or_else(default_db_path),
        source_dir: overrides.source_dir.or(file.source_dir),
        log_level: file.log_level,
        extra_series: file.extra_series,
        derive_stats: file.derive_stats.unwrap_or(true),
        debug: overrides.debug,
    }
}

pub fn load_config(flag: Option<&Path>, overrides: Overrides) -> Result<Config> {
    let file = match config_path(flag) {
        Some(path) => read_file_config(&path)?,
        None => FileConfig::default(),
    };
    Ok(resolve(file, overrides))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_every_key_from_yaml() {
        let mut file = NamedTempFile::new().expect("temp config");
        writeln!(
            file,
            "db_path: /var/cache/bugz.db\nsource_dir: /srv/dumps\nlog_level: warn\nextra_series:\n  - questing\nderive_stats: false"
        )
        .expect("write config");

        let config = read_file_config(file.path()).expect("parse config");
        assert_eq!(config.db_path, Some(PathBuf::from("/var/cache/bugz.db")));
        assert_eq!(config.source_dir, Some(PathBuf::from("/srv/dumps")));
        assert_eq!(config.log_level.as_deref(), Some("warn"));
        assert_eq!(config.extra_series, vec!["questing".to_string()]);
        assert_eq!(config.derive_stats, Some(false));
    }

    #[test]
    fn empty_file_means_defaults() {
        let file = NamedTempFile::new().expect("temp config");
        let config = read_file_config(file.path()).expect("parse config");
        assert_eq!(config, FileConfig::default());

        let resolved = resolve(config, Overrides::default());
        assert_eq!(resolved.db_path, default_db_path());
        assert!(resolved.derive_stats);
        assert_eq!(resolved.source_dir, None);
    }

    #[test]
    fn flags_override_file_values() {
        let file = FileConfig {
            db_path: Some(PathBuf::from("/from/file.db")),
            source_dir: Some(PathBuf::from("/from/file")),
            ..FileConfig::default()
        };
        let resolved = resolve(
            file,
            Overrides {
                db_path: Some(PathBuf::from("/from/flag.db")),
                source_dir: None,
                debug: true,
            },
        );
        assert_eq!(resolved.db_path, PathBuf::from("/from/flag.db"));
        assert_eq!(resolved.source_dir, Some(PathBuf::from("/from/file")));
        assert!(resolved.debug);
    }

    #[test]
    fn unknown_yaml_shape_is_an_error() {
        let mut file = NamedTempFile::new().expect("temp config");
        writeln!(file, "extra_series: not-a-list").expect("write config");
        assert!(read_file_config(file.path()).is_err());
    }
}
