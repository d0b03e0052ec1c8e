use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

/// Environment variable naming a config file when `--config` is absent
pub const CONFIG_ENV: &str = "PADLIGHT_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `tracing` filter directives, overridden by `RUST_LOG`
    pub log: String,
    pub default_bpm: u32,
    pub undo_limit: usize,
    pub controller_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log: "padlight=info".to_string(),
            default_bpm: padlight_services::DEFAULT_BPM,
            undo_limit: 100,
            controller_name: "Virtual Launchpad".to_string(),
        }
    }
}

/// Where the config file was looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Flag(PathBuf),
    Env(PathBuf),
    Default(PathBuf),
}

impl ConfigSource {
    /// `--config` wins over [`CONFIG_ENV`], which wins over the per-user
    /// config directory.
    pub fn resolve(flag: Option<&Path>, env: Option<PathBuf>) -> Self {
        match (flag, env) {
            (Some(path), _) => Self::Flag(path.to_path_buf()),
            (None, Some(path)) if !path.as_os_str().is_empty() => Self::Env(path),
            _ => Self::Default(default_path()),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Flag(path) | Self::Env(path) | Self::Default(path) => path,
        }
    }

    /// Only the implicit location may be absent.
    fn required(&self) -> bool {
        !matches!(self, Self::Default(_))
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match self {
            Self::Flag(_) => "--config",
            Self::Env(_) => CONFIG_ENV,
            Self::Default(_) => "default",
        };
        write!(f, "{} ({origin})", self.path().display())
    }
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("padlight")
        .join("config.toml")
}

impl Config {
    /// Read the config named by `source`. A missing file at the default
    /// location yields the defaults; any other missing or malformed file is
    /// an error.
    pub fn load(source: &ConfigSource) -> Result<Self> {
        let path = source.path();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !source.required() => {
                return Ok(Self::default());
            }
            Err(err) => return Err(err).with_context(|| format!("reading config {}", path.display())),
        };
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing config")
    }

    /// Write to `path`, creating its directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(path, self.to_toml()?).with_context(|| format!("writing config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("padlight-config-{}-{name}", std::process::id())).join("config.toml")
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str("undo_limit = 7\n").unwrap();
        assert_eq!(config.undo_limit, 7);
        assert_eq!(config.log, "padlight=info");
    }

    #[test]
    fn test_flag_beats_env_beats_default() {
        let flag = PathBuf::from("/tmp/flag.toml");
        let env = PathBuf::from("/tmp/env.toml");
        assert_eq!(ConfigSource::resolve(Some(&flag), Some(env.clone())), ConfigSource::Flag(flag));
        assert_eq!(ConfigSource::resolve(None, Some(env.clone())), ConfigSource::Env(env));
        assert_eq!(ConfigSource::resolve(None, Some(PathBuf::new())), ConfigSource::Default(default_path()));
        assert_eq!(ConfigSource::resolve(None, None), ConfigSource::Default(default_path()));
    }

    #[test]
    fn test_missing_default_is_default_but_missing_flag_fails() {
        let missing = PathBuf::from("/nonexistent/padlight/config.toml");
        let config = Config::load(&ConfigSource::Default(missing.clone())).unwrap();
        assert_eq!(config, Config::default());
        assert!(Config::load(&ConfigSource::Flag(missing.clone())).is_err());
        assert!(Config::load(&ConfigSource::Env(missing)).is_err());
    }

    #[test]
    fn test_save_then_load() {
        let path = scratch("roundtrip");
        let config = Config { default_bpm: 96, controller_name: "Pads".into(), ..Config::default() };
        config.save(&path).unwrap();
        assert_eq!(Config::load(&ConfigSource::Flag(path.clone())).unwrap(), config);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let path = scratch("malformed");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "default_bpm = \"fast\"\n").unwrap();
        let err = Config::load(&ConfigSource::Default(path.clone())).unwrap_err();
        assert!(format!("{err:#}").contains("parsing config"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
