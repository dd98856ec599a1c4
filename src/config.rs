//! Configuration loading.
//!
//! Loads `lense.toml` (or `$LENSE_CONFIG_PATH`). Precedence: env vars >
//! config file > defaults. A missing file yields defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "LENSE_CONFIG_PATH";

/// Group whose members pass every instance permission check.
pub const DEFAULT_ADMIN_GROUP: &str = "00000000-0000-0000-0000-000000000000";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Manifest engine settings.
    pub engine: EngineConfig,
    /// Authorization settings.
    pub acl: AclConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// `[engine]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Include a debug block in 500-class error payloads.
    pub debug: bool,
    /// Root marker of capability paths.
    pub capability_root: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug: false,
            capability_root: default_capability_root(),
        }
    }
}

/// `[acl]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// Enforce ACL decisions; when false every request is granted GLOBAL.
    pub enabled: bool,
    /// Administrator group id.
    pub admin_group: String,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            admin_group: DEFAULT_ADMIN_GROUP.to_owned(),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for JSON log files; console only when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
        }
    }
}

fn default_capability_root() -> String {
    "LENSE".to_owned()
}

fn default_level() -> String {
    "info".to_owned()
}

impl Config {
    /// Load from `$LENSE_CONFIG_PATH` or `./lense.toml`, then apply env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("lense.toml"));
        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a TOML file; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    /// Parse configuration TOML.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid TOML.
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `LENSE_*` overrides read through `env`. Invalid values are
    /// ignored with a warning.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("LENSE_DEBUG") {
            match parse_bool(&v) {
                Some(b) => self.engine.debug = b,
                None => warn_invalid("LENSE_DEBUG", &v),
            }
        }
        if let Some(v) = env("LENSE_CAPABILITY_ROOT") {
            if crate::capability::is_identifier(&v) {
                self.engine.capability_root = v;
            } else {
                warn_invalid("LENSE_CAPABILITY_ROOT", &v);
            }
        }

        if let Some(v) = env("LENSE_ACL_ENABLED") {
            match parse_bool(&v) {
                Some(b) => self.acl.enabled = b,
                None => warn_invalid("LENSE_ACL_ENABLED", &v),
            }
        }
        if let Some(v) = env("LENSE_ADMIN_GROUP") {
            self.acl.admin_group = v;
        }

        if let Some(v) = env("LENSE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("LENSE_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn warn_invalid(var: &str, value: &str) {
    tracing::warn!(var, value, "ignoring invalid env override");
}

/// Resolve the default config directory (`~/.lense/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".lense"))
}
