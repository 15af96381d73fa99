//! Configuration loader using figment.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic base configuration ([`ConfigLoader::merge`])
//! 3. Config file (`island.toml` / `island.yaml`)
//! 4. Legacy gateway variables (`QQ_WS_URL`, `CONNECTION_MODE`, ...)
//! 5. Environment variables (`ISLAND_*`)
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: `island.toml`
//! - `yaml-config`: `island.yaml` / `island.yml`
//!
//! # Environment Variable Mapping
//!
//! `ISLAND_` prefix, `__` as the nesting separator:
//!
//! - `ISLAND_CONNECTION__MODE=http` → `connection.mode = "http"`
//! - `ISLAND_CONNECTION__HTTP_URL=http://127.0.0.1:5700` → `connection.http_url`
//! - `ISLAND_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//!
//! The older flat variables are still honoured:
//!
//! | Variable | Key |
//! |----------|-----|
//! | `QQ_WS_URL` | `connection.ws_url` |
//! | `QQ_HTTP_URL` | `connection.http_url` |
//! | `QQ_REVERSE_WS` | `connection.reverse_ws_path` |
//! | `QQ_ACCESS_TOKEN` | `connection.access_token` |
//! | `CONNECTION_MODE` | `connection.mode` |
//! | `QQ_GROUP_ID` | `bridge.group_ids` (comma separated) |
//! | `HTTP_PORT` | `connection.listen_addr` (as `0.0.0.0:<port>`) |

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use serde_json::json;
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::IslandConfig;

/// Flat variables from older deployments and the keys they map to.
const LEGACY_ENV: [(&str, &str); 5] = [
    ("QQ_WS_URL", "connection.ws_url"),
    ("QQ_HTTP_URL", "connection.http_url"),
    ("QQ_REVERSE_WS", "connection.reverse_ws_path"),
    ("QQ_ACCESS_TOKEN", "connection.access_token"),
    ("CONNECTION_MODE", "connection.mode"),
];

const LEGACY_GROUP_ENV: &str = "QQ_GROUP_ID";
const LEGACY_PORT_ENV: &str = "HTTP_PORT";

/// Configuration loader with figment-based multi-source support.
///
/// ```rust,ignore
/// let config = ConfigLoader::new()
///     .file("island.toml")
///     .load()?;
/// ```
pub struct ConfigLoader {
    figment: Figment,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    load_legacy_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            search_paths: Vec::new(),
            load_env: true,
            load_legacy_env: true,
            config_file: None,
        }
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading `ISLAND_*` environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables all environment variables, legacy ones included.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self.load_legacy_env = false;
        self
    }

    /// Disables only the legacy flat variables.
    pub fn without_legacy_env(mut self) -> Self {
        self.load_legacy_env = false;
        self
    }

    /// Merges a programmatic base configuration.
    ///
    /// It replaces the built-in defaults; files and environment variables
    /// still override it.
    pub fn merge(mut self, config: IslandConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<IslandConfig> {
        let figment = self.build_figment()?;

        let config: IslandConfig = figment.extract().map_err(|e| {
            ConfigError::ParseError(format!("Failed to extract configuration: {e}"))
        })?;

        debug!(
            mode = %config.connection.mode,
            logging_level = %config.logging.level,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(IslandConfig::default()));
        let base = std::mem::take(&mut self.figment);
        figment = figment.merge(base);

        if let Some(path) = self.config_file.take() {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = Self::merge_config_file(figment, &path)?;
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_legacy_env {
            figment = Self::merge_legacy_env(figment)?;
        }

        if self.load_env {
            trace!("Loading environment variables with ISLAND_ prefix");
            figment = figment.merge(Env::prefixed("ISLAND_").split("__"));
        }

        Ok(figment)
    }

    fn merge_legacy_env(figment: Figment) -> ConfigResult<Figment> {
        let names: Vec<&str> = LEGACY_ENV.iter().map(|(name, _)| *name).collect();
        let mut figment = figment.merge(Env::raw().only(&names).map(|key| {
            LEGACY_ENV
                .iter()
                .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
                .map_or_else(|| key.as_str().to_string(), |(_, path)| path.to_string())
                .into()
        }));

        if let Ok(raw) = std::env::var(LEGACY_GROUP_ENV) {
            let group_ids = parse_group_ids(&raw)?;
            debug!(count = group_ids.len(), "Using group allow-list from {LEGACY_GROUP_ENV}");
            figment = figment.merge(Serialized::defaults(json!({ "bridge": { "group_ids": group_ids } })));
        }

        if let Ok(raw) = std::env::var(LEGACY_PORT_ENV) {
            let port: u16 = raw.trim().parse().map_err(|e| {
                ConfigError::InvalidAddress(format!("{LEGACY_PORT_ENV}={raw}: {e}"))
            })?;
            figment = figment.merge(Serialized::defaults(
                json!({ "connection": { "listen_addr": format!("0.0.0.0:{port}") } }),
            ));
        }
        Ok(figment)
    }

    /// Merges a single config file, dispatching on its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::ParseError(format!(
                "Unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("island"));
        }
        paths
    }

    /// Merges the first matching file from the search paths.
    fn load_config_files(&self, figment: Figment) -> Figment {
        let mut candidates: Vec<&str> = Vec::new();
        #[cfg(feature = "toml-config")]
        candidates.push("island.toml");
        #[cfg(feature = "yaml-config")]
        candidates.extend(["island.yaml", "island.yml"]);

        for dir in self.resolve_search_paths() {
            for name in &candidates {
                let path = dir.join(name);
                if path.exists() {
                    info!(path = %path.display(), "Loading configuration file");
                    match Self::merge_config_file(figment.clone(), &path) {
                        Ok(merged) => return merged,
                        Err(e) => warn!(path = %path.display(), error = %e, "Skipping configuration file"),
                    }
                }
            }
        }

        warn!("No configuration file found, using defaults");
        figment
    }
}

/// Parses a comma separated list of group ids, ignoring blanks.
fn parse_group_ids(raw: &str) -> ConfigResult<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|e| {
                ConfigError::validation(format!("{LEGACY_GROUP_ENV}: invalid group id '{s}': {e}"))
            })
        })
        .collect()
}

/// Loads configuration from the default search locations.
pub fn load_config() -> ConfigResult<IslandConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from a specific file, with environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<IslandConfig> {
    ConfigLoader::new().file(path).load()
}
