//! Bootstrap configuration and root folder resolution
//!
//! Two tiers:
//! 1. **Bootstrap** (this module): root folder, bind address, LLM defaults,
//!    logging. Read once at startup from CLI / environment / TOML.
//! 2. **Runtime**: the `settings` table, see [`crate::db::init`].
//!
//! Root folder priority:
//! 1. Command-line argument
//! 2. `QUICKVIBE_ROOT_FOLDER` (or legacy `QUICKVIBE_ROOT`)
//! 3. TOML `root_folder`
//! 4. OS-dependent compiled default
//!
//! A missing or malformed TOML file is logged and ignored.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Primary root folder environment variable
pub const ROOT_FOLDER_ENV: &str = "QUICKVIBE_ROOT_FOLDER";
/// Legacy alias still honored
pub const ROOT_FOLDER_ENV_LEGACY: &str = "QUICKVIBE_ROOT";
/// Environment variable holding the Anthropic API key
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "quickvibe.db";

/// Built-in defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = dirs::data_local_dir()
            .map(|d| d.join("quickvibe"))
            .unwrap_or_else(|| PathBuf::from("./quickvibe_data"));

        Self {
            root_folder,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Bootstrap configuration loaded from TOML
///
/// Every field is optional in the file; defaults are applied on deserialize.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Scan for a free port when `port` is taken
    #[serde(default = "default_true")]
    pub auto_port: bool,

    /// Prebuilt front-end bundle served as the fallback route
    #[serde(default)]
    pub static_dir: Option<PathBuf>,

    #[serde(default)]
    pub anthropic_api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Generation requests per user per minute (0 disables limiting)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,

    /// Treat unauthenticated requests as the built-in local user
    #[serde(default)]
    pub allow_local_user: bool,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            host: default_host(),
            port: default_port(),
            auto_port: true,
            static_dir: None,
            anthropic_api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            rate_limit_per_minute: default_rate_limit(),
            session_ttl_days: default_session_ttl_days(),
            allow_local_user: false,
            logging: LoggingConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3456
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_rate_limit() -> u32 {
    20
}

fn default_session_ttl_days() -> i64 {
    7
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Load from an explicit path, or the platform default location
    ///
    /// Never fails: a missing file yields defaults, a malformed one logs a
    /// warning and yields defaults.
    pub fn load(explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_file(),
        };

        let Some(path) = path else {
            debug!("No config file found, using built-in defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Ignoring config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Config file {} not readable ({}), using defaults", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Locate the platform config file, if one exists
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("quickvibe").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/quickvibe/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Resolves the root folder following the documented priority order
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml_root: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            debug!("{}: root folder from command line", self.module_name);
            return path.clone();
        }

        for var in [ROOT_FOLDER_ENV, ROOT_FOLDER_ENV_LEGACY] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    debug!("{}: root folder from {}", self.module_name, var);
                    return PathBuf::from(path);
                }
            }
        }

        if let Some(path) = &self.toml_root {
            debug!("{}: root folder from TOML", self.module_name);
            return path.clone();
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder and derives paths inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }
}

/// Where an LLM API key was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeySource {
    Database,
    Environment,
    Config,
}

impl ApiKeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeySource::Database => "database",
            ApiKeySource::Environment => "environment",
            ApiKeySource::Config => "config",
        }
    }
}

/// Non-empty, non-whitespace key
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// First usable key in priority order: database → environment → TOML
pub fn select_api_key(
    db_key: Option<String>,
    env_key: Option<String>,
    toml_key: Option<String>,
) -> Option<(String, ApiKeySource)> {
    usable_keys(db_key, env_key, toml_key).into_iter().next()
}

/// Like [`select_api_key`], but warns when more than one tier holds a usable key
pub fn resolve_api_key(
    db_key: Option<String>,
    env_key: Option<String>,
    toml_key: Option<String>,
) -> Option<(String, ApiKeySource)> {
    let usable = usable_keys(db_key, env_key, toml_key);

    if usable.len() > 1 {
        let names: Vec<&str> = usable.iter().map(|(_, s)| s.as_str()).collect();
        warn!(
            "API key found in multiple sources: {}. Using {}.",
            names.join(", "),
            usable[0].1.as_str()
        );
    }

    usable.into_iter().next()
}

fn usable_keys(
    db_key: Option<String>,
    env_key: Option<String>,
    toml_key: Option<String>,
) -> Vec<(String, ApiKeySource)> {
    [
        (db_key, ApiKeySource::Database),
        (env_key, ApiKeySource::Environment),
        (toml_key, ApiKeySource::Config),
    ]
    .into_iter()
    .filter_map(|(key, source)| key.filter(|k| is_valid_key(k)).map(|k| (k, source)))
    .collect()
}
