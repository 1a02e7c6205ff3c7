//! Configuration for voiceform.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (VOICEFORM_HOME, VOICEFORM_STORAGE,
//!    SUPABASE_URL, SUPABASE_ANON_KEY; the VITE_-prefixed names used by the
//!    web build are accepted too)
//! 2. Config file (.voiceform/config.yaml)
//! 3. Defaults (~/.voiceform, file storage, form_submissions table)
//!
//! Config file discovery:
//! - Searches current directory and parents for .voiceform/config.yaml
//! - `home` in the config file is relative to the .voiceform/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::DEFAULT_TABLE;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_PROBE_INTERVAL_SECONDS: u64 = 15;
const DEFAULT_SAFETY_NET_SECONDS: u64 = 300;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    /// State directory (relative to the .voiceform/ directory)
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub sync: Option<SyncConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    pub backend: Option<StorageBackend>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    pub table: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    pub probe_interval_seconds: Option<u64>,
    /// 0 disables the periodic safety-net drain
    pub safety_net_seconds: Option<u64>,
}

/// Where the offline queue is persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Sqlite,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            other => anyhow::bail!("Unknown storage backend '{}' (expected file or sqlite)", other),
        }
    }
}

/// Remote store settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    pub table: String,
    pub timeout_seconds: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            table: DEFAULT_TABLE.to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

/// Background sync settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub probe_interval_seconds: u64,
    pub safety_net_seconds: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            probe_interval_seconds: DEFAULT_PROBE_INTERVAL_SECONDS,
            safety_net_seconds: DEFAULT_SAFETY_NET_SECONDS,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the voiceform state directory
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Queue persistence backend
    pub storage_backend: StorageBackend,
    /// Remote store settings
    pub remote: RemoteSettings,
    /// Background sync settings
    pub sync: SyncSettings,
}

impl ResolvedConfig {
    /// Directory for the file storage backend
    pub fn queue_dir(&self) -> PathBuf {
        self.home.join("queue")
    }

    /// Database path for the sqlite storage backend
    pub fn sqlite_path(&self) -> PathBuf {
        self.home.join("queue.db")
    }

    /// Lock file shared by every process draining this home
    pub fn drain_lock_path(&self) -> PathBuf {
        self.home.join("drain.lock")
    }

    /// Per-request timeout for the remote client
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_seconds)
    }

    /// How often connectivity is probed in watch mode
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.sync.probe_interval_seconds.max(1))
    }

    /// Periodic drain while online, if enabled
    pub fn safety_net(&self) -> Option<Duration> {
        match self.sync.safety_net_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".voiceform").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// First non-empty value among the given environment variables
fn env_var(env: &dyn Fn(&str) -> Option<String>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env(name))
        .find(|value| !value.trim().is_empty())
}

/// Merge a parsed config file, environment and defaults
fn resolve(
    config_file: Option<(PathBuf, ConfigFile)>,
    env: &dyn Fn(&str) -> Option<String>,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let (config_path, file) = match config_file {
        Some((path, file)) => (Some(path), Some(file)),
        None => (None, None),
    };

    let home = if let Some(env_home) = env_var(env, &["VOICEFORM_HOME"]) {
        PathBuf::from(env_home)
    } else if let (Some(path), Some(home)) = (
        config_path.as_ref(),
        file.as_ref().and_then(|f| f.home.as_ref()),
    ) {
        let voiceform_dir = path.parent().unwrap_or(Path::new("."));
        resolve_path(voiceform_dir, home)
    } else {
        default_home
    };

    let storage_backend = match env_var(env, &["VOICEFORM_STORAGE"]) {
        Some(value) => value.parse()?,
        None => file
            .as_ref()
            .and_then(|f| f.storage.as_ref())
            .and_then(|s| s.backend)
            .unwrap_or_default(),
    };

    let remote_file = file
        .as_ref()
        .and_then(|f| f.remote.clone())
        .unwrap_or_default();
    let remote = RemoteSettings {
        url: env_var(env, &["SUPABASE_URL", "VITE_SUPABASE_URL"]).or(remote_file.url),
        anon_key: env_var(env, &["SUPABASE_ANON_KEY", "VITE_SUPABASE_ANON_KEY"])
            .or(remote_file.anon_key),
        table: remote_file
            .table
            .unwrap_or_else(|| DEFAULT_TABLE.to_string()),
        timeout_seconds: remote_file
            .timeout_seconds
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS),
    };

    let sync_file = file
        .as_ref()
        .and_then(|f| f.sync.clone())
        .unwrap_or_default();
    let sync = SyncSettings {
        probe_interval_seconds: sync_file
            .probe_interval_seconds
            .unwrap_or(DEFAULT_PROBE_INTERVAL_SECONDS),
        safety_net_seconds: sync_file
            .safety_net_seconds
            .unwrap_or(DEFAULT_SAFETY_NET_SECONDS),
    };

    Ok(ResolvedConfig {
        home,
        config_file: config_path,
        storage_backend,
        remote,
        sync,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".voiceform");

    let config_file = match find_config_file() {
        Some(path) => {
            let file = load_config_file(&path)?;
            Some((path, file))
        }
        None => None,
    };

    resolve(config_file, &|name| std::env::var(name).ok(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
