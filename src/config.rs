//! Configuration file, compiled snapshots and hot reload
//!
//! The TOML file is parsed into [`NotifierConfig`], validated and compiled
//! into an immutable [`ConfigSnapshot`]. [`ConfigStore`] hands out the
//! active snapshot as an `Arc`; a reload swaps in a new one only after it
//! compiled cleanly, so readers never observe a partial configuration.

use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::args::NotifierOptions;
use crate::error::{NotifyError, Result};
use crate::rules::{DEFAULT_PROTOCOL, Protocol, RepositoryRule};

const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 5;
const DEFAULT_NOTIFIER_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MIRROR_TIMEOUT_SECS: u64 = 120;
const DEFAULT_HISTORY_SIZE: usize = 50;
const DEFAULT_REMOTE_HOST: &str = "github.com";
pub const DEFAULT_STATE_FILE: &str = "git-notifier.dat";

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    pub workdir: String,
    pub monitor_interval_secs: Option<u64>,
    pub silent_init: Option<bool>,
    pub remote_host: Option<String>,
    pub webhook_secret: Option<String>,
    pub allowed_ips: Option<Vec<String>>,
    pub history_size: Option<usize>,
    pub mirror_timeout_secs: Option<u64>,
    pub notifier: ToolConfig,
    #[serde(default)]
    pub repository: Vec<RepositoryConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolConfig {
    pub tool: String,
    pub timeout_secs: Option<u64>,
    pub state_file: Option<String>,
    #[serde(default)]
    pub options: NotifierOptions,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    pub pattern: String,
    pub protocol: Option<String>,
    #[serde(default)]
    pub options: NotifierOptions,
}

impl NotifierConfig {
    pub fn get_monitor_interval(&self) -> Duration {
        Duration::from_secs(
            self.monitor_interval_secs
                .unwrap_or(DEFAULT_MONITOR_INTERVAL_SECS),
        )
    }

    pub fn get_silent_init(&self) -> bool {
        self.silent_init.unwrap_or(true)
    }

    pub fn get_remote_host(&self) -> &str {
        self.remote_host.as_deref().unwrap_or(DEFAULT_REMOTE_HOST)
    }

    /// Returns the webhook secret when one is set and non-empty.
    pub fn get_webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref().filter(|s| !s.is_empty())
    }

    pub fn get_history_size(&self) -> usize {
        self.history_size.unwrap_or(DEFAULT_HISTORY_SIZE)
    }

    /// Limit for each git step of a mirror update, `None` when set to 0.
    pub fn get_mirror_timeout(&self) -> Option<Duration> {
        match self.mirror_timeout_secs.unwrap_or(DEFAULT_MIRROR_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl ToolConfig {
    /// `None` when `timeout_secs = 0`.
    pub fn get_timeout(&self) -> Option<Duration> {
        match self.timeout_secs.unwrap_or(DEFAULT_NOTIFIER_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn get_state_file(&self) -> &str {
        self.state_file.as_deref().unwrap_or(DEFAULT_STATE_FILE)
    }
}

/// A validated configuration generation
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub workdir: PathBuf,
    pub monitor_interval: Duration,
    pub silent_init: bool,
    pub remote_host: String,
    pub webhook_secret: Option<String>,
    /// Empty means every client is allowed
    pub allowed_ips: Vec<IpAddr>,
    pub history_size: usize,
    pub mirror_timeout: Option<Duration>,
    pub tool: PathBuf,
    pub tool_timeout: Option<Duration>,
    pub state_file: String,
    pub base_options: NotifierOptions,
    /// In configuration order
    pub rules: Vec<RepositoryRule>,
}

impl ConfigSnapshot {
    pub fn from_config(config: NotifierConfig) -> Result<Self> {
        if config.workdir.trim().is_empty() {
            return Err(NotifyError::ConfigError(
                "'workdir' must not be empty".to_string(),
            ));
        }
        if config.notifier.tool.trim().is_empty() {
            return Err(NotifyError::ConfigError(
                "'notifier.tool' must not be empty".to_string(),
            ));
        }
        let state_file = config.notifier.get_state_file();
        if state_file.is_empty() || state_file.contains('/') {
            return Err(NotifyError::ConfigError(format!(
                "'notifier.state_file' must be a plain file name, got '{}'",
                state_file
            )));
        }

        let allowed_ips = config
            .allowed_ips
            .iter()
            .flatten()
            .map(|ip| {
                ip.parse::<IpAddr>().map_err(|e| {
                    NotifyError::ConfigError(format!("Invalid address '{}' in allowed_ips: {}", ip, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let rules = config
            .repository
            .iter()
            .map(|repo| {
                let protocol = repo.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL);
                if let Err(e) = protocol.parse::<Protocol>() {
                    // Not fatal here; dispatch skips the rule.
                    warn!("Repository pattern '{}': {}", repo.pattern, e);
                }
                RepositoryRule::new(&repo.pattern, protocol, repo.options.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            workdir: PathBuf::from(&config.workdir),
            monitor_interval: config.get_monitor_interval(),
            silent_init: config.get_silent_init(),
            remote_host: config.get_remote_host().to_string(),
            webhook_secret: config.get_webhook_secret().map(String::from),
            allowed_ips,
            history_size: config.get_history_size(),
            mirror_timeout: config.get_mirror_timeout(),
            tool: PathBuf::from(&config.notifier.tool),
            tool_timeout: config.notifier.get_timeout(),
            state_file: state_file.to_string(),
            base_options: config.notifier.options,
            rules,
        })
    }

    pub fn parse(config_str: &str) -> Result<Self> {
        let config: NotifierConfig = toml::from_str(config_str)?;
        Self::from_config(config)
    }
}

/// Load and compile the configuration file
pub fn load_config(path: &Path) -> Result<ConfigSnapshot> {
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        NotifyError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    parse_config(path, &config_str)
}

/// Same as [`load_config`], without blocking the runtime
pub async fn reload_config(path: &Path) -> Result<ConfigSnapshot> {
    let config_str = tokio::fs::read_to_string(path).await.map_err(|e| {
        NotifyError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    parse_config(path, &config_str)
}

fn parse_config(path: &Path, config_str: &str) -> Result<ConfigSnapshot> {
    ConfigSnapshot::parse(config_str).map_err(|e| {
        NotifyError::ConfigError(format!(
            "Failed to load config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// The active configuration snapshot
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>, snapshot: ConfigSnapshot) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = load_config(&path)?;
        Ok(Self::new(path, snapshot))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    pub fn replace(&self, snapshot: ConfigSnapshot) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(snapshot);
    }

    /// Re-read the file. The active snapshot only changes on success.
    pub async fn reload(&self) -> Result<Arc<ConfigSnapshot>> {
        let snapshot = reload_config(&self.path).await?;
        info!(
            "Configuration reloaded from {} ({} repository rules)",
            self.path.display(),
            snapshot.rules.len()
        );
        self.replace(snapshot);
        Ok(self.snapshot())
    }
}

async fn modified_time(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Poll the config file's modification time and reload when it changes.
///
/// The interval is re-read from the active snapshot on every tick; an
/// interval of zero stops the watcher.
pub fn spawn_config_watcher(store: Arc<ConfigStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_modified = modified_time(store.path()).await;
        loop {
            let interval = store.snapshot().monitor_interval;
            if interval.is_zero() {
                info!("Config file monitoring disabled");
                return;
            }
            tokio::time::sleep(interval).await;

            let modified = modified_time(store.path()).await;
            if modified.is_none() || modified == last_modified {
                continue;
            }
            last_modified = modified;

            if let Err(e) = store.reload().await {
                error!("{}; keeping previous configuration", e);
            }
        }
    })
}
