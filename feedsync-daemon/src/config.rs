//! Daemon Configuration
//!
//! Configuration management for the feedsync daemon.

use anyhow::{Context, Result};
use feedsync_core::{ArrivalDetection, SessionConfig, DEFAULT_NOTIFICATION_ID_BASE, FEED_LIMIT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "daemon.toml";
const USER_ID_FILE: &str = "user_id";

/// Daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Who is viewing the feed
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Feed configuration
    #[serde(default)]
    pub feed: FeedConfig,

    /// Notification configuration
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Subscription recovery
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Storage paths
    #[serde(default)]
    pub paths: PathConfig,
}

/// Identity configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Signed-in user id (absent = signed out, unless a registration saved one)
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Number of most recent messages kept in view
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// How new messages are told apart from history
    #[serde(default)]
    pub detection: ArrivalDetection,
}

/// Desktop notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Show desktop notifications for new messages
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// First notification id used after every start
    #[serde(default = "default_id_base")]
    pub id_base: i32,

    /// Application name reported to the notification server
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Expiry in milliseconds (-1 = server default, 0 = never)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i32,
}

/// Recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Resubscribe automatically after the feed subscription fails
    #[serde(default = "default_true")]
    pub auto_resubscribe: bool,

    /// Delay before the first resubscribe attempt, in seconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Config directory
    pub config_dir: PathBuf,

    /// Shared feed directory (message log and profiles)
    pub store_dir: PathBuf,
}

fn default_limit() -> usize {
    FEED_LIMIT
}

fn default_id_base() -> i32 {
    DEFAULT_NOTIFICATION_ID_BASE
}

fn default_app_name() -> String {
    "Feedsync".to_string()
}

fn default_timeout_ms() -> i32 {
    5000
}

fn default_initial_delay() -> u64 {
    2
}

fn default_max_attempts() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            detection: ArrivalDetection::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            id_base: default_id_base(),
            app_name: default_app_name(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            auto_resubscribe: true,
            initial_delay_secs: default_initial_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RecoveryConfig {
    /// Delay before the first attempt
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        let config_dir = default_config_dir();
        let store_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("feedsync")
            .join("feed");

        Self {
            config_dir,
            store_dir,
        }
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("feedsync")
}

impl Config {
    /// Load configuration from the default location, creating it if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_dir().join(CONFIG_FILE))
    }

    /// Load configuration from `config_path`, creating a default if not found
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents = fs::read_to_string(config_path).with_context(|| {
                format!("Failed to read config file {}", config_path.display())
            })?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let mut config = Config::default();
            if let Some(dir) = config_path.parent() {
                config.paths.config_dir = dir.to_path_buf();
            }
            config.save()?;
            tracing::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;

        let config_path = self.config_path();
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;
        fs::create_dir_all(&self.paths.store_dir).context("Failed to create feed directory")?;
        Ok(())
    }

    /// Path of the config file itself
    pub fn config_path(&self) -> PathBuf {
        self.paths.config_dir.join(CONFIG_FILE)
    }

    /// Path of the saved user id (written by registration)
    pub fn user_id_path(&self) -> PathBuf {
        self.paths.config_dir.join(USER_ID_FILE)
    }

    /// Resolve the signed-in user id
    ///
    /// Priority:
    /// 1. Config file `identity.user_id`
    /// 2. Saved user id file
    /// 3. None (signed out)
    pub fn load_user_id(&self) -> Option<String> {
        if let Some(id) = self.identity.user_id.as_deref() {
            if !id.trim().is_empty() {
                return Some(id.trim().to_string());
            }
        }

        let user_id_path = self.user_id_path();
        if user_id_path.exists() {
            if let Ok(id) = fs::read_to_string(&user_id_path) {
                let id = id.trim().to_string();
                if !id.is_empty() {
                    tracing::info!("Loaded user id from {}", user_id_path.display());
                    return Some(id);
                }
            }
        }

        None
    }

    /// Save the user id of a registration or sign-in
    pub fn save_user_id(&self, user_id: &str) -> Result<()> {
        let user_id_path = self.user_id_path();

        if let Some(parent) = user_id_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        fs::write(&user_id_path, user_id).context("Failed to save user id")?;
        tracing::info!("Saved user id to {}", user_id_path.display());
        Ok(())
    }

    /// Remove the saved user id, returning whether one was saved
    pub fn clear_user_id(&self) -> Result<bool> {
        let user_id_path = self.user_id_path();
        match fs::remove_file(&user_id_path) {
            Ok(()) => {
                tracing::info!("Removed saved user id {}", user_id_path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context("Failed to remove saved user id"),
        }
    }

    /// Session settings derived from this config
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            limit: self.feed.limit,
            detection: self.feed.detection,
            notification_id_base: self.notifications.id_base,
        }
    }
}
