//! # Device Configuration
//!
//! Configuration management for the edge device.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCKTAG_SERVER_URL=ws://10.0.0.5:8000/ws                          │
//! │     STOCKTAG_DEVICE_ID=shelf-reader-3                                  │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stocktag/device.toml (Linux)                             │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     ws://localhost:8000/ws, auto-generated device id                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # device.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Back Room Reader"
//!
//! [link]
//! server_url = "ws://192.168.1.20:8000/ws"
//! buffer_capacity = 256
//!
//! [sync]
//! interval_secs = 60
//!
//! [hardware]
//! tag_slot = 8
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::transport::LinkConfig;

// =============================================================================
// Device Identity
// =============================================================================

/// Identity of this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name, shown on the display at startup.
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Stocktag Reader".to_string()
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Link Settings
// =============================================================================

/// Remote link behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    /// WebSocket URL of the remote inventory service.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Capacity of the outbound and inbound envelope buffers.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// First reconnect delay (seconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    /// Longest reconnect delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// A connection that stays up this long resets the backoff (seconds).
    #[serde(default = "default_stable_connection")]
    pub stable_connection_secs: u64,

    /// Keepalive ping interval (seconds).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// How long shutdown keeps flushing queued envelopes (milliseconds).
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

fn default_server_url() -> String {
    "ws://localhost:8000/ws".to_string()
}
fn default_buffer_capacity() -> usize {
    256
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_initial_backoff() -> u64 {
    5
}
fn default_max_backoff() -> u64 {
    60
}
fn default_stable_connection() -> u64 {
    10
}
fn default_ping_interval() -> u64 {
    30
}
fn default_drain_timeout() -> u64 {
    2000
}

impl Default for LinkSettings {
    fn default() -> Self {
        LinkSettings {
            server_url: default_server_url(),
            buffer_capacity: default_buffer_capacity(),
            connect_timeout_secs: default_connect_timeout(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            stable_connection_secs: default_stable_connection(),
            ping_interval_secs: default_ping_interval(),
            drain_timeout_ms: default_drain_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Snapshot sync behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between snapshot pushes (seconds).
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// How long startup waits for the first reconciliation (seconds).
    #[serde(default = "default_reconcile_timeout")]
    pub reconcile_timeout_secs: u64,
}

fn default_sync_interval() -> u64 {
    60
}
fn default_reconcile_timeout() -> u64 {
    5
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            interval_secs: default_sync_interval(),
            reconcile_timeout_secs: default_reconcile_timeout(),
        }
    }
}

// =============================================================================
// Interaction Settings
// =============================================================================

/// Quantity confirmation loop behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionSettings {
    /// Button poll interval while an interaction is active (milliseconds).
    #[serde(default = "default_interaction_poll")]
    pub poll_interval_ms: u64,
}

fn default_interaction_poll() -> u64 {
    200
}

impl Default for InteractionSettings {
    fn default() -> Self {
        InteractionSettings {
            poll_interval_ms: default_interaction_poll(),
        }
    }
}

// =============================================================================
// Hardware Settings
// =============================================================================

/// Hardware collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareSettings {
    /// Tag data slot holding the product id.
    #[serde(default = "default_tag_slot")]
    pub tag_slot: u8,

    /// Tag sensor and mode button poll interval (milliseconds).
    #[serde(default = "default_hardware_poll")]
    pub poll_interval_ms: u64,

    /// Longest a single collaborator call may block (milliseconds).
    #[serde(default = "default_hardware_timeout")]
    pub timeout_ms: u64,

    /// Buzzer pulse on a confirmed movement (milliseconds).
    #[serde(default = "default_confirm_pulse")]
    pub confirm_pulse_ms: u64,
}

fn default_tag_slot() -> u8 {
    stocktag_core::DEFAULT_TAG_SLOT
}
fn default_hardware_poll() -> u64 {
    100
}
fn default_hardware_timeout() -> u64 {
    2000
}
fn default_confirm_pulse() -> u64 {
    150
}

impl Default for HardwareSettings {
    fn default() -> Self {
        HardwareSettings {
            tag_slot: default_tag_slot(),
            poll_interval_ms: default_hardware_poll(),
            timeout_ms: default_hardware_timeout(),
            confirm_pulse_ms: default_confirm_pulse(),
        }
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// Local store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// SQLite file path. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Device Configuration
// =============================================================================

/// Complete device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub link: LinkSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub interaction: InteractionSettings,

    #[serde(default)]
    pub hardware: HardwareSettings,

    #[serde(default)]
    pub store: StoreSettings,
}

impl DeviceConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (device.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading device config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load device config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Device config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("device.id must not be empty".into()));
        }

        let url = url::Url::parse(&self.link.server_url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(SyncError::InvalidUrl(format!(
                "Server URL must start with ws:// or wss://, got: {}",
                self.link.server_url
            )));
        }

        if self.link.buffer_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "link.buffer_capacity must be greater than 0".into(),
            ));
        }

        if self.link.initial_backoff_secs == 0
            || self.link.initial_backoff_secs > self.link.max_backoff_secs
        {
            return Err(SyncError::InvalidConfig(
                "link.initial_backoff_secs must be between 1 and link.max_backoff_secs".into(),
            ));
        }

        let intervals = [
            ("link.connect_timeout_secs", self.link.connect_timeout_secs),
            ("link.ping_interval_secs", self.link.ping_interval_secs),
            ("sync.interval_secs", self.sync.interval_secs),
            ("interaction.poll_interval_ms", self.interaction.poll_interval_ms),
            ("hardware.poll_interval_ms", self.hardware.poll_interval_ms),
            ("hardware.timeout_ms", self.hardware.timeout_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(SyncError::InvalidConfig(format!(
                "{name} must be greater than 0"
            )));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("STOCKTAG_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(url) = std::env::var("STOCKTAG_SERVER_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.link.server_url = url;
        }

        if let Ok(path) = std::env::var("STOCKTAG_DB_PATH") {
            debug!(path = %path, "Overriding store path from environment");
            self.store.path = Some(PathBuf::from(path));
        }

        if let Ok(secs) = std::env::var("STOCKTAG_SYNC_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.sync.interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid STOCKTAG_SYNC_INTERVAL_SECS"),
            }
        }

        if let Ok(slot) = std::env::var("STOCKTAG_TAG_SLOT") {
            match slot.parse::<u8>() {
                Ok(s) => self.hardware.tag_slot = s,
                Err(_) => warn!(value = %slot, "Ignoring invalid STOCKTAG_TAG_SLOT"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stocktag", "stocktag")
            .map(|dirs| dirs.config_dir().join("device.toml"))
    }

    /// Returns the default store path.
    pub fn default_store_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stocktag", "stocktag")
            .map(|dirs| dirs.data_dir().join("store.db"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the configured store path, falling back to the platform data
    /// directory and finally the working directory.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .or_else(Self::default_store_path)
            .unwrap_or_else(|| PathBuf::from("stocktag.db"))
    }

    /// Builds the link configuration.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            url: self.link.server_url.clone(),
            buffer_capacity: self.link.buffer_capacity,
            connect_timeout: Duration::from_secs(self.link.connect_timeout_secs),
            initial_backoff: Duration::from_secs(self.link.initial_backoff_secs),
            max_backoff: Duration::from_secs(self.link.max_backoff_secs),
            stable_connection: Duration::from_secs(self.link.stable_connection_secs),
            ping_interval: Duration::from_secs(self.link.ping_interval_secs),
            drain_timeout: Duration::from_millis(self.link.drain_timeout_ms),
        }
    }

    /// Interval between snapshot pushes.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    /// Startup reconciliation wait.
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.reconcile_timeout_secs)
    }

    /// Button poll interval during an interaction.
    pub fn interaction_poll_interval(&self) -> Duration {
        Duration::from_millis(self.interaction.poll_interval_ms)
    }

    /// Tag sensor and mode button poll interval.
    pub fn hardware_poll_interval(&self) -> Duration {
        Duration::from_millis(self.hardware.poll_interval_ms)
    }

    /// Bound on a single collaborator call.
    pub fn hardware_timeout(&self) -> Duration {
        Duration::from_millis(self.hardware.timeout_ms)
    }
}
