//! Configuration management for contact-form
//!
//! Config file location:
//! - Linux: ~/.config/contact-form/config.toml
//! - macOS: ~/Library/Application Support/contact-form/config.toml
//! - Windows: %APPDATA%/contact-form/config.toml
//!
//! You can override the config location by setting `CONTACT_FORM_CONFIG_PATH`.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Marker left in the endpoint URL until the spreadsheet web app is deployed.
pub const PLACEHOLDER_SCRIPT_ID: &str = "YOUR_SCRIPT_ID";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Spreadsheet web app endpoint
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Acknowledgment and cool-down timings
    #[serde(default)]
    pub feedback: FeedbackConfig,

    /// Local submission counters
    #[serde(default)]
    pub counters: CountersConfig,
}

impl Config {
    /// Load configuration from file or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {}", config_path.display()))?;

            toml::from_str::<Config>(&content).with_context(|| {
                format!("Failed to parse config from {}", config_path.display())
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, toml)
            .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("CONTACT_FORM_CONFIG_PATH") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }

        let proj_dirs = ProjectDirs::from("com", "contactform", "contact-form")
            .context("Could not determine project directories")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Create default config file if it doesn't exist
    pub fn init() -> Result<Self> {
        let config = Self::load()?;

        // Save default config if file doesn't exist
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            config.save()?;
        }

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = std::env::var("CONTACT_FORM_ENDPOINT_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
        {
            self.endpoint.url = url.trim().to_string();
        }

        if let Some(timeout) = std::env::var("CONTACT_FORM_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
        {
            self.endpoint.timeout_seconds = Some(timeout);
        }
    }
}

/// Endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Web app URL that receives the form record
    #[serde(default = "default_endpoint_url")]
    pub url: String,

    /// Request timeout in seconds. Unset means the transport default.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Whether to verify SSL certificates
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
}

impl EndpointConfig {
    /// `false` while the URL is empty or still carries the setup placeholder.
    pub fn is_configured(&self) -> bool {
        let url = self.url.trim();
        !url.is_empty() && !url.contains(PLACEHOLDER_SCRIPT_ID)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: default_endpoint_url(),
            timeout_seconds: None,
            verify_ssl: default_true(),
        }
    }
}

fn default_endpoint_url() -> String {
    format!("https://script.google.com/macros/s/{PLACEHOLDER_SCRIPT_ID}/exec")
}

fn default_true() -> bool {
    true
}

/// Acknowledgment timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// How long a success or error acknowledgment stays visible
    #[serde(default = "default_acknowledgment_secs")]
    pub acknowledgment_secs: u64,

    /// Submit stays disabled this long after a dispatch attempt
    #[serde(default = "default_resubmit_cooldown_secs")]
    pub resubmit_cooldown_secs: u64,
}

impl FeedbackConfig {
    pub fn acknowledgment(&self) -> Duration {
        Duration::from_secs(self.acknowledgment_secs)
    }

    pub fn resubmit_cooldown(&self) -> Duration {
        Duration::from_secs(self.resubmit_cooldown_secs)
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            acknowledgment_secs: default_acknowledgment_secs(),
            resubmit_cooldown_secs: default_resubmit_cooldown_secs(),
        }
    }
}

fn default_acknowledgment_secs() -> u64 {
    5
}

fn default_resubmit_cooldown_secs() -> u64 {
    2
}

/// Which counter entries a reset removes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResetScope {
    /// Day-scoped entries and the lifetime total
    #[default]
    All,
    /// Day-scoped entries only; the lifetime total survives
    DaysOnly,
}

/// Counter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountersConfig {
    #[serde(default)]
    pub reset_scope: ResetScope,
}

/// Get configuration file path for display purposes
pub fn get_config_path() -> Result<String> {
    let path = Config::config_path()?;
    Ok(path.display().to_string())
}

/// Initialize configuration (load or create default)
pub fn init_config() -> Result<Config> {
    Config::init()
}
