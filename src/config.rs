use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default interval between fallback polls while the live channel is down
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default quiet period before a dashboard refetch after an import finishes
pub const DEFAULT_REFRESH_DEBOUNCE_MS: u64 = 2_000;

/// Default number of imports allowed in flight at once
pub const DEFAULT_MAX_CONCURRENT_IMPORTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub server_url: Option<String>,
    pub auth_token: Option<String>,
    pub poll_interval_secs: u64,
    pub refresh_debounce_ms: u64,
    pub max_concurrent_imports: usize,
    pub reconnect: ReconnectConfig,
    pub endpoints: EndpointConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            auth_token: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            refresh_debounce_ms: DEFAULT_REFRESH_DEBOUNCE_MS,
            max_concurrent_imports: DEFAULT_MAX_CONCURRENT_IMPORTS,
            reconnect: ReconnectConfig::default(),
            endpoints: EndpointConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Both a server and a token are needed before anything talks to the backend
    pub fn has_valid_auth(&self) -> bool {
        self.server_url.as_deref().is_some_and(|s| !s.trim().is_empty())
            && self.auth_token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    pub fn require_server_url(&self) -> Result<&str> {
        self.server_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SyncError::Config("No server URL configured".to_string()))
    }

    pub fn require_token(&self) -> Result<&str> {
        self.auth_token
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SyncError::Config("No auth token configured".to_string()))
    }
}

/// Live channel reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of each delay randomly added or removed
    pub jitter: f64,
    /// How often an exhausted connection tries the live upgrade again
    pub upgrade_retry_secs: u64,
    /// A connection that drops sooner than this counts as a failed attempt
    pub stable_after_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
            upgrade_retry_secs: 300,
            stable_after_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointConfig {
    pub dashboard: String,
    pub subscription: String,
    pub live_stream: String,
    pub live_poll: String,
    pub import: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            dashboard: "/dashboard/sales-invoice".to_string(),
            subscription: "/billing/subscription".to_string(),
            live_stream: "/live/stream".to_string(),
            live_poll: "/live/poll".to_string(),
            import: "/import/upload".to_string(),
        }
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(home_dir) = dirs::home_dir() {
        Ok(home_dir.join(".portal-sync"))
    } else {
        Err(SyncError::Config("Could not find home directory".to_string()))
    }
}

pub fn get_config_file_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.json"))
}

pub fn get_logs_dir() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("logs"))
}

pub fn ensure_config_dir() -> Result<()> {
    ensure_private_dir(&get_config_dir()?)
}

pub fn ensure_logs_dir() -> Result<()> {
    ensure_private_dir(&get_logs_dir()?)
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;

        // 700: owner only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = fs::metadata(dir)?.permissions();
            permissions.set_mode(0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    Ok(())
}

pub fn load_config() -> Result<SyncConfig> {
    ensure_config_dir()?;
    load_config_from(&get_config_file_path()?)
}

pub fn load_config_from(config_file: &Path) -> Result<SyncConfig> {
    if config_file.exists() {
        let content = fs::read_to_string(config_file)?;
        let config: SyncConfig = serde_json::from_str(&content)?;
        Ok(config)
    } else {
        Ok(SyncConfig::default())
    }
}

pub fn save_config(config: &SyncConfig) -> Result<()> {
    ensure_config_dir()?;
    save_config_to(&get_config_file_path()?, config)
}

pub fn save_config_to(config_file: &Path, config: &SyncConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_file, content)?;

    // 600: the file holds the auth token
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = fs::metadata(config_file)?.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(config_file, permissions)?;
    }

    Ok(())
}

pub fn clear_config() -> Result<()> {
    save_config(&SyncConfig::default())
}
