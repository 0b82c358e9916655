use crate::relay::{BrokerOptions, DEFAULT_RESPONSE_TIMEOUT_SECS};
use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Env var that pins the config directory (also set by `--config-dir`).
pub const CONFIG_DIR_ENV: &str = "AGENT_RELAY_CONFIG_DIR";

const CONFIG_FILE_NAME: &str = "config.toml";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level relay configuration, loaded from `config.toml`.
///
/// Resolution order: `AGENT_RELAY_CONFIG_DIR` env → `~/.agent-relay/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// HTTP listener settings (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Message store and correlator settings (`[relay]`).
    #[serde(default)]
    pub relay: RelayConfig,
}

// ── Gateway ───────────────────────────────────────────────────────

/// Gateway server configuration (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Gateway port (default: 3000)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Allow binding to a non-loopback address (default: false). The relay has
    /// no authentication, so anyone who can reach the port can read every message.
    #[serde(default)]
    pub allow_public_bind: bool,
    /// Maximum accepted request body in bytes (default: 1 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_max_body_bytes() -> usize {
    1_048_576
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            allow_public_bind: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

// ── Relay ─────────────────────────────────────────────────────────

/// Message store and correlator configuration (`[relay]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RelayConfig {
    /// Seconds a send-and-wait caller is held before a 408 (default: 30)
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
    /// Cap on retained messages; 0 keeps everything (default: 0)
    #[serde(default)]
    pub max_messages: usize,
}

fn default_response_timeout_secs() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_SECS
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_response_timeout_secs(),
            max_messages: 0,
        }
    }
}

impl RelayConfig {
    pub fn broker_options(&self) -> BrokerOptions {
        BrokerOptions {
            response_timeout: Duration::from_secs(self.response_timeout_secs),
            max_messages: self.max_messages,
        }
    }
}

// ── Load / save ───────────────────────────────────────────────────

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".agent-relay"))
}

fn resolve_config_dir() -> Result<PathBuf> {
    if let Ok(custom_config_dir) = std::env::var(CONFIG_DIR_ENV) {
        let custom_config_dir = custom_config_dir.trim();
        if !custom_config_dir.is_empty() {
            return Ok(PathBuf::from(custom_config_dir));
        }
    }
    default_config_dir()
}

fn parse_bool_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

impl Config {
    pub async fn load() -> Result<Self> {
        let config_dir = resolve_config_dir()?;
        Self::load_in(&config_dir).await
    }

    /// Load `config.toml` from `config_dir`, falling back to defaults if absent.
    ///
    /// Nothing is written to disk. Environment overrides are applied and the
    /// result validated.
    pub async fn load_in(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        let from_file = fs::try_exists(&config_path)
            .await
            .context("Failed to check for config file")?;
        let mut config = if from_file {
            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            toml::from_str::<Config>(&contents).context("Failed to parse config file")?
        } else {
            Config::default()
        };
        config.config_path = config_path;

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            from_file,
            "Config loaded"
        );
        Ok(config)
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.max_body_bytes == 0 {
            anyhow::bail!("gateway.max_body_bytes must be greater than 0");
        }
        if self.relay.response_timeout_secs == 0 {
            anyhow::bail!("relay.response_timeout_secs must be greater than 0");
        }
        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    pub(crate) fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Gateway port: AGENT_RELAY_PORT or PORT
        if let Some(port_str) = lookup("AGENT_RELAY_PORT").or_else(|| lookup("PORT")) {
            match port_str.trim().parse::<u16>() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!(value = %port_str, "ignoring invalid port override"),
            }
        }

        // Gateway host: AGENT_RELAY_HOST or HOST
        if let Some(host) = lookup("AGENT_RELAY_HOST").or_else(|| lookup("HOST")) {
            if !host.trim().is_empty() {
                self.gateway.host = host.trim().to_string();
            }
        }

        if let Some(val) = lookup("AGENT_RELAY_ALLOW_PUBLIC_BIND") {
            self.gateway.allow_public_bind = parse_bool_flag(val.trim());
        }

        if let Some(secs) = lookup("AGENT_RELAY_RESPONSE_TIMEOUT_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.relay.response_timeout_secs = secs,
                _ => tracing::warn!(value = %secs, "ignoring invalid response timeout override"),
            }
        }
    }

    /// Write the config atomically (temp file + rename).
    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or(CONFIG_FILE_NAME);
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }
        Ok(())
    }
}
