//! Shared types used across all relay crates.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Environment variable holding the content-guard API key when the config file leaves it unset.
pub const ENV_GUARD_API_KEY: &str = "V1_API_KEY";
/// Environment variable naming the application registered with the content guard.
pub const ENV_GUARD_APP_NAME: &str = "GUARDTRAIL_APP_NAME";

/// A chat message as received from the caller. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct UserMessage {
    text: String,
    received_at: SystemTime,
}

impl UserMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            received_at: SystemTime::now(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }
}

/// Model endpoint settings (local inference server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base URL of the inference server, e.g. `http://localhost:11434`.
    pub api_url: String,
    /// Model name passed through on every generate call.
    pub name: String,
    pub num_thread: u32,
    pub num_gpu: u32,
    pub num_ctx: u32,
    /// Upper bound on forwarded fragments per response. Unset means unlimited.
    #[serde(default)]
    pub max_stream_tokens: Option<usize>,
}

/// Content-guard settings. When `enabled` is false the relay skips both moderation passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    pub enabled: bool,
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub app_name: String,
    pub timeout_secs: u64,
}

impl ModerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// True when a non-empty API key is available.
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// Information-provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Instance metadata service root (trailing slash expected).
    pub metadata_base_url: String,
    pub metadata_timeout_ms: u64,
    pub credentials_timeout_ms: u64,
    /// Outer bound applied to every provider call by the context assembler.
    pub provider_timeout_secs: u64,
    pub peer_cache_ttl_secs: u64,
    /// Maximum peer instances rendered into the context. Unset means unlimited.
    #[serde(default)]
    pub peer_listing_cap: Option<usize>,
    /// Maximum network rules rendered into the context. Unset means unlimited.
    #[serde(default)]
    pub network_rules_cap: Option<usize>,
    pub default_region: String,
    /// Path or name of the AWS CLI binary used for fleet inventory.
    pub aws_cli: String,
}

impl ProvidersConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn credentials_timeout(&self) -> Duration {
        Duration::from_millis(self.credentials_timeout_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn peer_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.peer_cache_ttl_secs)
    }
}

/// Global application configuration (gateway + pipeline). Load from TOML or env.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub app_name: String,
    pub host: String,
    pub port: u16,
    pub model: ModelConfig,
    pub moderation: ModerationConfig,
    pub providers: ProvidersConfig,
}

impl RelayConfig {
    /// Load config from file and environment. Precedence: env `RELAY_*` > file (`RELAY_CONFIG` path or `config/gateway.toml`) > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("RELAY_CONFIG").unwrap_or_else(|_| "config/gateway.toml".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Same as [`RelayConfig::load`] with an explicit file path. A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .set_default("app_name", "Guard Relay")?
            .set_default("host", "0.0.0.0")?
            .set_default("port", 5000_i64)?
            .set_default("model.api_url", "http://localhost:11434")?
            .set_default("model.name", "llama3.2")?
            .set_default("model.num_thread", 8_i64)?
            .set_default("model.num_gpu", 0_i64)?
            .set_default("model.num_ctx", 2048_i64)?
            .set_default("moderation.enabled", true)?
            .set_default(
                "moderation.api_url",
                "https://api.xdr.trendmicro.com/beta/aiSecurity/guard?detailedResponse=false",
            )?
            .set_default("moderation.app_name", "")?
            .set_default("moderation.timeout_secs", 10_i64)?
            .set_default(
                "providers.metadata_base_url",
                "http://169.254.169.254/latest/meta-data/",
            )?
            .set_default("providers.metadata_timeout_ms", 800_i64)?
            .set_default("providers.credentials_timeout_ms", 1500_i64)?
            .set_default("providers.provider_timeout_secs", 5_i64)?
            .set_default("providers.peer_cache_ttl_secs", 20_i64)?
            .set_default("providers.peer_listing_cap", 10_i64)?
            .set_default("providers.default_region", "us-east-1")?
            .set_default("providers.aws_cli", "aws")?;

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("RELAY").separator("__"))
            .build()?;

        let mut cfg: Self = built.try_deserialize()?;
        cfg.apply_guard_env();
        Ok(cfg)
    }

    /// Fills the content-guard key and app name from their conventional env vars when unset.
    fn apply_guard_env(&mut self) {
        if !self.moderation.is_configured() {
            self.moderation.api_key = std::env::var(ENV_GUARD_API_KEY)
                .ok()
                .filter(|k| !k.trim().is_empty());
        }
        if self.moderation.app_name.trim().is_empty() {
            self.moderation.app_name = std::env::var(ENV_GUARD_APP_NAME)
                .ok()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "guard-relay".to_string());
        }
    }
}
