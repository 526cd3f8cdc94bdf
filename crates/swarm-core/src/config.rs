use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::BudgetConfig;

/// Top-level configuration loaded from `~/.codeswarm/config.toml` (or the
/// path named by `SWARM_CONFIG`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl Config {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(cfg)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn default_path() -> PathBuf {
        if let Ok(p) = std::env::var("SWARM_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".codeswarm")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("missing secret: {0}")]
    MissingSecret(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "swarmd".into()
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8700
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Env var holding the HMAC secret for bearer-token verification.
    #[serde(default = "default_jwt_secret_env")]
    pub jwt_secret_env: String,
    /// When set, `X-API-Key` must match this exact key (constant-time).
    /// When unset, any well-formed `sk_swarm_` key is accepted.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret_env: default_jwt_secret_env(),
            api_key: None,
        }
    }
}

impl AuthConfig {
    /// Resolve the JWT secret from the environment. Absence is fatal at
    /// startup.
    pub fn resolve_jwt_secret(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.jwt_secret_env) {
            Ok(v) if !v.is_empty() => Ok(v),
            _ => Err(ConfigError::MissingSecret(self.jwt_secret_env.clone())),
        }
    }
}

fn default_jwt_secret_env() -> String {
    "SWARM_JWT_SECRET".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the scheduling loop ticks (seconds).
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// How many tasks one agent may hold concurrently.
    #[serde(default = "default_max_concurrent_per_agent")]
    pub max_concurrent_per_agent: usize,
    /// How often stale score records decay (seconds).
    #[serde(default = "default_decay_interval_secs")]
    pub decay_interval_secs: u64,
    /// Age after which a score record starts decaying (hours).
    #[serde(default = "default_decay_after_hours")]
    pub decay_after_hours: u64,
    /// How often the agent-liveness watchdog sweeps (seconds).
    #[serde(default = "default_watchdog_secs")]
    pub watchdog_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            max_concurrent_per_agent: default_max_concurrent_per_agent(),
            decay_interval_secs: default_decay_interval_secs(),
            decay_after_hours: default_decay_after_hours(),
            watchdog_secs: default_watchdog_secs(),
        }
    }
}

fn default_tick_secs() -> u64 {
    5
}

fn default_max_concurrent_per_agent() -> usize {
    1
}

fn default_decay_interval_secs() -> u64 {
    600
}

fn default_decay_after_hours() -> u64 {
    24
}

fn default_watchdog_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Memory,
    Durable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "~/.codeswarm/state.db".into()
}

/// Execution-provider selection. Resolved once at process start; never
/// switched per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Remote machine-lifecycle REST API with a blocking wait endpoint.
    Machines {
        api_url: String,
        app_name: String,
        #[serde(default = "default_provider_token_env")]
        api_token_env: String,
    },
    /// Pre-defined job templates; status must be polled.
    Jobs {
        api_url: String,
        template: String,
        #[serde(default = "default_provider_token_env")]
        api_token_env: String,
        #[serde(default = "default_poll_interval_ms")]
        poll_interval_ms: u64,
    },
    /// Simulate mode: no remote calls, completion times by task type.
    Mock,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Mock
    }
}

impl ProviderConfig {
    pub fn kind_label(&self) -> &'static str {
        match self {
            ProviderConfig::Machines { .. } => "machines",
            ProviderConfig::Jobs { .. } => "jobs",
            ProviderConfig::Mock => "mock",
        }
    }
}

fn default_provider_token_env() -> String {
    "SWARM_PROVIDER_TOKEN".into()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopologyMode {
    #[default]
    Hub,
    Hierarchical,
    Mesh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub mode: TopologyMode,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_sub_tasks")]
    pub max_sub_tasks_per_agent: usize,
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            mode: TopologyMode::Hub,
            max_depth: default_max_depth(),
            max_sub_tasks_per_agent: default_max_sub_tasks(),
            peer_timeout_ms: default_peer_timeout_ms(),
        }
    }
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_sub_tasks() -> usize {
    5
}

fn default_peer_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub cap_ms: u64,
    #[serde(default = "default_retry_jitter")]
    pub jitter: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_ms: default_retry_base_ms(),
            cap_ms: default_retry_cap_ms(),
            jitter: default_retry_jitter(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1_000
}

fn default_retry_cap_ms() -> u64 {
    30_000
}

fn default_retry_jitter() -> f64 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Global bounded history used for welcome replay.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// How many buffered events a fresh client receives on connect.
    #[serde(default = "default_welcome_replay")]
    pub welcome_replay: usize,
    /// WebSocket heartbeat interval (seconds).
    #[serde(default = "default_ping_secs")]
    pub ping_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            welcome_replay: default_welcome_replay(),
            ping_secs: default_ping_secs(),
        }
    }
}

fn default_history_limit() -> usize {
    100
}

fn default_welcome_replay() -> usize {
    10
}

fn default_ping_secs() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
