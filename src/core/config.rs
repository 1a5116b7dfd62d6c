use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_ENV: &str = "ALCHEMY_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub webhooks: WebhookConfig,

    #[serde(default)]
    pub agents: AgentsConfig,

    #[serde(default)]
    pub n8n: N8nConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Logical key name -> bearer token.
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub enable_ip_allowlist: bool,

    /// Literal addresses; "localhost" admits every loopback address.
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: Vec<String>,

    #[serde(default = "default_rate_window")]
    pub rate_limit_window_secs: u64,

    #[serde(default = "default_rate_max")]
    pub rate_limit_max_requests: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_history")]
    pub max_history: usize,

    /// Pause after each processed webhook so the consumer never monopolises the runtime.
    #[serde(default = "default_dispatch_pause")]
    pub dispatch_pause_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_history")]
    pub max_history: usize,

    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,

    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    /// Run `type = "scheduled"` workflow triggers in-process.
    #[serde(default)]
    pub scheduled_triggers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct N8nConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_n8n_url")]
    pub webhook_url: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub debug: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_true() -> bool {
    true
}
fn default_allowed_ips() -> Vec<String> {
    vec![
        "127.0.0.1".to_string(),
        "::1".to_string(),
        "localhost".to_string(),
    ]
}
fn default_rate_window() -> u64 {
    60
}
fn default_rate_max() -> usize {
    100
}
fn default_history() -> usize {
    1000
}
fn default_dispatch_pause() -> u64 {
    100
}
fn default_documents_dir() -> PathBuf {
    PathBuf::from("data").join("documents")
}
fn default_reports_dir() -> PathBuf {
    PathBuf::from("data").join("reports")
}
fn default_n8n_url() -> String {
    "http://localhost:5678".to_string()
}
fn default_timeout() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_keys: BTreeMap::new(),
            enable_ip_allowlist: true,
            allowed_ips: default_allowed_ips(),
            rate_limit_window_secs: default_rate_window(),
            rate_limit_max_requests: default_rate_max(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_history: default_history(),
            dispatch_pause_ms: default_dispatch_pause(),
        }
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_history: default_history(),
            documents_dir: default_documents_dir(),
            reports_dir: default_reports_dir(),
            scheduled_triggers: false,
        }
    }
}

impl Default for N8nConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: default_n8n_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            debug: false,
        }
    }
}

impl GatewayConfig {
    /// `--config` path, then `$ALCHEMY_CONFIG`, then `~/.alchemy/gateway.toml`.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV)
            && !path.trim().is_empty()
        {
            return Some(PathBuf::from(path));
        }
        dirs::home_dir().map(|home| home.join(".alchemy").join("gateway.toml"))
    }

    /// Loads the file (if any), applies environment overrides and validates.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_path(explicit) {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let config = Self::from_toml(&content)
                    .with_context(|| format!("parsing {}", path.display()))?;
                info!("Loaded gateway config from {}", path.display());
                config
            }
            Some(path) if explicit.is_some() => {
                bail!("config file {} does not exist", path.display())
            }
            _ => {
                info!("No gateway config file found, using defaults.");
                Self::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            self.server.port = parse_env("API_PORT", &port)?;
        }
        if let Some(keys) = lookup("GATEWAY_API_KEYS") {
            for pair in keys.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let Some((name, key)) = pair.split_once('=') else {
                    bail!("GATEWAY_API_KEYS entry '{}' is not name=key", pair);
                };
                self.security
                    .api_keys
                    .insert(name.trim().to_string(), key.trim().to_string());
            }
        }
        if let Some(flag) = lookup("ENABLE_IP_WHITELIST") {
            self.security.enable_ip_allowlist = flag.eq_ignore_ascii_case("true");
        }
        if let Some(ips) = lookup("ALLOWED_IPS") {
            self.security.allowed_ips = ips
                .split(',')
                .map(|ip| ip.trim().to_string())
                .filter(|ip| !ip.is_empty())
                .collect();
        }
        if let Some(window) = lookup("RATE_LIMIT_WINDOW") {
            self.security.rate_limit_window_secs = parse_env("RATE_LIMIT_WINDOW", &window)?;
        }
        if let Some(max) = lookup("RATE_LIMIT_REQUESTS") {
            self.security.rate_limit_max_requests = parse_env("RATE_LIMIT_REQUESTS", &max)?;
        }
        if let Some(max) = lookup("MAX_WEBHOOK_HISTORY") {
            self.webhooks.max_history = parse_env("MAX_WEBHOOK_HISTORY", &max)?;
        }
        if let Some(flag) = lookup("N8N_ENABLED") {
            self.n8n.enabled = flag.eq_ignore_ascii_case("true");
        }
        if let Some(url) = lookup("N8N_WEBHOOK_URL") {
            self.n8n.webhook_url = url;
        }
        if let Some(timeout) = lookup("WEBHOOK_TIMEOUT") {
            self.n8n.timeout_secs = parse_env("WEBHOOK_TIMEOUT", &timeout)?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        if let Some(flag) = lookup("ENABLE_DEBUG") {
            self.logging.debug = flag.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be between 1 and 65535");
        }
        if self.security.rate_limit_window_secs == 0 || self.security.rate_limit_max_requests == 0
        {
            bail!("rate limit window and request count must be positive");
        }
        if self.n8n.timeout_secs == 0 {
            bail!("n8n.timeout_secs must be positive");
        }
        if self.webhooks.max_history == 0 || self.agents.max_history == 0 {
            bail!("history caps must be positive");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        if self.server.host.contains(':') {
            format!("[{}]:{}", self.server.host, self.server.port)
        } else {
            format!("{}:{}", self.server.host, self.server.port)
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{} has invalid value '{}'", name, value))
}
