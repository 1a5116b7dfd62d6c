use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::config::SecurityConfig;
use crate::core::error::{GatewayError, GatewayResult};

/// API key validation, caller allow-listing and per-key sliding-window rate limiting.
///
/// Windows are process-local: every gateway process counts its own requests.
pub struct SecurityGate {
    /// bearer token -> key name
    keys: HashMap<String, String>,
    allowlist_enabled: bool,
    allowed_ips: Vec<String>,
    window: Duration,
    max_requests: usize,
    /// key name -> timestamps of accepted requests, oldest first
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityStatus {
    pub api_keys_configured: usize,
    pub rate_limit_window: u64,
    pub rate_limit_requests: usize,
    pub ip_whitelist_enabled: bool,
    pub allowed_ips: Vec<String>,
    pub active_requests: BTreeMap<String, usize>,
}

impl SecurityGate {
    pub fn new(config: &SecurityConfig) -> Self {
        let keys = config
            .api_keys
            .iter()
            .map(|(name, key)| (key.clone(), name.clone()))
            .collect::<HashMap<_, _>>();

        if keys.is_empty() {
            warn!("No API keys configured; every protected endpoint will reject requests");
        }
        info!(
            "Security gate initialized: {} key(s), {} req / {}s, allow-list {}",
            keys.len(),
            config.rate_limit_max_requests,
            config.rate_limit_window_secs,
            if config.enable_ip_allowlist { "on" } else { "off" }
        );

        Self {
            keys,
            allowlist_enabled: config.enable_ip_allowlist,
            allowed_ips: config.allowed_ips.clone(),
            window: Duration::from_secs(config.rate_limit_window_secs),
            max_requests: config.rate_limit_max_requests,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn validate_key(&self, token: &str) -> GatewayResult<String> {
        match self.keys.get(token) {
            Some(name) => {
                debug!("Valid API key used: {}", name);
                Ok(name.clone())
            }
            None => {
                warn!("Invalid API key attempt: {}...", redact(token));
                Err(GatewayError::Unauthorized)
            }
        }
    }

    pub async fn check_rate_limit(&self, token: &str) -> GatewayResult<()> {
        self.check_rate_limit_at(token, Instant::now()).await
    }

    pub(crate) async fn check_rate_limit_at(&self, token: &str, now: Instant) -> GatewayResult<()> {
        let key = self.keys.get(token).cloned().unwrap_or_else(|| token.to_string());
        let mut windows = self.windows.lock().await;
        let stamps = windows.entry(key).or_default();

        while let Some(oldest) = stamps.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }

        if stamps.len() >= self.max_requests {
            warn!("Rate limit exceeded for API key: {}...", redact(token));
            return Err(GatewayError::RateLimited {
                max: self.max_requests,
                window_secs: self.window.as_secs(),
            });
        }

        stamps.push_back(now);
        Ok(())
    }

    pub fn validate_origin(&self, caller: IpAddr) -> GatewayResult<()> {
        if !self.allowlist_enabled {
            return Ok(());
        }

        let caller = caller.to_canonical();
        let allowed = self.allowed_ips.iter().any(|entry| {
            if entry.eq_ignore_ascii_case("localhost") {
                return caller.is_loopback();
            }
            entry
                .parse::<IpAddr>()
                .map(|ip| ip.to_canonical() == caller)
                .unwrap_or(false)
        });

        if allowed {
            debug!("IP validation passed for: {}", caller);
            Ok(())
        } else {
            warn!("Blocked request from unauthorized IP: {}", caller);
            Err(GatewayError::Forbidden(caller.to_string()))
        }
    }

    /// Full gate in request order: origin, key, then rate window.
    pub async fn authorize(&self, caller: IpAddr, token: &str) -> GatewayResult<String> {
        self.validate_origin(caller)?;
        let key_name = self.validate_key(token)?;
        self.check_rate_limit(token).await?;
        Ok(key_name)
    }

    pub async fn status(&self) -> SecurityStatus {
        let windows = self.windows.lock().await;
        SecurityStatus {
            api_keys_configured: self.keys.len(),
            rate_limit_window: self.window.as_secs(),
            rate_limit_requests: self.max_requests,
            ip_whitelist_enabled: self.allowlist_enabled,
            allowed_ips: self.allowed_ips.clone(),
            active_requests: windows
                .iter()
                .map(|(name, stamps)| (name.clone(), stamps.len()))
                .collect(),
        }
    }
}

fn redact(token: &str) -> String {
    token.chars().take(6).collect()
}
