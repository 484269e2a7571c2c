// Logging verbosity follows the build profile; RUST_LOG overrides both.

use crate::types::IceServerConfig;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "roomcall=debug,webrtc=warn";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "roomcall=warn,webrtc=error";

/// Kept under the provider's usual 60 minute credential lifetime
pub const CREDENTIAL_TTL: Duration = Duration::from_secs(50 * 60);

/// How long a disconnected transport may self-heal before a restart
pub const GRACE_PERIOD: Duration = Duration::from_secs(2);

/// How long ICE may sit in `checking` before a restart
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub const MAX_RESTART_ATTEMPTS: u32 = 2;

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8765";

const METERED_CREDENTIALS_URL: &str =
    "https://video-call-turn-server.metered.live/api/v1/turn/credentials";

pub fn default_fallback_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec![
            "stun:stun.l.google.com:19302".into(),
            "stun:stun1.l.google.com:19302".into(),
        ],
        username: None,
        credential: None,
    }]
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub credential_endpoint: Option<String>,
    pub fallback_servers: Vec<IceServerConfig>,
    pub credential_ttl_secs: u64,
    pub grace_period_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_restart_attempts: u32,
    pub signaling_url: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            credential_endpoint: None,
            fallback_servers: default_fallback_servers(),
            credential_ttl_secs: CREDENTIAL_TTL.as_secs(),
            grace_period_ms: GRACE_PERIOD.as_millis() as u64,
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            max_restart_attempts: MAX_RESTART_ATTEMPTS,
            signaling_url: DEFAULT_SIGNALING_URL.into(),
        }
    }
}

impl CoordinatorConfig {
    /// An empty `fallback_servers` list falls back to the public STUN pair
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let mut config: Self = serde_json::from_str(json)?;
        if config.fallback_servers.is_empty() {
            warn!("Config has no fallback ICE servers, using public STUN");
            config.fallback_servers = default_fallback_servers();
        }
        Ok(config)
    }

    /// Defaults overlaid with `ROOMCALL_*` variables. A bare `METERED_API_KEY`
    /// selects the Metered credential API.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup("ROOMCALL_CREDENTIAL_URL") {
            config.credential_endpoint = Some(url);
        } else if let Some(key) = lookup("METERED_API_KEY") {
            config.credential_endpoint = Some(format!("{}?apiKey={}", METERED_CREDENTIALS_URL, key));
        }
        if let Some(url) = lookup("ROOMCALL_SIGNALING_URL") {
            config.signaling_url = url;
        }
        config
    }

    pub fn credential_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_ttl_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
