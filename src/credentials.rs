//! Relay/reflection server credentials with a TTL cache.
//!
//! A failed fetch never reaches the caller: the provider falls back to the
//! public STUN servers, and every set it hands out contains them.

use crate::config::CoordinatorConfig;
use crate::error::CredentialError;
use crate::types::IceServerConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait CredentialFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Vec<IceServerConfig>, CredentialError>;
}

/// `GET` against a Metered-style TURN credential endpoint
pub struct HttpCredentialFetcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCredentialFetcher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl CredentialFetcher for HttpCredentialFetcher {
    async fn fetch(&self) -> Result<Vec<IceServerConfig>, CredentialError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CredentialError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        parse_servers(&body)
    }
}

/// Used when no endpoint is configured; every fetch falls back
pub struct NoCredentialEndpoint;

#[async_trait]
impl CredentialFetcher for NoCredentialEndpoint {
    async fn fetch(&self) -> Result<Vec<IceServerConfig>, CredentialError> {
        Err(CredentialError::NotConfigured)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CredentialResponse {
    Wrapped { servers: Vec<IceServerConfig> },
    Bare(Vec<IceServerConfig>),
}

/// Accepts `{"servers": [...]}` as well as a bare array
pub fn parse_servers(body: &str) -> Result<Vec<IceServerConfig>, CredentialError> {
    let parsed: CredentialResponse =
        serde_json::from_str(body).map_err(|e| CredentialError::Parse(e.to_string()))?;
    let servers = match parsed {
        CredentialResponse::Wrapped { servers } => servers,
        CredentialResponse::Bare(servers) => servers,
    };
    Ok(servers.into_iter().map(IceServerConfig::normalized).collect())
}

#[derive(Debug, Clone)]
pub struct CredentialSet {
    pub servers: Vec<IceServerConfig>,
    pub fetched_at: Instant,
}

impl CredentialSet {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn has_relay(&self) -> bool {
        self.servers.iter().any(IceServerConfig::is_relay)
    }
}

pub struct CredentialProvider {
    fetcher: Arc<dyn CredentialFetcher>,
    fallback: Vec<IceServerConfig>,
    ttl: Duration,
    cached: Option<CredentialSet>,
}

impl CredentialProvider {
    pub fn new(
        fetcher: Arc<dyn CredentialFetcher>,
        fallback: Vec<IceServerConfig>,
        ttl: Duration,
    ) -> Self {
        Self {
            fetcher,
            fallback,
            ttl,
            cached: None,
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        let fetcher: Arc<dyn CredentialFetcher> = match &config.credential_endpoint {
            Some(url) => Arc::new(HttpCredentialFetcher::new(url.clone())),
            None => Arc::new(NoCredentialEndpoint),
        };
        Self::new(fetcher, config.fallback_servers.clone(), config.credential_ttl())
    }

    /// Cached set, fetched on first use and again once it reaches the TTL
    pub async fn get_credentials(&mut self) -> CredentialSet {
        if let Some(set) = self.cached.as_ref().filter(|set| set.age() < self.ttl) {
            return set.clone();
        }
        self.fetch_now().await
    }

    /// Fetches only when nothing is cached or the cache is at least `max_age` old
    pub async fn refresh_if_stale(&mut self, max_age: Duration) {
        if let Some(set) = &self.cached {
            if set.age() < max_age {
                debug!("Credentials are {:?} old, no refresh needed", set.age());
                return;
            }
        }
        self.fetch_now().await;
    }

    pub async fn force_refresh(&mut self) -> CredentialSet {
        self.fetch_now().await
    }

    async fn fetch_now(&mut self) -> CredentialSet {
        let servers = match self.fetcher.fetch().await {
            Ok(fetched) => {
                info!("Fetched {} ICE servers from credential endpoint", fetched.len());
                merge_with_fallback(fetched, &self.fallback)
            }
            Err(CredentialError::NotConfigured) => self.fallback.clone(),
            Err(e) => {
                warn!("Credential fetch failed, using public STUN only: {}", e);
                self.fallback.clone()
            }
        };
        let set = CredentialSet {
            servers,
            fetched_at: Instant::now(),
        };
        self.cached = Some(set.clone());
        set
    }
}

fn merge_with_fallback(
    mut servers: Vec<IceServerConfig>,
    fallback: &[IceServerConfig],
) -> Vec<IceServerConfig> {
    for server in fallback {
        let known = servers
            .iter()
            .any(|s| s.urls.iter().any(|u| server.urls.contains(u)));
        if !known {
            servers.push(server.clone());
        }
    }
    servers
}
