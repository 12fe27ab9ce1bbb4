//! Account lookups the template depends on (default VPC, hosted zone),
//! cached in `router.context.json` so later runs synthesize the same
//! template without calling AWS.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_route53::HostedZoneContext;
use aws_vpc::NetworkContext;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{config::Config, error::RouterError};

pub const CONTEXT_FILE: &str = "router.context.json";

#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn network(&self, config: &Config) -> Result<NetworkContext, RouterError>;
    async fn hosted_zone(&self, config: &Config) -> Result<HostedZoneContext, RouterError>;
}

pub struct AwsContextProvider {
    ec2: aws_sdk_ec2::Client,
    route53: aws_sdk_route53::Client,
}

impl AwsContextProvider {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            ec2: aws_sdk_ec2::Client::new(sdk_config),
            route53: aws_sdk_route53::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl ContextProvider for AwsContextProvider {
    async fn network(&self, _config: &Config) -> Result<NetworkContext, RouterError> {
        Ok(aws_vpc::lookup_default_vpc(&self.ec2).await?)
    }

    async fn hosted_zone(&self, config: &Config) -> Result<HostedZoneContext, RouterError> {
        Ok(aws_route53::lookup_hosted_zone(&self.route53, &config.domain_name).await?)
    }
}

/// Everything synthesis needs from the account.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookups {
    pub network: NetworkContext,
    pub zone: HostedZoneContext,
}

pub fn network_key(config: &Config) -> String {
    format!("vpc:account={}:region={}:default=true", config.account_id, config.region)
}

pub fn hosted_zone_key(config: &Config) -> String {
    format!("hosted-zone:account={}:region={}:domain={}", config.account_id, config.region, config.domain_name)
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextCache {
    #[serde(flatten)]
    entries: BTreeMap<String, Value>,
}

impl ContextCache {
    /// a missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self, RouterError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(RouterError::Context { path: path.to_path_buf(), reason: e.to_string() }),
        };
        serde_json::from_str(&text)
            .map_err(|e| RouterError::Context { path: path.to_path_buf(), reason: e.to_string() })
    }

    pub fn save(&self, path: &Path) -> Result<(), RouterError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| RouterError::Context { path: path.to_path_buf(), reason: e.to_string() })?;
        std::fs::write(path, text + "\n")
            .map_err(|source| RouterError::Write { path: path.to_path_buf(), source })
    }

    /// entries that no longer deserialize are treated as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.entries.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key, "ignoring unreadable cached lookup: {e}");
                None
            }
        }
    }

    pub fn insert<T: Serialize>(&mut self, key: String, value: &T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.entries.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cached lookups, performing (and recording) the ones that are missing.
pub async fn resolve_context(
    provider: &dyn ContextProvider,
    config: &Config,
    cache_path: &Path,
) -> Result<Lookups, RouterError> {
    let mut cache = if config.refresh_context { ContextCache::default() } else { ContextCache::load(cache_path)? };
    let mut changed = false;

    let key = network_key(config);
    let network = match cache.get::<NetworkContext>(&key) {
        Some(network) => network,
        None => {
            let network = provider.network(config).await?;
            cache.insert(key, &network);
            changed = true;
            network
        }
    };
    let key = hosted_zone_key(config);
    let zone = match cache.get::<HostedZoneContext>(&key) {
        Some(zone) => zone,
        None => {
            let zone = provider.hosted_zone(config).await?;
            cache.insert(key, &zone);
            changed = true;
            zone
        }
    };
    if changed {
        if config.refresh_context {
            // keep entries for other accounts/regions
            let mut existing = ContextCache::load(cache_path)?;
            existing.entries.extend(cache.entries);
            cache = existing;
        }
        cache.save(cache_path)?;
        tracing::info!(path = ?cache_path, "saved lookups");
    }
    Ok(Lookups { network, zone })
}

pub fn default_cache_path() -> PathBuf {
    PathBuf::from(CONTEXT_FILE)
}
