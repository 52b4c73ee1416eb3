//! Registry configuration.
//!
//! Loaded from a JSON file, with a few values overridable from the
//! environment. Nothing here is global: the resolved pieces are passed into
//! constructors.

use crate::address::AliasTable;
use crate::documents::DocumentSet;
use crate::error::ConfigError;
use crate::scoring::BoundaryTable;
use crate::subscription::SubscriptionTier;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

pub const ENV_APP_ID: &str = "PERMISSION_APP_ID";
pub const ENV_ALGOD_TOKEN: &str = "ALGOD_TOKEN";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Testnet,
    Mainnet,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakingConfig {
    pub app_id: u64,
    /// Local-state key holding the staked amount, base64 as the node reports it.
    pub key: String,
    #[serde(default)]
    pub min_round: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default)]
    pub tiers: Vec<SubscriptionTier>,
    #[serde(default)]
    pub grace_period_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_concurrency: usize,
    pub query_timeout_secs: u64,
    pub page_delay_ms: u64,
    pub error_delay_ms: u64,
    pub max_retries: u32,
    pub page_limit: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            query_timeout_secs: 30,
            page_delay_ms: 1_000,
            error_delay_ms: 5_000,
            max_retries: 20,
            page_limit: 1_000,
        }
    }
}

impl RuntimeConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn error_delay(&self) -> Duration {
        Duration::from_millis(self.error_delay_ms)
    }
}

/// On-disk configuration as written by operators.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub registry_app_id: Option<u64>,
    #[serde(default)]
    pub algod_url: String,
    #[serde(default)]
    pub indexer_url: String,
    #[serde(default)]
    pub signer_url: String,
    #[serde(default)]
    pub algod_token: Option<String>,
    #[serde(default)]
    pub staking: Option<StakingConfig>,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub documents: DocumentSet,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub boundaries: Option<BoundaryTable>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Validated configuration ready to hand to constructors.
#[derive(Clone, Debug)]
pub struct ResolvedConfig {
    pub network: Network,
    pub registry_app_id: u64,
    pub algod_url: String,
    pub indexer_url: String,
    pub signer_url: String,
    pub algod_token: Option<String>,
    pub staking: Option<StakingConfig>,
    pub subscription: SubscriptionConfig,
    pub documents: DocumentSet,
    pub aliases: AliasTable,
    pub boundaries: BoundaryTable,
    pub runtime: RuntimeConfig,
}

impl RegistryConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Apply overrides from the process environment and validate.
    pub fn resolve(self) -> Result<ResolvedConfig, ConfigError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(self, env: F) -> Result<ResolvedConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let registry_app_id = match env(ENV_APP_ID) {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                field: "registry_app_id",
                reason: format!("{ENV_APP_ID}={raw:?}: {e}"),
            })?),
            None => self.registry_app_id,
        }
        .ok_or(ConfigError::Missing("registry_app_id"))?;

        if self.runtime.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "runtime.max_concurrency",
                reason: "must be at least 1".into(),
            });
        }

        let mut seen = BTreeSet::new();
        for tier in &self.subscription.tiers {
            if !seen.insert(tier.app_id) {
                return Err(ConfigError::Invalid {
                    field: "subscription.tiers",
                    reason: format!("tier app {} listed twice", tier.app_id),
                });
            }
        }

        let documents = &self.documents;
        for (field, start, count) in [
            (
                "documents.discussion",
                documents.discussion_start_index,
                documents.discussion.len(),
            ),
            (
                "documents.staking",
                documents.staking_start_index,
                documents.staking.len(),
            ),
        ] {
            // every document index must fit the one-byte field of a contribution
            if usize::from(start) + count > usize::from(u8::MAX) + 1 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{count} documents starting at index {start} run past 255"),
                });
            }
        }

        Ok(ResolvedConfig {
            network: self.network,
            registry_app_id,
            algod_url: self.algod_url,
            indexer_url: self.indexer_url,
            signer_url: self.signer_url,
            algod_token: env(ENV_ALGOD_TOKEN).or(self.algod_token),
            staking: self.staking,
            subscription: self.subscription,
            documents: self.documents,
            aliases: AliasTable::new(self.aliases),
            boundaries: self.boundaries.unwrap_or_default(),
            runtime: self.runtime,
        })
    }
}
