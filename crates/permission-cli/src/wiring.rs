//! Build the ledger-backed collaborators from configuration.

use anyhow::{Context, Result};
use permission_core::{ConfigError, RegistryConfig, ResolvedConfig};
use permission_sync::{
    AlgodBoxStore, AlgodClient, AlgodStaking, AlgodSubscriptions, Collaborators, IndexerClient,
    MemoryStaking, RemoteSigner, RetryPolicy, StakingFeed,
};
use std::path::Path;
use std::sync::Arc;

pub fn load_config(path: &Path) -> Result<ResolvedConfig> {
    let config = RegistryConfig::load(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    Ok(config.resolve()?)
}

fn require<'a>(value: &'a str, field: &'static str) -> Result<&'a str, ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(field))
    } else {
        Ok(value)
    }
}

pub fn collaborators(config: &ResolvedConfig) -> Result<Collaborators> {
    let timeout = config.runtime.query_timeout();
    let algod = AlgodClient::new(require(&config.algod_url, "algod_url")?, config.algod_token.clone(), timeout)
        .context("building node client")?;
    let indexer = IndexerClient::new(require(&config.indexer_url, "indexer_url")?, timeout)
        .context("building indexer client")?;
    let signer = RemoteSigner::new(require(&config.signer_url, "signer_url")?, timeout)
        .context("building signer client")?;

    let staking: Arc<dyn StakingFeed> = match &config.staking {
        Some(staking) => Arc::new(AlgodStaking::new(algod.clone(), staking.app_id, staking.key.clone())),
        // no staking program: indexer is never queried and every stake reads as zero
        None => Arc::new(MemoryStaking::new()),
    };

    let retry = RetryPolicy::from_runtime(&config.runtime);
    Ok(Collaborators {
        store: Arc::new(AlgodBoxStore::new(
            config.registry_app_id,
            algod.clone(),
            signer,
            config.runtime.page_limit,
            retry.clone(),
        )),
        indexer: Arc::new(indexer),
        staking,
        subscriptions: Arc::new(AlgodSubscriptions::new(
            algod,
            config.runtime.page_limit,
            retry,
        )),
    })
}
