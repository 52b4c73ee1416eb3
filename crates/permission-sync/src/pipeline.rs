//! One registry run: snapshot the store, gather every feed behind a single
//! barrier, compute the write set, apply it with bounded concurrency.

use crate::error::{StoreError, SyncError};
use crate::feeds::{gather_staking, gather_subscriptions, FanOut, StakingFeed, SubscriptionSource};
use crate::indexer::{collect_program_addresses, IndexerFeed, TransactionFilter};
use crate::metrics::SyncMetrics;
use crate::retry::{FeedOutcome, RetryPolicy};
use crate::store::BoxStore;
use futures::stream::{self, StreamExt};
use permission_core::codec;
use permission_core::config::{StakingConfig, SubscriptionConfig};
use permission_core::documents::LoadedDocument;
use permission_core::{
    Address, BoundaryTable, ConfigError, FeedSnapshot, Network, PlannedWrite, ReconcileReport,
    ReconciliationEngine, ResolvedConfig, RuntimeConfig, SourceAggregator, WritePass,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// External services a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn BoxStore>,
    pub indexer: Arc<dyn IndexerFeed>,
    pub staking: Arc<dyn StakingFeed>,
    pub subscriptions: Arc<dyn SubscriptionSource>,
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub network: Network,
    pub staking: Option<StakingConfig>,
    pub subscription: SubscriptionConfig,
    pub boundaries: BoundaryTable,
    pub runtime: RuntimeConfig,
    pub retry: RetryPolicy,
    /// Fixed clock for membership expiry; wall clock when unset.
    pub now: Option<u64>,
}

impl PipelineSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            network: config.network,
            staking: config.staking.clone(),
            subscription: config.subscription.clone(),
            boundaries: config.boundaries.clone(),
            runtime: config.runtime.clone(),
            retry: RetryPolicy::from_runtime(&config.runtime),
            now: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteFailure {
    pub address: Address,
    pub error: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub written: Vec<Address>,
    pub failed: Vec<WriteFailure>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub plan: ReconcileReport,
    /// `None` on a dry run.
    pub applied: Option<ApplyReport>,
    pub feeds_complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub deleted: usize,
    pub failed: usize,
}

pub struct Pipeline {
    collaborators: Collaborators,
    settings: PipelineSettings,
    metrics: SyncMetrics,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings, metrics: SyncMetrics) -> Self {
        Self {
            collaborators,
            settings,
            metrics,
        }
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    fn now(&self) -> u64 {
        self.settings
            .now
            .unwrap_or_else(|| u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0))
    }

    fn fan_out(&self) -> FanOut {
        FanOut {
            max_concurrency: self.settings.runtime.max_concurrency,
            query_timeout: self.settings.runtime.query_timeout(),
        }
    }

    /// Read the staking and subscription feeds. Staking is queried for every
    /// program participant plus `extra`. Returns only once both feeds are done.
    pub async fn gather_feeds(&self, extra: &BTreeSet<Address>) -> FeedSnapshot {
        let fan_out = self.fan_out();

        let staking = async {
            let Some(config) = &self.settings.staking else {
                return FeedOutcome::complete(BTreeMap::new());
            };
            let filter = TransactionFilter {
                limit: self.settings.runtime.page_limit,
                min_round: config.min_round,
            };
            let stakers = collect_program_addresses(
                self.collaborators.indexer.as_ref(),
                config.app_id,
                &filter,
                &self.settings.retry,
            )
            .await;
            let mut addresses = stakers.value;
            addresses.extend(extra.iter().copied());
            let amounts = gather_staking(self.collaborators.staking.as_ref(), addresses, fan_out).await;
            FeedOutcome {
                value: amounts.value,
                complete: stakers.complete && amounts.complete,
            }
        };
        let subscriptions = gather_subscriptions(
            self.collaborators.subscriptions.as_ref(),
            &self.settings.subscription.tiers,
            self.now(),
            self.settings.subscription.grace_period_secs,
            fan_out,
        );

        let (staking, subscriptions) = tokio::join!(staking, subscriptions);

        if !staking.complete {
            warn!("staking feed incomplete");
            self.metrics.observe_incomplete("staking");
        }
        if !subscriptions.complete {
            warn!("subscription feed incomplete; expired memberships will not be reset");
            self.metrics.observe_incomplete("subscriptions");
        }
        info!(
            stakers = staking.value.len(),
            subscribers = subscriptions.value.len(),
            "feeds gathered"
        );
        FeedSnapshot {
            staking: staking.value,
            staking_complete: staking.complete,
            subscriptions: subscriptions.value,
            subscriptions_complete: subscriptions.complete,
        }
    }

    /// Bring the registry up to date with the feeds.
    pub async fn reconcile(&self, dry_run: bool) -> Result<RunReport, SyncError> {
        let snapshot = self.collaborators.store.snapshot(&self.settings.retry).await?;
        self.metrics.observe_snapshot(&snapshot);
        info!(
            records = snapshot.len(),
            malformed = snapshot.malformed().len(),
            "registry snapshot taken"
        );

        let feeds = self.gather_feeds(&BTreeSet::new()).await;
        let plan = ReconciliationEngine::new(&self.settings.boundaries).reconcile(&snapshot, &feeds);
        info!(
            updates = plan.count(WritePass::Update),
            new_stakers = plan.count(WritePass::NewStaker),
            new_subscribers = plan.count(WritePass::NewSubscriber),
            unchanged = plan.unchanged,
            dust = plan.dust_filtered,
            "reconciliation planned"
        );

        let applied = if dry_run {
            None
        } else {
            Some(self.apply_writes(&plan.writes).await)
        };
        Ok(RunReport {
            plan,
            applied,
            feeds_complete: feeds.is_complete(),
        })
    }

    /// Populate an empty registry from documents and feeds.
    pub async fn seed(&self, documents: &[LoadedDocument], dry_run: bool) -> Result<RunReport, SyncError> {
        let snapshot = self.collaborators.store.snapshot(&self.settings.retry).await?;
        if !snapshot.is_empty() {
            return Err(SyncError::StoreNotEmpty(snapshot.len() + snapshot.malformed().len()));
        }

        let holders = SourceAggregator::document_addresses(documents);
        let feeds = self.gather_feeds(&holders).await;
        let data = SourceAggregator::new(&self.settings.boundaries).aggregate(documents, &feeds);
        info!(records = data.len(), documents = documents.len(), "seed records aggregated");

        let plan = ReconcileReport {
            writes: data
                .into_iter()
                .map(|(address, record)| {
                    (
                        address,
                        PlannedWrite {
                            record,
                            pass: WritePass::Seed,
                        },
                    )
                })
                .collect(),
            ..ReconcileReport::default()
        };
        let applied = if dry_run {
            None
        } else {
            Some(self.apply_writes(&plan.writes).await)
        };
        Ok(RunReport {
            plan,
            applied,
            feeds_complete: feeds.is_complete(),
        })
    }

    /// Write every planned record. A failed key is reported and the rest
    /// still go out.
    pub async fn apply_writes(&self, writes: &BTreeMap<Address, PlannedWrite>) -> ApplyReport {
        let store = self.collaborators.store.as_ref();
        let results: Vec<(Address, WritePass, Result<(), StoreError>)> = stream::iter(writes)
            .map(|(address, write)| async move {
                let result = match codec::encode(&write.record) {
                    Ok(value) => store.put(address.as_bytes(), &value).await,
                    Err(e) => Err(StoreError::Decode(e.to_string())),
                };
                (*address, write.pass, result)
            })
            .buffer_unordered(self.settings.runtime.max_concurrency.max(1))
            .collect()
            .await;

        let mut report = ApplyReport::default();
        for (address, pass, result) in results {
            match result {
                Ok(()) => {
                    debug!(address = %address.short(), pass = pass.label(), "record written");
                    self.metrics.observe_write(pass);
                    report.written.push(address);
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    warn!(address = %address.short(), error = %e, retryable, "record write failed");
                    self.metrics.observe_write_failure(retryable);
                    report.failed.push(WriteFailure {
                        address,
                        error: e.to_string(),
                        retryable,
                    });
                }
            }
        }
        report.written.sort();
        report.failed.sort_by_key(|f| f.address);
        info!(written = report.written.len(), failed = report.failed.len(), "writes applied");
        report
    }

    /// Delete every registry box, unreadable ones included. Test networks only.
    pub async fn purge(&self) -> Result<PurgeReport, SyncError> {
        if self.settings.network != Network::Testnet {
            return Err(SyncError::Config(ConfigError::Invalid {
                field: "network",
                reason: "purge is only allowed on testnet".into(),
            }));
        }

        let store = self.collaborators.store.as_ref();
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = store.read_page(token.as_deref(), &self.settings.retry).await?;
            keys.extend(page.entries.into_iter().map(|(key, _)| key));
            keys.extend(page.unreadable.into_iter().map(|(key, _)| key));
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let results: Vec<Result<(), StoreError>> = stream::iter(keys.iter())
            .map(|key| store.delete(key))
            .buffer_unordered(self.settings.runtime.max_concurrency.max(1))
            .collect()
            .await;

        let mut report = PurgeReport::default();
        for result in results {
            match result {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    warn!(error = %e, "box delete failed");
                    report.failed += 1;
                }
            }
        }
        info!(deleted = report.deleted, failed = report.failed, "registry purged");
        Ok(report)
    }
}
