//! Staking and subscription feeds, and their bounded-concurrency gathering.

use crate::algod::AlgodClient;
use crate::error::{FeedError, StoreError};
use crate::retry::{retry_transient, FeedOutcome, RetryPolicy};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use permission_core::staking::staked_amount_from_state;
use permission_core::subscription::active_members;
use permission_core::{Address, SubscriptionTier, TierMembership};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait StakingFeed: Send + Sync {
    /// Amount currently staked by `address`; zero when it holds no stake.
    async fn staked_amount(&self, address: &Address) -> Result<u64, FeedError>;
}

#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// Raw membership boxes of one tier application, keyed by subscriber.
    async fn tier_boxes(&self, tier_app_id: u64) -> Result<Vec<(Address, Vec<u8>)>, FeedError>;
}

// --- ledger-backed feeds -----------------------------------------------------

/// Reads the staked amount from each account's local state in the staking
/// program.
pub struct AlgodStaking {
    algod: AlgodClient,
    app_id: u64,
    key: String,
}

impl AlgodStaking {
    pub fn new(algod: AlgodClient, app_id: u64, key: impl Into<String>) -> Self {
        Self {
            algod,
            app_id,
            key: key.into(),
        }
    }
}

#[async_trait]
impl StakingFeed for AlgodStaking {
    async fn staked_amount(&self, address: &Address) -> Result<u64, FeedError> {
        let value = self
            .algod
            .local_state_value(address, self.app_id, &self.key)
            .await?;
        Ok(value.map(|v| staked_amount_from_state(&v)).unwrap_or(0))
    }
}

/// Lists each tier's membership boxes. Every page and box read is retried
/// on its own; one that still fails fails the tier, which leaves the
/// subscription feed incomplete rather than silently short.
pub struct AlgodSubscriptions {
    algod: AlgodClient,
    page_size: u32,
    retry: RetryPolicy,
}

impl AlgodSubscriptions {
    pub fn new(algod: AlgodClient, page_size: u32, retry: RetryPolicy) -> Self {
        Self {
            algod,
            page_size,
            retry,
        }
    }
}

#[async_trait]
impl SubscriptionSource for AlgodSubscriptions {
    async fn tier_boxes(&self, tier_app_id: u64) -> Result<Vec<(Address, Vec<u8>)>, FeedError> {
        let mut boxes = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = retry_transient(&self.retry, "tier page", StoreError::is_retryable, || {
                self.algod
                    .box_names(tier_app_id, self.page_size, token.as_deref())
            })
            .await?;
            for name in page.names {
                let address = match Address::from_key(&name) {
                    Ok(address) => address,
                    Err(e) => {
                        debug!(tier = tier_app_id, error = %e, "ignoring non-member box");
                        continue;
                    }
                };
                let value = retry_transient(&self.retry, "tier box", StoreError::is_retryable, || {
                    self.algod.box_value(tier_app_id, &name)
                })
                .await?;
                if let Some(value) = value {
                    boxes.push((address, value));
                }
            }
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(boxes)
    }
}

// --- in-memory feeds ---------------------------------------------------------

#[derive(Default)]
pub struct MemoryStaking {
    amounts: HashMap<Address, u64>,
    failing: HashSet<Address>,
    delays: HashMap<Address, Duration>,
}

impl MemoryStaking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stake(mut self, address: Address, amount: u64) -> Self {
        self.amounts.insert(address, amount);
        self
    }

    pub fn failing_for(mut self, address: Address) -> Self {
        self.failing.insert(address);
        self
    }

    /// Answer for `address` only after `delay`.
    pub fn slow_for(mut self, address: Address, delay: Duration) -> Self {
        self.delays.insert(address, delay);
        self
    }
}

#[async_trait]
impl StakingFeed for MemoryStaking {
    async fn staked_amount(&self, address: &Address) -> Result<u64, FeedError> {
        if let Some(delay) = self.delays.get(address) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(address) {
            return Err(FeedError::Transport("injected failure".into()));
        }
        Ok(self.amounts.get(address).copied().unwrap_or(0))
    }
}

#[derive(Default)]
pub struct MemorySubscriptions {
    tiers: HashMap<u64, Vec<(Address, Vec<u8>)>>,
    failing: HashSet<u64>,
}

impl MemorySubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_box(mut self, tier_app_id: u64, address: Address, value: Vec<u8>) -> Self {
        self.tiers.entry(tier_app_id).or_default().push((address, value));
        self
    }

    pub fn failing_tier(mut self, tier_app_id: u64) -> Self {
        self.failing.insert(tier_app_id);
        self
    }
}

#[async_trait]
impl SubscriptionSource for MemorySubscriptions {
    async fn tier_boxes(&self, tier_app_id: u64) -> Result<Vec<(Address, Vec<u8>)>, FeedError> {
        if self.failing.contains(&tier_app_id) {
            return Err(FeedError::Transport("injected failure".into()));
        }
        Ok(self.tiers.get(&tier_app_id).cloned().unwrap_or_default())
    }
}

// --- gathering ---------------------------------------------------------------

/// Bounds shared by every fan-out.
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    pub max_concurrency: usize,
    pub query_timeout: Duration,
}

/// Query the staked amount of every address, at most `fan_out.max_concurrency`
/// at a time. An address whose query fails or times out is left out and the
/// outcome is flagged incomplete; the others are unaffected.
pub async fn gather_staking<S, I>(feed: &S, addresses: I, fan_out: FanOut) -> FeedOutcome<BTreeMap<Address, u64>>
where
    S: StakingFeed + ?Sized,
    I: IntoIterator<Item = Address>,
{
    let results: Vec<(Address, Result<u64, FeedError>)> = stream::iter(addresses)
        .map(|address| async move {
            let result = match tokio::time::timeout(fan_out.query_timeout, feed.staked_amount(&address)).await {
                Ok(result) => result,
                Err(_) => Err(FeedError::Timeout(fan_out.query_timeout)),
            };
            (address, result)
        })
        .buffer_unordered(fan_out.max_concurrency.max(1))
        .collect()
        .await;

    let mut amounts = BTreeMap::new();
    let mut failed = 0usize;
    for (address, result) in results {
        match result {
            Ok(amount) => {
                amounts.insert(address, amount);
            }
            Err(e) => {
                failed += 1;
                warn!(address = %address.short(), error = %e, "staking query failed; address left out");
            }
        }
    }
    if failed == 0 {
        FeedOutcome::complete(amounts)
    } else {
        FeedOutcome::incomplete(amounts)
    }
}

/// Active memberships of every tier, keyed by subscriber. A tier that cannot
/// be read flags the outcome incomplete.
pub async fn gather_subscriptions<S>(
    source: &S,
    tiers: &[SubscriptionTier],
    now: u64,
    grace_secs: u64,
    fan_out: FanOut,
) -> FeedOutcome<BTreeMap<Address, Vec<TierMembership>>>
where
    S: SubscriptionSource + ?Sized,
{
    let mut results: Vec<(&SubscriptionTier, Result<Vec<(Address, Vec<u8>)>, FeedError>)> = stream::iter(tiers)
        .map(|tier| async move {
            let result = match tokio::time::timeout(fan_out.query_timeout, source.tier_boxes(tier.app_id)).await {
                Ok(result) => result,
                Err(_) => Err(FeedError::Timeout(fan_out.query_timeout)),
            };
            (tier, result)
        })
        .buffer_unordered(fan_out.max_concurrency.max(1))
        .collect()
        .await;

    let mut members: BTreeMap<Address, Vec<TierMembership>> = BTreeMap::new();
    let mut complete = true;
    // tier order keeps per-address membership lists deterministic
    results.sort_by_key(|(tier, _)| tier.app_id);
    for (tier, result) in results {
        match result {
            Ok(boxes) => {
                for address in active_members(tier, boxes, now, grace_secs) {
                    members.entry(address).or_default().push(TierMembership::from(tier));
                }
            }
            Err(e) => {
                complete = false;
                warn!(tier = tier.app_id, error = %e, "subscription tier unreadable");
            }
        }
    }
    FeedOutcome { value: members, complete }
}
