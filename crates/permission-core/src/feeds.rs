use crate::address::Address;
use crate::subscription::{subscription_totals, TierMembership};
use std::collections::BTreeMap;

/// Latest values read from the staking program and the subscription tiers.
///
/// A feed marked incomplete ran out of retries part-way; absence of an
/// address from it says nothing about that address.
#[derive(Clone, Debug)]
pub struct FeedSnapshot {
    pub staking: BTreeMap<Address, u64>,
    pub staking_complete: bool,
    pub subscriptions: BTreeMap<Address, Vec<TierMembership>>,
    pub subscriptions_complete: bool,
}

impl Default for FeedSnapshot {
    fn default() -> Self {
        Self {
            staking: BTreeMap::new(),
            staking_complete: true,
            subscriptions: BTreeMap::new(),
            subscriptions_complete: true,
        }
    }
}

impl FeedSnapshot {
    pub fn with_stake(mut self, address: Address, amount: u64) -> Self {
        self.staking.insert(address, amount);
        self
    }

    pub fn with_membership(mut self, address: Address, membership: TierMembership) -> Self {
        self.subscriptions.entry(address).or_default().push(membership);
        self
    }

    pub fn subscription_totals(&self, address: &Address) -> Option<(u64, u64)> {
        self.subscriptions
            .get(address)
            .map(|tiers| subscription_totals(tiers))
    }

    pub fn is_complete(&self) -> bool {
        self.staking_complete && self.subscriptions_complete
    }
}
