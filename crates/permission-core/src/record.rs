use crate::scoring::recompute_totals;
use serde::{Deserialize, Serialize};

/// Weight contributed by one supporting document, in micro-units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocContribution {
    pub amount: u64,
    pub doc_index: u8,
}

/// Per-address registry record as stored in a registry box.
///
/// `votes` and `permission` are derived from the other fields and can only be
/// written through [`recompute_totals`]. Every mutator below ends by
/// refreshing them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PermissionRecord {
    votes: u64,
    permission: u64,
    pub(crate) subscription_amount: u64,
    pub(crate) subscription_permission: u64,
    pub(crate) staking_amount: u64,
    pub(crate) staking_permission: u64,
    pub(crate) doc_contributions: Vec<DocContribution>,
}

impl PermissionRecord {
    /// Zero-initialized record for an address seen for the first time.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rebuild a record exactly as stored, totals included. Used by the codec;
    /// totals are taken verbatim so inconsistencies remain observable.
    pub(crate) fn from_stored(
        votes: u64,
        permission: u64,
        subscription: (u64, u64),
        staking: (u64, u64),
        doc_contributions: Vec<DocContribution>,
    ) -> Self {
        Self {
            votes,
            permission,
            subscription_amount: subscription.0,
            subscription_permission: subscription.1,
            staking_amount: staking.0,
            staking_permission: staking.1,
            doc_contributions,
        }
    }

    pub fn votes(&self) -> u64 {
        self.votes
    }

    pub fn permission(&self) -> u64 {
        self.permission
    }

    pub fn subscription(&self) -> (u64, u64) {
        (self.subscription_amount, self.subscription_permission)
    }

    pub fn staking(&self) -> (u64, u64) {
        (self.staking_amount, self.staking_permission)
    }

    pub fn doc_contributions(&self) -> &[DocContribution] {
        &self.doc_contributions
    }

    pub fn set_subscription(&mut self, amount: u64, permission: u64) {
        self.subscription_amount = amount;
        self.subscription_permission = permission;
        self.refresh_totals();
    }

    pub fn set_staking(&mut self, amount: u64, permission: u64) {
        self.staking_amount = amount;
        self.staking_permission = permission;
        self.refresh_totals();
    }

    pub fn push_contribution(&mut self, amount: u64, doc_index: u8) {
        self.doc_contributions.push(DocContribution { amount, doc_index });
        self.refresh_totals();
    }

    /// Whether the stored totals agree with the contributing fields.
    pub fn is_consistent(&self) -> bool {
        recompute_totals(self) == (self.votes, self.permission)
    }

    pub(crate) fn refresh_totals(&mut self) {
        let (votes, permission) = recompute_totals(self);
        self.votes = votes;
        self.permission = permission;
    }
}
