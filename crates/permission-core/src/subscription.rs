//! Subscription-tier memberships.
//!
//! Every tier is a separate application whose boxes are keyed by subscriber
//! address. A membership box holds five big-endian u64 values:
//! `(tier_asset_id, version, start, end, duration)`.

use crate::address::Address;
use crate::error::MembershipError;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const MEMBERSHIP_BOX_SIZE: usize = 40;

/// A configured tier: its application id and the weight a membership grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionTier {
    pub app_id: u64,
    pub amount: u64,
    pub permission: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MembershipBox {
    pub tier_asset_id: u64,
    pub version: u64,
    pub start: u64,
    pub end: u64,
    pub duration: u64,
}

impl MembershipBox {
    pub fn decode(bytes: &[u8]) -> Result<Self, MembershipError> {
        if bytes.len() != MEMBERSHIP_BOX_SIZE {
            return Err(MembershipError::Length(bytes.len()));
        }
        let field = |i: usize| {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            u64::from_be_bytes(arr)
        };
        Ok(Self {
            tier_asset_id: field(0),
            version: field(1),
            start: field(2),
            end: field(3),
            duration: field(4),
        })
    }

    /// Non-expiring (`end == 0`) or expiring strictly after `now + grace`.
    pub fn is_active(&self, now: u64, grace_secs: u64) -> bool {
        self.end == 0 || self.end > now.saturating_add(grace_secs)
    }
}

/// Weight granted by one active membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierMembership {
    pub amount: u64,
    pub permission: u64,
}

impl From<&SubscriptionTier> for TierMembership {
    fn from(tier: &SubscriptionTier) -> Self {
        Self {
            amount: tier.amount,
            permission: tier.permission,
        }
    }
}

/// Filter one tier's boxes down to the addresses holding an active membership.
/// Boxes that do not decode are logged and skipped.
pub fn active_members<I>(tier: &SubscriptionTier, boxes: I, now: u64, grace_secs: u64) -> Vec<Address>
where
    I: IntoIterator<Item = (Address, Vec<u8>)>,
{
    boxes
        .into_iter()
        .filter_map(|(address, value)| match MembershipBox::decode(&value) {
            Ok(membership) if membership.is_active(now, grace_secs) => Some(address),
            Ok(_) => None,
            Err(e) => {
                warn!(tier = tier.app_id, address = %address.short(), error = %e, "skipping membership box");
                None
            }
        })
        .collect()
}

/// `(Σamount, Σpermission)` over an address' active tiers.
pub fn subscription_totals(tiers: &[TierMembership]) -> (u64, u64) {
    tiers.iter().fold((0u64, 0u64), |(amount, permission), t| {
        (
            amount.saturating_add(t.amount),
            permission.saturating_add(t.permission),
        )
    })
}
