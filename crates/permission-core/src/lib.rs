pub mod address;
pub mod aggregate;
pub mod codec;
pub mod config;
pub mod documents;
pub mod error;
pub mod feeds;
pub mod reconcile;
pub mod record;
pub mod scoring;
pub mod staking;
pub mod subscription;
#[cfg(test)]
mod tests;

pub use address::{Address, AliasTable};
pub use aggregate::SourceAggregator;
pub use codec::{decode, encode};
pub use config::{Network, RegistryConfig, ResolvedConfig, RuntimeConfig};
pub use error::{AddressError, CodecError, ConfigError, DocumentError, MembershipError, ScoringError};
pub use feeds::FeedSnapshot;
pub use reconcile::{PlannedWrite, ReconcileReport, ReconciliationEngine, Snapshot, WritePass};
pub use record::{DocContribution, PermissionRecord};
pub use scoring::{permission_for_amount, recompute_totals, Boundary, BoundaryTable};
pub use subscription::{MembershipBox, SubscriptionTier, TierMembership};
