pub mod algod;
pub mod error;
pub mod feeds;
pub mod indexer;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod signer;
pub mod store;

pub use algod::AlgodClient;
pub use error::{FeedError, StoreError, SyncError};
pub use feeds::{
    gather_staking, gather_subscriptions, AlgodStaking, AlgodSubscriptions, FanOut, MemoryStaking,
    MemorySubscriptions, StakingFeed, SubscriptionSource,
};
pub use indexer::{
    collect_program_addresses, IndexerClient, IndexerFeed, IndexerPage, MemoryIndexer, TransactionFilter,
};
pub use metrics::SyncMetrics;
pub use pipeline::{
    ApplyReport, Collaborators, Pipeline, PipelineSettings, PurgeReport, RunReport, WriteFailure,
};
pub use retry::{FeedOutcome, RetryPolicy};
pub use signer::RemoteSigner;
pub use store::{AlgodBoxStore, BoxPage, BoxStore, MemoryBoxStore};
