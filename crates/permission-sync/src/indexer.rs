//! Indexer transaction search and paginated address collection.

use crate::error::{FeedError, HttpFailure};
use crate::retry::{FeedOutcome, RetryPolicy};
use async_trait::async_trait;
use permission_core::Address;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFilter {
    pub limit: u32,
    pub min_round: Option<u64>,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            limit: 1_000,
            min_round: None,
        }
    }
}

/// Senders of one page of transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexerPage {
    pub addresses: BTreeSet<String>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait IndexerFeed: Send + Sync {
    async fn query(
        &self,
        program_id: u64,
        filter: &TransactionFilter,
        token: Option<&str>,
    ) -> Result<IndexerPage, FeedError>;
}

/// Every sender of a transaction calling `program_id`.
///
/// Stops at the first page with no addresses or no continuation token. A page
/// that keeps failing past `policy.max_retries` ends collection with what was
/// gathered so far, flagged incomplete.
pub async fn collect_program_addresses<F>(
    feed: &F,
    program_id: u64,
    filter: &TransactionFilter,
    policy: &RetryPolicy,
) -> FeedOutcome<BTreeSet<Address>>
where
    F: IndexerFeed + ?Sized,
{
    let mut addresses = BTreeSet::new();
    let mut token: Option<String> = None;
    loop {
        let Some(page) = query_with_retry(feed, program_id, filter, token.as_deref(), policy).await else {
            warn!(program_id, gathered = addresses.len(), "indexer retries exhausted; result is incomplete");
            return FeedOutcome::incomplete(addresses);
        };
        if page.addresses.is_empty() {
            break;
        }
        for text in &page.addresses {
            match text.parse::<Address>() {
                Ok(address) => {
                    addresses.insert(address);
                }
                Err(e) => warn!(program_id, address = %text, error = %e, "indexer returned an unparseable sender"),
            }
        }
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    debug!(program_id, addresses = addresses.len(), "collected program addresses");
    FeedOutcome::complete(addresses)
}

async fn query_with_retry<F>(
    feed: &F,
    program_id: u64,
    filter: &TransactionFilter,
    token: Option<&str>,
    policy: &RetryPolicy,
) -> Option<IndexerPage>
where
    F: IndexerFeed + ?Sized,
{
    let mut failures = 0u32;
    loop {
        tokio::time::sleep(policy.page_delay).await;
        match feed.query(program_id, filter, token).await {
            Ok(page) => return Some(page),
            Err(e) => {
                if failures >= policy.max_retries {
                    return None;
                }
                failures += 1;
                warn!(program_id, attempt = failures, error = %e, "indexer query failed; pausing");
                tokio::time::sleep(policy.error_delay).await;
            }
        }
    }
}

// --- HTTP indexer ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Transaction {
    sender: String,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    transactions: Vec<Transaction>,
    #[serde(rename = "next-token", default)]
    next_token: Option<String>,
}

#[derive(Clone)]
pub struct IndexerClient {
    base: String,
    client: Client,
}

impl IndexerClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl IndexerFeed for IndexerClient {
    async fn query(
        &self,
        program_id: u64,
        filter: &TransactionFilter,
        token: Option<&str>,
    ) -> Result<IndexerPage, FeedError> {
        let url = format!("{}/v2/transactions", self.base);
        let mut query = vec![
            ("application-id", program_id.to_string()),
            ("limit", filter.limit.to_string()),
        ];
        if let Some(round) = filter.min_round {
            query.push(("min-round", round.to_string()));
        }
        if let Some(token) = token {
            query.push(("next", token.to_string()));
        }
        let resp = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(HttpFailure::from)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body: TransactionsResponse = resp.json().await.map_err(HttpFailure::from)?;
        Ok(IndexerPage {
            addresses: body.transactions.into_iter().map(|t| t.sender).collect(),
            next_token: body.next_token.filter(|t| !t.is_empty()),
        })
    }
}

// --- in-memory indexer -------------------------------------------------------

/// Serves fixed pages; page `n` is reached with token `n`. The first
/// `failures` queries fail.
#[derive(Default)]
pub struct MemoryIndexer {
    pages: Vec<Vec<String>>,
    failures: AtomicU32,
    calls: AtomicUsize,
}

impl MemoryIndexer {
    pub fn new(pages: Vec<Vec<String>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    pub fn failing_first(self, failures: u32) -> Self {
        self.failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexerFeed for MemoryIndexer {
    async fn query(
        &self,
        _program_id: u64,
        _filter: &TransactionFilter,
        token: Option<&str>,
    ) -> Result<IndexerPage, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(FeedError::Transport("injected failure".into()));
        }
        let index = match token {
            Some(t) => t
                .parse::<usize>()
                .map_err(|_| FeedError::Decode(format!("bad token {t:?}")))?,
            None => 0,
        };
        let addresses = self.pages.get(index).cloned().unwrap_or_default();
        Ok(IndexerPage {
            addresses: addresses.into_iter().collect(),
            next_token: Some((index + 1).to_string()),
        })
    }
}
