//! Registry persistence.
//!
//! The registry is a set of boxes keyed by the 32 raw address bytes. Reads
//! page through the store; writes fully re-encode a record, so repeating one
//! is harmless.

use crate::algod::AlgodClient;
use crate::error::StoreError;
use crate::retry::{retry_transient, RetryPolicy};
use crate::signer::RemoteSigner;
use async_trait::async_trait;
use permission_core::Snapshot;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// One page of `(key, value)` entries and the token for the next one.
/// Keys listed on the page whose value could not be read go to `unreadable`
/// with the reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoxPage {
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
    pub unreadable: Vec<(Vec<u8>, String)>,
    pub next: Option<String>,
}

#[async_trait]
pub trait BoxStore: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    async fn list_page(&self, token: Option<&str>) -> Result<BoxPage, StoreError>;

    /// `list_page` under the bounded retry policy.
    async fn read_page(&self, token: Option<&str>, policy: &RetryPolicy) -> Result<BoxPage, StoreError> {
        retry_transient(policy, "registry page", StoreError::is_retryable, || {
            self.list_page(token)
        })
        .await
    }

    /// Drain every page and decode the result. A page that still fails after
    /// its retries fails the snapshot: a partial registry would make stored
    /// addresses look new.
    async fn snapshot(&self, policy: &RetryPolicy) -> Result<Snapshot, StoreError> {
        let mut entries = Vec::new();
        let mut unreadable = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.read_page(token.as_deref(), policy).await?;
            debug!(
                entries = page.entries.len(),
                unreadable = page.unreadable.len(),
                "read registry page"
            );
            entries.extend(page.entries);
            unreadable.extend(page.unreadable);
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        let mut snapshot = Snapshot::from_entries(entries);
        for (key, reason) in unreadable {
            snapshot.record_unreadable(key, reason);
        }
        Ok(snapshot)
    }
}

// --- in-memory store ---------------------------------------------------------

/// Box store held in process memory. Pages by key order and can be told to
/// fail writes for particular keys, fail listings, or hide values.
pub struct MemoryBoxStore {
    boxes: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    failing: Mutex<HashMap<Vec<u8>, StoreError>>,
    unreadable: Mutex<BTreeSet<Vec<u8>>>,
    listing_failures: AtomicUsize,
    page_size: usize,
    writes: AtomicUsize,
}

impl Default for MemoryBoxStore {
    fn default() -> Self {
        Self::with_page_size(100)
    }
}

impl MemoryBoxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            boxes: Mutex::new(BTreeMap::new()),
            failing: Mutex::new(HashMap::new()),
            unreadable: Mutex::new(BTreeSet::new()),
            listing_failures: AtomicUsize::new(0),
            page_size: page_size.max(1),
            writes: AtomicUsize::new(0),
        }
    }

    /// Seed a box directly, bypassing write accounting.
    pub fn insert(&self, key: Vec<u8>, value: Vec<u8>) {
        self.boxes().insert(key, value);
    }

    /// Every later `put`/`delete` of `key` fails with `error`.
    pub fn fail_writes_for(&self, key: &[u8], error: StoreError) {
        lock(&self.failing).insert(key.to_vec(), error);
    }

    /// The next `count` calls to `list_page` fail with a transport error.
    pub fn fail_next_listings(&self, count: usize) {
        self.listing_failures.store(count, Ordering::SeqCst);
    }

    /// Listings name `key` but report its value as unreadable.
    pub fn hide_value(&self, key: &[u8]) {
        lock(&self.unreadable).insert(key.to_vec());
    }

    pub fn clear_failures(&self) {
        lock(&self.failing).clear();
        lock(&self.unreadable).clear();
        self.listing_failures.store(0, Ordering::SeqCst);
    }

    /// Successful `put` and `delete` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.boxes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes().is_empty()
    }

    pub fn value(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.boxes().get(key).cloned()
    }

    fn boxes(&self) -> MutexGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>> {
        lock(&self.boxes)
    }

    fn check_failure(&self, key: &[u8]) -> Result<(), StoreError> {
        match lock(&self.failing).get(key) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BoxStore for MemoryBoxStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.value(key))
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check_failure(key)?;
        self.boxes().insert(key.to_vec(), value.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.check_failure(key)?;
        self.boxes().remove(key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_page(&self, token: Option<&str>) -> Result<BoxPage, StoreError> {
        let injected = self
            .listing_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::Transport("injected listing failure".into()));
        }
        let offset = match token {
            Some(t) => t
                .parse::<usize>()
                .map_err(|_| StoreError::Decode(format!("bad page token {t:?}")))?,
            None => 0,
        };
        let boxes = self.boxes();
        let hidden = lock(&self.unreadable);
        let mut page = BoxPage::default();
        let mut listed = 0;
        for (key, value) in boxes.iter().skip(offset).take(self.page_size) {
            listed += 1;
            if hidden.contains(key) {
                page.unreadable.push((key.clone(), "injected read failure".into()));
            } else {
                page.entries.push((key.clone(), value.clone()));
            }
        }
        let consumed = offset + listed;
        page.next = (consumed < boxes.len()).then(|| consumed.to_string());
        Ok(page)
    }
}

// --- ledger-backed store -----------------------------------------------------

/// Reads boxes from the node, writes them through the remote signer.
pub struct AlgodBoxStore {
    app_id: u64,
    algod: AlgodClient,
    signer: RemoteSigner,
    page_size: u32,
    retry: RetryPolicy,
}

impl AlgodBoxStore {
    pub fn new(
        app_id: u64,
        algod: AlgodClient,
        signer: RemoteSigner,
        page_size: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            app_id,
            algod,
            signer,
            page_size,
            retry,
        }
    }
}

#[async_trait]
impl BoxStore for AlgodBoxStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.algod.box_value(self.app_id, key).await
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.signer.put_box(self.app_id, key, value).await
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.signer.delete_box(self.app_id, key).await
    }

    async fn list_page(&self, token: Option<&str>) -> Result<BoxPage, StoreError> {
        let names = self.algod.box_names(self.app_id, self.page_size, token).await?;
        let mut page = BoxPage {
            next: names.next,
            ..BoxPage::default()
        };
        for name in names.names {
            let read = retry_transient(&self.retry, "registry box", StoreError::is_retryable, || {
                self.algod.box_value(self.app_id, &name)
            })
            .await;
            match read {
                Ok(Some(value)) => page.entries.push((name, value)),
                // deleted between listing and reading
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "registry box value unreadable");
                    page.unreadable.push((name, e.to_string()));
                }
            }
        }
        Ok(page)
    }
}
