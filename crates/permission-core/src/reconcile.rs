//! Reconciliation of persisted registry records against fresh feed values.
//!
//! The engine works on one immutable [`Snapshot`] and one [`FeedSnapshot`]
//! and produces the minimal write set. It performs no I/O; the sync layer
//! applies the writes.

use crate::address::Address;
use crate::codec;
use crate::feeds::FeedSnapshot;
use crate::record::PermissionRecord;
use crate::scoring::BoundaryTable;
use crate::staking::staking_fields;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Registry entry that could not be turned into a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MalformedEntry {
    pub key: Vec<u8>,
    pub reason: String,
}

/// Decoded registry contents at one point in time.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    records: BTreeMap<Address, PermissionRecord>,
    malformed: Vec<MalformedEntry>,
    malformed_addresses: BTreeSet<Address>,
}

impl Snapshot {
    /// Decode raw `(key, value)` box entries. Bad entries are logged and set
    /// aside rather than failing the whole snapshot.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let mut snapshot = Snapshot::default();
        for (key, value) in entries {
            let address = match Address::from_key(&key) {
                Ok(address) => address,
                Err(e) => {
                    warn!(error = %e, "skipping registry box with a foreign key");
                    snapshot.malformed.push(MalformedEntry {
                        key,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            match codec::decode(&value) {
                Ok(record) => {
                    if !record.is_consistent() {
                        debug!(address = %address.short(), "stored totals disagree with contributions");
                    }
                    snapshot.records.insert(address, record);
                }
                Err(e) => {
                    warn!(address = %address.short(), error = %e, "skipping malformed registry record");
                    snapshot.malformed_addresses.insert(address);
                    snapshot.malformed.push(MalformedEntry {
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }
        snapshot
    }

    /// Set aside an entry whose value could not be read at all. An address
    /// key still counts as present so it is never re-added as new.
    pub fn record_unreadable(&mut self, key: Vec<u8>, reason: String) {
        match Address::from_key(&key) {
            Ok(address) => {
                warn!(address = %address.short(), reason = %reason, "registry record unreadable");
                self.records.remove(&address);
                self.malformed_addresses.insert(address);
            }
            Err(_) => warn!(reason = %reason, "registry box with a foreign key unreadable"),
        }
        self.malformed.push(MalformedEntry { key, reason });
    }

    pub fn from_records(records: BTreeMap<Address, PermissionRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn records(&self) -> &BTreeMap<Address, PermissionRecord> {
        &self.records
    }

    pub fn malformed(&self) -> &[MalformedEntry] {
        &self.malformed
    }

    pub fn get(&self, address: &Address) -> Option<&PermissionRecord> {
        self.records.get(address)
    }

    /// Present in the registry, readable or not.
    pub fn contains(&self, address: &Address) -> bool {
        self.records.contains_key(address) || self.malformed_addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.malformed.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum WritePass {
    Update,
    NewStaker,
    NewSubscriber,
    /// Initial population of an empty registry.
    Seed,
}

impl WritePass {
    pub fn label(self) -> &'static str {
        match self {
            WritePass::Update => "update",
            WritePass::NewStaker => "new_staker",
            WritePass::NewSubscriber => "new_subscriber",
            WritePass::Seed => "seed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlannedWrite {
    pub record: PermissionRecord,
    pub pass: WritePass,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ReconcileReport {
    pub writes: BTreeMap<Address, PlannedWrite>,
    pub unchanged: usize,
    pub dust_filtered: usize,
    pub skipped_malformed: usize,
}

impl ReconcileReport {
    pub fn count(&self, pass: WritePass) -> usize {
        self.writes.values().filter(|w| w.pass == pass).count()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

pub struct ReconciliationEngine<'a> {
    table: &'a BoundaryTable,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(table: &'a BoundaryTable) -> Self {
        Self { table }
    }

    pub fn reconcile(&self, snapshot: &Snapshot, feeds: &FeedSnapshot) -> ReconcileReport {
        let mut report = ReconcileReport {
            skipped_malformed: snapshot.malformed.len(),
            ..ReconcileReport::default()
        };
        self.update_existing(snapshot, feeds, &mut report);
        self.add_new_addresses(snapshot, feeds, &mut report);
        report
    }

    /// Pass 1: refresh staking and subscription fields of stored records.
    fn update_existing(&self, snapshot: &Snapshot, feeds: &FeedSnapshot, report: &mut ReconcileReport) {
        for (address, stored) in &snapshot.records {
            let mut record = stored.clone();
            let mut changed = false;

            if let Some(&amount) = feeds.staking.get(address) {
                let (amount, permission) = staking_fields(amount, self.table);
                if (amount, permission) != record.staking() {
                    record.set_staking(amount, permission);
                    changed = true;
                }
            }

            // a partial tier read under-counts members of the missing tiers;
            // stored subscriptions only move, up or down, when every tier was read
            if feeds.subscriptions_complete {
                let fresh = feeds.subscription_totals(address).unwrap_or((0, 0));
                if fresh != record.subscription() {
                    record.set_subscription(fresh.0, fresh.1);
                    changed = true;
                }
            }

            if changed {
                debug!(address = %address.short(), permission = record.permission(), "record changed");
                report.writes.insert(
                    *address,
                    PlannedWrite {
                        record,
                        pass: WritePass::Update,
                    },
                );
            } else {
                report.unchanged += 1;
            }
        }
    }

    /// Passes 2 and 3: addresses absent from the registry. An address new to
    /// both feeds is built once with both sets of fields.
    fn add_new_addresses(&self, snapshot: &Snapshot, feeds: &FeedSnapshot, report: &mut ReconcileReport) {
        let stakers = feeds
            .staking
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .map(|(address, _)| *address);
        let candidates: BTreeSet<Address> = stakers
            .chain(feeds.subscriptions.keys().copied())
            .filter(|address| !snapshot.contains(address))
            .collect();

        for address in candidates {
            let mut record = PermissionRecord::empty();
            if let Some(&amount) = feeds.staking.get(&address) {
                let (amount, permission) = staking_fields(amount, self.table);
                record.set_staking(amount, permission);
            }
            let subscribed = match feeds.subscription_totals(&address) {
                Some((amount, permission)) => {
                    record.set_subscription(amount, permission);
                    true
                }
                None => false,
            };

            let pass = if subscribed {
                WritePass::NewSubscriber
            } else if record.permission() > 0 {
                WritePass::NewStaker
            } else {
                report.dust_filtered += 1;
                continue;
            };
            report.writes.insert(address, PlannedWrite { record, pass });
        }
    }
}
