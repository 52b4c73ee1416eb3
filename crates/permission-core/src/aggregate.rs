//! Merge document, staking and subscription contributions into candidate
//! records for an empty registry.

use crate::address::Address;
use crate::documents::LoadedDocument;
use crate::feeds::FeedSnapshot;
use crate::record::{DocContribution, PermissionRecord};
use crate::scoring::BoundaryTable;
use crate::staking::staking_fields;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub struct SourceAggregator<'a> {
    table: &'a BoundaryTable,
}

impl<'a> SourceAggregator<'a> {
    pub fn new(table: &'a BoundaryTable) -> Self {
        Self { table }
    }

    /// Every address named by at least one document. These are the addresses
    /// whose staking must be queried in addition to the program's stakers.
    pub fn document_addresses(documents: &[LoadedDocument]) -> BTreeSet<Address> {
        documents
            .iter()
            .flat_map(|doc| doc.entries.keys().copied())
            .collect()
    }

    pub fn aggregate(
        &self,
        documents: &[LoadedDocument],
        feeds: &FeedSnapshot,
    ) -> BTreeMap<Address, PermissionRecord> {
        let mut data: BTreeMap<Address, PermissionRecord> = BTreeMap::new();

        for doc in documents {
            for (address, amount) in &doc.entries {
                data.entry(*address)
                    .or_default()
                    .doc_contributions
                    .push(DocContribution {
                        amount: *amount,
                        doc_index: doc.spec.index,
                    });
            }
        }

        // document holders carry their current stake, zero included
        for (address, record) in data.iter_mut() {
            let amount = feeds.staking.get(address).copied().unwrap_or(0);
            let (amount, permission) = staking_fields(amount, self.table);
            record.staking_amount = amount;
            record.staking_permission = permission;
        }

        for (address, amount) in &feeds.staking {
            if *amount == 0 || data.contains_key(address) {
                continue;
            }
            let (amount, permission) = staking_fields(*amount, self.table);
            if permission == 0 {
                debug!(address = %address.short(), amount, "stake below the smallest boundary");
                continue;
            }
            let record = data.entry(*address).or_default();
            record.staking_amount = amount;
            record.staking_permission = permission;
        }

        for address in feeds.subscriptions.keys() {
            if let Some((amount, permission)) = feeds.subscription_totals(address) {
                let record = data.entry(*address).or_default();
                record.subscription_amount = amount;
                record.subscription_permission = permission;
            }
        }

        for record in data.values_mut() {
            record.refresh_totals();
        }
        data
    }
}
