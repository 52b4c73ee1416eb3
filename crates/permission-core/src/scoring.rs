//! Staking-amount scoring and record totals.

use crate::error::ScoringError;
use crate::record::PermissionRecord;
use serde::{Deserialize, Serialize};

/// Document amounts and scores are expressed in micro-units.
pub const MICRO_UNITS: u64 = 1_000_000;

/// One `(boundary, base_votes)` row of the scoring table.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub boundary: u64,
    pub base_votes: f64,
}

/// Ascending staking boundaries with the base vote weight reached at each.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoundaryTable {
    rows: Vec<Boundary>,
}

impl BoundaryTable {
    pub fn new(rows: Vec<Boundary>) -> Result<Self, ScoringError> {
        if rows.is_empty() {
            return Err(ScoringError::Empty);
        }
        for row in &rows {
            if row.boundary == 0 {
                return Err(ScoringError::NonPositiveBoundary(row.boundary));
            }
            if !row.base_votes.is_finite() || row.base_votes < 0.0 {
                return Err(ScoringError::InvalidBaseVotes(row.base_votes, row.boundary));
            }
        }
        for pair in rows.windows(2) {
            if pair[1].boundary <= pair[0].boundary {
                return Err(ScoringError::NotAscending {
                    previous: pair[0].boundary,
                    next: pair[1].boundary,
                });
            }
        }
        Ok(Self { rows })
    }

    /// The published governance staking table.
    pub fn published() -> Self {
        Self {
            rows: vec![
                Boundary {
                    boundary: 500_000_000_000,
                    base_votes: 23_299.689438,
                },
                Boundary {
                    boundary: 5_000_000_000_000,
                    base_votes: 258_885.4382,
                },
                Boundary {
                    boundary: 50_000_000_000_000,
                    base_votes: 3_236_067.9775,
                },
            ],
        }
    }

    pub fn rows(&self) -> &[Boundary] {
        &self.rows
    }

    pub fn smallest_boundary(&self) -> u64 {
        self.rows[0].boundary
    }
}

impl<'de> Deserialize<'de> for BoundaryTable {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Vec::<(u64, f64)>::deserialize(deserializer)?;
        let rows = pairs
            .into_iter()
            .map(|(boundary, base_votes)| Boundary {
                boundary,
                base_votes,
            })
            .collect();
        BoundaryTable::new(rows).map_err(serde::de::Error::custom)
    }
}

impl Default for BoundaryTable {
    fn default() -> Self {
        Self::published()
    }
}

/// Interpolated permission for a staked `amount`.
///
/// The first boundary strictly below `amount`, scanning from the largest,
/// selects the segment. `amount == boundary` does not qualify. The arithmetic
/// runs in double precision in this exact order and truncates, so results
/// match the values already stored on-chain.
pub fn permission_for_amount(amount: u64, table: &BoundaryTable) -> u64 {
    for row in table.rows.iter().rev() {
        if amount > row.boundary {
            let ratio = (amount - row.boundary) as f64 / row.boundary as f64;
            let votes = row.base_votes + ratio * row.base_votes;
            return (votes * MICRO_UNITS as f64) as u64;
        }
    }
    0
}

/// Derive `(votes, permission)` from a record's contributing fields.
pub fn recompute_totals(record: &PermissionRecord) -> (u64, u64) {
    let docs_permission = record
        .doc_contributions
        .iter()
        .fold(0u64, |acc, doc| acc.saturating_add(doc.amount));
    let votes = docs_permission / MICRO_UNITS;
    let permission = record
        .subscription_permission
        .saturating_add(record.staking_permission)
        .saturating_add(docs_permission);
    (votes, permission)
}
