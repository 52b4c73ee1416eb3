//! Static allocation documents.
//!
//! Each document lives at `<root>/<doc_id>/<stem>.json` and maps address text
//! to a weight. Governor documents store `[weight, ...]` instead of a bare
//! number; only the first element counts.

use crate::address::{Address, AliasTable};
use crate::error::DocumentError;
use crate::scoring::MICRO_UNITS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const ALLOCATIONS_STEM: &str = "allocations";
pub const GOVERNORS_STEM: &str = "dao_governors";
pub const ONGOING_GOVERNORS_STEM: &str = "dao_ongoing_governors";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSpec {
    pub doc_id: String,
    pub stem: String,
    pub index: u8,
}

impl DocumentSpec {
    pub fn path(&self, root: &Path) -> PathBuf {
        root.join(&self.doc_id).join(format!("{}.json", self.stem))
    }
}

/// Configured document collections, in enumeration order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSet {
    pub root: PathBuf,
    pub discussion: Vec<String>,
    pub discussion_start_index: u8,
    pub staking: Vec<String>,
    pub staking_start_index: u8,
}

impl DocumentSet {
    /// Discussion documents first, then both governor stems of every staking
    /// document.
    pub fn specs(&self) -> Vec<DocumentSpec> {
        let mut specs = Vec::new();
        for (position, doc_id) in self.discussion.iter().enumerate() {
            specs.push(DocumentSpec {
                doc_id: doc_id.clone(),
                stem: ALLOCATIONS_STEM.to_string(),
                index: self.discussion_start_index.wrapping_add(position as u8),
            });
        }
        for (position, doc_id) in self.staking.iter().enumerate() {
            let index = self.staking_start_index.wrapping_add(position as u8);
            for stem in [GOVERNORS_STEM, ONGOING_GOVERNORS_STEM] {
                specs.push(DocumentSpec {
                    doc_id: doc_id.clone(),
                    stem: stem.to_string(),
                    index,
                });
            }
        }
        specs
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DocumentValue {
    Weight(f64),
    Row(Vec<serde_json::Value>),
}

impl DocumentValue {
    fn weight(&self) -> Option<f64> {
        match self {
            DocumentValue::Weight(w) => Some(*w),
            DocumentValue::Row(row) => row.first().and_then(serde_json::Value::as_f64),
        }
    }
}

/// One document's entries, already alias-normalized and scaled to micro-units.
#[derive(Clone, Debug)]
pub struct LoadedDocument {
    pub spec: DocumentSpec,
    pub entries: BTreeMap<Address, u64>,
}

pub fn load_document(
    root: &Path,
    spec: &DocumentSpec,
    aliases: &AliasTable,
) -> Result<LoadedDocument, DocumentError> {
    let path = spec.path(root);
    let shown = path.display().to_string();
    if !path.exists() {
        warn!(path = %shown, "document not found, treating as empty");
        return Ok(LoadedDocument {
            spec: spec.clone(),
            entries: BTreeMap::new(),
        });
    }
    let text = std::fs::read_to_string(&path).map_err(|source| DocumentError::Io {
        path: shown.clone(),
        source,
    })?;
    // serde_json is built with `preserve_order`, so this map iterates in file order
    let raw: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&text).map_err(|source| DocumentError::Parse {
            path: shown.clone(),
            source,
        })?;
    Ok(LoadedDocument {
        spec: spec.clone(),
        entries: normalize_entries(&shown, raw, aliases),
    })
}

fn normalize_entries(
    path: &str,
    raw: serde_json::Map<String, serde_json::Value>,
    aliases: &AliasTable,
) -> BTreeMap<Address, u64> {
    let mut entries = BTreeMap::new();
    for (text, value) in raw {
        let canonical = aliases.canonical(&text);
        let address: Address = match canonical.parse() {
            Ok(address) => address,
            Err(e) => {
                warn!(path, address = %canonical, error = %e, "skipping unparseable address");
                continue;
            }
        };
        let weight = match serde_json::from_value::<DocumentValue>(value)
            .ok()
            .and_then(|value| value.weight())
        {
            Some(w) if w.is_finite() && w >= 0.0 => w,
            _ => {
                warn!(path, address = %address.short(), "skipping entry without a usable weight");
                continue;
            }
        };
        // an alias and its canonical address collapse to one entry; the later one in the file wins
        entries.insert(address, (weight * MICRO_UNITS as f64) as u64);
    }
    entries
}

pub fn load_documents(
    set: &DocumentSet,
    aliases: &AliasTable,
) -> Result<Vec<LoadedDocument>, DocumentError> {
    set.specs()
        .iter()
        .map(|spec| load_document(&set.root, spec, aliases))
        .collect()
}
