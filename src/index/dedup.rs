//! Skip candidates that an earlier run already persisted.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use super::Modality;
use crate::store::VectorStore;

/// Ids already stored, per destination collection.
pub type ExistingIds = HashMap<Modality, HashSet<String>>;

/// Page through every id in `store`. A missing collection yields an empty set.
pub fn fetch_existing_ids(
    store: Option<&dyn VectorStore>,
    page_size: usize,
) -> Result<HashSet<String>> {
    let Some(store) = store else {
        return Ok(HashSet::new());
    };

    let page_size = page_size.max(1);
    let mut ids = HashSet::new();
    let mut offset = 0;
    loop {
        let page = store.get(page_size, offset)?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        ids.extend(page);
    }

    tracing::debug!(collection = store.name(), existing = ids.len(), "existing ids fetched");
    Ok(ids)
}

/// Keep candidates absent from every existing set, in input order.
pub fn filter(candidates: &[String], existing: &ExistingIds) -> Vec<String> {
    candidates
        .iter()
        .filter(|id| !existing.values().any(|set| set.contains(id.as_str())))
        .cloned()
        .collect()
}
