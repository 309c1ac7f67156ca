//! # Mempool Diff
//!
//! Set difference between the backend's mempool listing and the ids the
//! connection already knows about.

use std::collections::HashSet;

use bitcoin::Txid;

/// Result of diffing one backend mempool listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MempoolDelta {
    /// Ids listed by the backend but not yet known, in listing order.
    pub added: Vec<Txid>,
    /// Known ids no longer listed by the backend.
    pub removed: Vec<Txid>,
}

impl MempoolDelta {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Diff `listing` against `known`.
///
/// Duplicate ids in the listing are reported once.
pub fn diff_mempool(known: &HashSet<Txid>, listing: &[Txid]) -> MempoolDelta {
    let listed: HashSet<Txid> = listing.iter().copied().collect();

    let mut seen = HashSet::with_capacity(listing.len());
    let added = listing
        .iter()
        .filter(|txid| !known.contains(*txid) && seen.insert(**txid))
        .copied()
        .collect();

    let removed = known
        .iter()
        .filter(|txid| !listed.contains(*txid))
        .copied()
        .collect();

    MempoolDelta { added, removed }
}
