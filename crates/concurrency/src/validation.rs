//! Watch-set validation
//!
//! First-committer-wins over the **watch set**: a transaction
//! conflicts exactly when some key it watched has a committed write
//! newer than its snapshot. Blind writes never conflict, and a
//! transaction that watched nothing validates trivially.

use std::collections::HashMap;

use lattice_core::{CollectionId, Key, Result, Sequence, Storage};

/// One watched key whose committed state moved past the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchViolation {
    /// Collection of the conflicting key.
    pub collection: CollectionId,
    /// The conflicting key.
    pub key: Key,
    /// Sequence the transaction observed when it read the key.
    pub observed: Sequence,
    /// Sequence of the committed write that invalidated the read.
    pub committed: Sequence,
}

/// Result of folding validation over a watch set
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    violations: Vec<WatchViolation>,
}

impl ValidationOutcome {
    /// Whether the transaction may commit.
    pub fn is_serializable(&self) -> bool {
        self.violations.is_empty()
    }

    /// The first violation, if any. Deterministic because the fold
    /// visits watch entries in key order.
    pub fn first(&self) -> Option<&WatchViolation> {
        self.violations.first()
    }

    /// All violations found.
    pub fn violations(&self) -> &[WatchViolation] {
        &self.violations
    }
}

/// Check every watched read against the current committed state.
///
/// A watched key conflicts when its newest committed write carries a
/// sequence greater than `snapshot` — some transaction serialized
/// after this one began and touched a key this one depended on.
pub fn validate_watch_set<S: Storage>(
    watch_set: &HashMap<(CollectionId, Key), Sequence>,
    snapshot: Sequence,
    store: &S,
) -> Result<ValidationOutcome> {
    let mut outcome = ValidationOutcome::default();
    if watch_set.is_empty() {
        return Ok(outcome);
    }

    let mut entries: Vec<_> = watch_set.iter().collect();
    entries.sort_by_key(|(&(collection, key), _)| (collection, key));

    for (&(collection, key), &observed) in entries {
        let committed = store.last_write(collection, key)?;
        if committed > snapshot {
            outcome.violations.push(WatchViolation {
                collection,
                key,
                observed,
                committed,
            });
        }
    }
    Ok(outcome)
}
