//! Two-replica reconciliation.
//!
//! Each replica carries a single clock: the dataset timestamp recording its
//! last committed mutation or sync. Entries carry their own modification
//! time. With only those two numbers the merge resolves edits by
//! last-writer-wins and infers deletions from absence, so no tombstones are
//! ever stored. The inference is only sound for exactly two replicas with
//! loosely synchronized clocks; skew between them can turn a fresh addition
//! into an inferred deletion.

use crate::error::MergeRejected;
use crate::model::{compare_ids, now_millis, Dataset, Entry, Timestamp, SCHEMA_VERSION};
use std::cmp::Ordering;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// Local had never been loaded; remote was taken as-is.
    Adopted,
    /// Both replicas report the same sync instant.
    Identical,
    /// Entries agree; local only moved its timestamp up to remote's.
    FastForwarded,
    /// Entries differ; the result must be written to both replicas.
    Merged,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub dataset: Dataset,
    pub kind: MergeKind,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.kind == MergeKind::Merged
    }
}

/// An entry present on one side only survives iff it was modified after the
/// other replica's last observed sync. Otherwise the other replica saw it and
/// has since dropped it, so the absence is a deletion.
pub fn absence_means_deletion(entry_timestamp: Timestamp, other_sync: Timestamp) -> bool {
    other_sync >= entry_timestamp
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SyncReconciler;

impl SyncReconciler {
    pub fn merge(&self, local: &Dataset, remote: &Dataset) -> Result<MergeOutcome, MergeRejected> {
        self.merge_at(local, remote, now_millis())
    }

    pub fn merge_at(
        &self,
        local: &Dataset,
        remote: &Dataset,
        now: Timestamp,
    ) -> Result<MergeOutcome, MergeRejected> {
        for side in [local, remote] {
            if side.schema_version != SCHEMA_VERSION {
                return Err(MergeRejected::UnsupportedSchema {
                    found: side.schema_version,
                    expected: SCHEMA_VERSION,
                });
            }
        }

        if local.timestamp == 0 {
            return Ok(MergeOutcome {
                dataset: remote.clone(),
                kind: MergeKind::Adopted,
            });
        }
        if local.timestamp == remote.timestamp {
            return Ok(MergeOutcome {
                dataset: local.clone(),
                kind: MergeKind::Identical,
            });
        }

        let (entries, changed) = merge_entries(local, remote);
        if changed {
            Ok(MergeOutcome {
                dataset: Dataset::new(now, entries),
                kind: MergeKind::Merged,
            })
        } else {
            let mut dataset = local.clone();
            dataset.timestamp = remote.timestamp;
            Ok(MergeOutcome {
                dataset,
                kind: MergeKind::FastForwarded,
            })
        }
    }
}

fn merge_entries(local: &Dataset, remote: &Dataset) -> (Vec<Entry>, bool) {
    let mut ours = local.entries().iter().peekable();
    let mut theirs = remote.entries().iter().peekable();
    let mut merged = Vec::with_capacity(local.len().max(remote.len()));
    let mut changed = false;

    loop {
        let order = match (ours.peek(), theirs.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(l), Some(r)) => compare_ids(&l.id, &r.id),
        };
        match order {
            Ordering::Equal => {
                if let (Some(l), Some(r)) = (ours.next(), theirs.next()) {
                    if l.timestamp < r.timestamp {
                        debug!(id = %r.id, "remote edit is newer");
                        merged.push(r.clone());
                        changed = true;
                    } else {
                        if l.timestamp > r.timestamp {
                            debug!(id = %l.id, "local edit is newer");
                            changed = true;
                        }
                        merged.push(l.clone());
                    }
                }
            }
            Ordering::Less => {
                if let Some(l) = ours.next() {
                    keep_unique(l, remote.timestamp, &mut merged);
                    changed = true;
                }
            }
            Ordering::Greater => {
                if let Some(r) = theirs.next() {
                    keep_unique(r, local.timestamp, &mut merged);
                    changed = true;
                }
            }
        }
    }
    (merged, changed)
}

fn keep_unique(entry: &Entry, other_sync: Timestamp, merged: &mut Vec<Entry>) {
    if absence_means_deletion(entry.timestamp, other_sync) {
        debug!(id = %entry.id, "dropping entry deleted on the other replica");
    } else {
        debug!(id = %entry.id, "keeping entry added since the other replica synced");
        merged.push(entry.clone());
    }
}
