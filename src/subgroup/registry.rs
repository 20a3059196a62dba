// src/subgroup/registry.rs

//! Key → ordered pending operations.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, trace};

use crate::errors::{Result, SubGroupError};
use crate::operation::{Operation, OperationId};
use crate::subgroup::SubGroupKey;

/// The scheduler's only shared mutable state.
///
/// Each sequence holds the unsettled operations of one key in submission
/// order. A key whose sequence becomes empty is removed, so "no entry" and
/// "empty subgroup" are the same thing.
#[derive(Debug)]
pub struct SubGroupMap<K> {
    groups: Mutex<HashMap<K, Vec<Operation>>>,
}

impl<K: SubGroupKey> Default for SubGroupMap<K> {
    fn default() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: SubGroupKey> SubGroupMap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain `ops` behind the current tail of `key` and append them, all
    /// under one lock so the batch stays contiguous.
    ///
    /// Stops at the first operation that cannot be wired. Returns how many
    /// operations were appended, plus the error if wiring stopped early.
    pub fn append(&self, key: &K, ops: &[Operation]) -> (usize, Option<SubGroupError>) {
        let mut groups = self.lock();
        let sequence = groups.entry(key.clone()).or_default();

        for (appended, op) in ops.iter().enumerate() {
            if let Err(err) = wire_behind_tail(sequence, op) {
                if sequence.is_empty() {
                    groups.remove(key);
                }
                return (appended, Some(err));
            }
            sequence.push(op.clone());
        }

        trace!(key = ?key, added = ops.len(), pending = sequence.len(), "operations appended to subgroup");
        (ops.len(), None)
    }

    /// Drop a settled operation from its subgroup.
    pub fn remove(&self, key: &K, id: OperationId) {
        let mut groups = self.lock();

        let Some(sequence) = groups.get_mut(key) else {
            report_missing(key, id);
            return;
        };
        let Some(position) = sequence.iter().position(|op| op.id() == id) else {
            report_missing(key, id);
            return;
        };

        sequence.remove(position);
        if sequence.is_empty() {
            groups.remove(key);
            debug!(key = ?key, op = %id, "subgroup drained");
        } else {
            trace!(key = ?key, op = %id, pending = sequence.len(), "operation removed from subgroup");
        }
    }

    /// Copy of the pending operations for `key`, oldest first.
    pub fn snapshot<Q>(&self, key: &Q) -> Vec<Operation>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<K> {
        self.lock().keys().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Vec<Operation>>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn wire_behind_tail(sequence: &[Operation], op: &Operation) -> Result<()> {
    match sequence.last() {
        Some(tail) if !tail.is_finished() => op.add_dependency(tail),
        _ => Ok(()),
    }
}

fn report_missing<K: SubGroupKey>(key: &K, id: OperationId) {
    error!(key = ?key, op = %id, "settled operation missing from its subgroup");
    debug_assert!(false, "operation {id} missing from subgroup {key:?}");
}
