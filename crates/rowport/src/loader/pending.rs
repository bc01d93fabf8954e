//! Rows deferred until the rows they reference are committed.

use std::collections::{BTreeMap, HashMap};

use super::identity::Identity;
use crate::core::Row;

/// A row waiting for one or more referenced rows.
#[derive(Debug, Clone)]
pub struct PendingRow {
    /// Submission order of the row.
    pub seq: u64,
    pub row: Row,
    /// Identities the row was submitted under, for rows that are referenced.
    pub keys: Vec<Identity>,
    /// Referenced identities not yet committed, each tagged with the foreign key it came from.
    pub unresolved: Vec<Identity>,
}

/// Deferred rows, indexed by the identities they wait on.
#[derive(Debug, Default)]
pub struct PendingSet {
    rows: BTreeMap<u64, PendingRow>,
    waiting: HashMap<Identity, Vec<u64>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.waiting.clear();
    }

    /// Defer a row. `unresolved` must not be empty.
    pub fn insert(&mut self, pending: PendingRow) {
        for identity in &pending.unresolved {
            let waiters = self.waiting.entry(identity.clone()).or_default();
            if waiters.last() != Some(&pending.seq) {
                waiters.push(pending.seq);
            }
        }
        self.rows.insert(pending.seq, pending);
    }

    /// Whether any deferred row waits on `identity`.
    pub fn is_waiting_on(&self, identity: &Identity) -> bool {
        self.waiting.contains_key(identity)
    }

    /// Resolve `identity` in every row waiting on it.
    ///
    /// `resolve` is called once per matching unresolved entry, so a row that
    /// references the same target through two foreign keys sees both. Rows
    /// left with nothing unresolved are removed and returned in submission
    /// order.
    pub fn resolve<F>(&mut self, identity: &Identity, mut resolve: F) -> Vec<PendingRow>
    where
        F: FnMut(&mut Row, &Identity),
    {
        let Some(mut seqs) = self.waiting.remove(identity) else {
            return Vec::new();
        };
        seqs.sort_unstable();

        let mut released = Vec::new();
        for seq in seqs {
            let Some(pending) = self.rows.get_mut(&seq) else {
                continue;
            };
            let mut remaining = Vec::with_capacity(pending.unresolved.len());
            for entry in pending.unresolved.drain(..) {
                if &entry == identity {
                    resolve(&mut pending.row, &entry);
                } else {
                    remaining.push(entry);
                }
            }
            pending.unresolved = remaining;
            if pending.unresolved.is_empty() {
                if let Some(row) = self.rows.remove(&seq) {
                    released.push(row);
                }
            }
        }
        released
    }

    /// Deferred rows in submission order.
    pub fn iter(&self) -> impl Iterator<Item = &PendingRow> {
        self.rows.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ForeignKey;

    fn pending(seq: u64, row: Row, fks: &[ForeignKey]) -> PendingRow {
        let unresolved = fks
            .iter()
            .enumerate()
            .filter_map(|(i, fk)| Identity::of_reference(&row, fk, i))
            .collect();
        PendingRow {
            seq,
            row,
            keys: Vec::new(),
            unresolved,
        }
    }

    #[test]
    fn test_release_in_submission_order() {
        let fk = ForeignKey::new(&["author_id"], "author", &["id"]);
        let mut set = PendingSet::new();
        set.insert(pending(5, Row::new("book").with("author_id", 1), &[fk.clone()]));
        set.insert(pending(2, Row::new("book").with("author_id", 1), &[fk.clone()]));
        set.insert(pending(3, Row::new("book").with("author_id", 2), &[fk.clone()]));

        let author = Identity::of_row(&Row::new("author").with("id", 1), &vec!["id".into()])
            .unwrap();
        assert!(set.is_waiting_on(&author));
        let released = set.resolve(&author, |_, _| {});
        assert_eq!(released.iter().map(|p| p.seq).collect::<Vec<_>>(), vec![2, 5]);
        assert_eq!(set.len(), 1);
        assert!(!set.is_waiting_on(&author));
    }

    #[test]
    fn test_two_keys_to_same_target_resolve_together() {
        let fks = [
            ForeignKey::new(&["from_id"], "node", &["id"]),
            ForeignKey::new(&["to_id"], "node", &["id"]),
            ForeignKey::new(&["owner_id"], "user", &["id"]),
        ];
        let mut set = PendingSet::new();
        let row = Row::new("edge").with("from_id", 4).with("to_id", 4).with("owner_id", 9);
        set.insert(pending(1, row, &fks));

        let node = Identity::of_row(&Row::new("node").with("id", 4), &vec!["id".into()]).unwrap();
        let mut seen = Vec::new();
        let released = set.resolve(&node, |_, entry| seen.push(entry.foreign_key()));
        assert!(released.is_empty());
        assert_eq!(seen, vec![Some(0), Some(1)]);

        let user = Identity::of_row(&Row::new("user").with("id", 9), &vec!["id".into()]).unwrap();
        let released = set.resolve(&user, |_, _| {});
        assert_eq!(released.len(), 1);
        assert!(set.is_empty());
    }
}
