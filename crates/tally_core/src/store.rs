//! Local record store.
//!
//! The store holds every record known to the device. Mutations are staged
//! in a working set that is immediately visible to readers, and become
//! durable only when [`RecordStore::try_commit`] succeeds. Each successful
//! commit is announced on the store's commit feed, which is what drives
//! automatic synchronization.

use crate::feed::EventFeed;
use crate::id::{LocalId, RemoteId};
use crate::record::{Record, RecordKind, Syncable};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Emitted after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEvent {
    /// Sequence number of the commit.
    pub sequence: u64,
    /// Records written or discarded by the commit.
    pub changed: Vec<LocalId>,
}

/// Contract between the sync engine and the local storage engine.
pub trait RecordStore: Send + Sync {
    /// Returns all live records matching the predicate, in no particular order.
    fn query(&self, predicate: &dyn Fn(&Record) -> bool) -> Vec<Record>;

    /// Looks up a record by local ID.
    fn get(&self, id: LocalId) -> Option<Record>;

    /// Looks up a record by its server identity.
    fn find_by_remote_id(&self, kind: RecordKind, remote_id: RemoteId) -> Option<Record> {
        self.query(&|r| r.kind() == kind && r.remote_id() == Some(remote_id))
            .into_iter()
            .next()
    }

    /// Stages an insert or update and marks the record persisted.
    fn put(&self, record: Record);

    /// Stages removal of a record ("not persisted").
    fn discard(&self, id: LocalId);

    /// Makes all staged mutations durable, atomically.
    ///
    /// Returns false if nothing could be committed; staged mutations then
    /// stay pending for the next attempt.
    fn try_commit(&self) -> bool;

    /// Feed announcing successful commits.
    fn commits(&self) -> &EventFeed<CommitEvent>;
}

/// An in-memory record store.
///
/// Keeps a working set, a committed snapshot standing in for durable
/// storage, and the set of IDs changed since the last commit.
pub struct MemoryStore {
    working: RwLock<BTreeMap<LocalId, Record>>,
    committed: RwLock<BTreeMap<LocalId, Record>>,
    pending: Mutex<BTreeSet<LocalId>>,
    commits: EventFeed<CommitEvent>,
    sequence: AtomicU64,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            working: RwLock::new(BTreeMap::new()),
            committed: RwLock::new(BTreeMap::new()),
            pending: Mutex::new(BTreeSet::new()),
            commits: EventFeed::new(),
            sequence: AtomicU64::new(0),
            fail_commits: AtomicBool::new(false),
        }
    }

    /// Creates a store whose records are already committed.
    ///
    /// No commit event is emitted for the seed.
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let store = Self::new();
        {
            let mut working = store.working.write();
            let mut committed = store.committed.write();
            for record in records {
                committed.insert(record.local_id(), record.clone());
                working.insert(record.local_id(), record);
            }
        }
        store
    }

    /// Makes every subsequent commit fail (or succeed again).
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Returns the durable version of a record.
    pub fn committed(&self, id: LocalId) -> Option<Record> {
        self.committed.read().get(&id).cloned()
    }

    /// Returns the number of durable records.
    pub fn committed_len(&self) -> usize {
        self.committed.read().len()
    }

    /// Returns the number of live records.
    pub fn len(&self) -> usize {
        self.working.read().len()
    }

    /// Returns true if the store holds no live records.
    pub fn is_empty(&self) -> bool {
        self.working.read().is_empty()
    }

    /// Returns the number of mutations waiting for a commit.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns the sequence number of the last successful commit.
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryStore {
    fn query(&self, predicate: &dyn Fn(&Record) -> bool) -> Vec<Record> {
        self.working
            .read()
            .values()
            .filter(|r| predicate(*r))
            .cloned()
            .collect()
    }

    fn get(&self, id: LocalId) -> Option<Record> {
        self.working.read().get(&id).cloned()
    }

    fn put(&self, record: Record) {
        let id = record.local_id();
        self.working.write().insert(id, record);
        self.pending.lock().insert(id);
    }

    fn discard(&self, id: LocalId) {
        self.working.write().remove(&id);
        self.pending.lock().insert(id);
    }

    fn try_commit(&self) -> bool {
        if self.fail_commits.load(Ordering::SeqCst) {
            tracing::warn!(pending = self.pending_len(), "commit failed");
            return false;
        }

        let changed: Vec<LocalId> = {
            let mut pending = self.pending.lock();
            let working = self.working.read();
            let mut committed = self.committed.write();
            for id in pending.iter() {
                match working.get(id) {
                    Some(record) => {
                        committed.insert(*id, record.clone());
                    }
                    None => {
                        committed.remove(id);
                    }
                }
            }
            std::mem::take(&mut *pending).into_iter().collect()
        };

        if !changed.is_empty() {
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(sequence, changed = changed.len(), "committed");
            self.commits.emit(CommitEvent { sequence, changed });
        }
        true
    }

    fn commits(&self) -> &EventFeed<CommitEvent> {
        &self.commits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{SyncMeta, Tag, Workspace};

    fn workspace(name: &str) -> Record {
        Record::from(Workspace {
            meta: SyncMeta::new(),
            name: name.into(),
        })
    }

    #[test]
    fn put_is_visible_before_commit() {
        let store = MemoryStore::new();
        let record = workspace("a");
        let id = record.local_id();

        store.put(record);
        assert!(store.get(id).is_some());
        assert!(store.committed(id).is_none());
        assert_eq!(store.pending_len(), 1);

        assert!(store.try_commit());
        assert!(store.committed(id).is_some());
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn query_filters_by_predicate() {
        let ws = workspace("a");
        let tag = Record::from(Tag {
            meta: SyncMeta::remote(RemoteId::new(3)),
            workspace_id: ws.local_id(),
            name: "urgent".into(),
        });
        let store = MemoryStore::with_records(vec![ws, tag]);

        let tags = store.query(&|r| r.kind() == RecordKind::Tag);
        assert_eq!(tags.len(), 1);
        assert!(store
            .find_by_remote_id(RecordKind::Tag, RemoteId::new(3))
            .is_some());
        assert!(store
            .find_by_remote_id(RecordKind::Workspace, RemoteId::new(3))
            .is_none());
    }

    #[test]
    fn discard_removes_on_commit() {
        let record = workspace("gone");
        let id = record.local_id();
        let store = MemoryStore::with_records(vec![record]);

        store.discard(id);
        assert!(store.get(id).is_none());
        assert!(store.committed(id).is_some());

        assert!(store.try_commit());
        assert!(store.committed(id).is_none());
        assert_eq!(store.committed_len(), 0);
    }

    #[test]
    fn failed_commit_keeps_pending() {
        let store = MemoryStore::new();
        let record = workspace("a");
        let id = record.local_id();
        store.put(record);

        store.set_fail_commits(true);
        assert!(!store.try_commit());
        assert!(store.committed(id).is_none());
        assert_eq!(store.pending_len(), 1);

        store.set_fail_commits(false);
        assert!(store.try_commit());
        assert!(store.committed(id).is_some());
    }

    #[test]
    fn commit_emits_event() {
        let store = MemoryStore::new();
        let mut sub = store.commits().subscribe();
        let record = workspace("a");
        let id = record.local_id();

        assert!(store.try_commit());
        assert_eq!(sub.try_recv(), None);

        store.put(record);
        assert!(store.try_commit());
        let event = sub.try_recv().unwrap();
        assert_eq!(event.sequence, 1);
        assert_eq!(event.changed, vec![id]);
        assert_eq!(store.last_sequence(), 1);
    }
}
