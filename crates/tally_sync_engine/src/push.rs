//! Pushing a single record.

use crate::error::{FailureKind, SyncError, SyncResult};
use crate::transport::RemoteClient;
use tally_core::{Record, RecordStore, RemoteId, Syncable};

/// The remote operation a record needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushAction {
    /// Tombstoned and known to the server.
    Delete,
    /// Tombstoned but never reached the server; dropped locally.
    Discard,
    /// Known to the server and changed locally.
    Update,
    /// Not yet known to the server.
    Create,
}

impl PushAction {
    /// Picks the action from the record's tombstone and remote ID.
    pub fn for_record(record: &Record) -> Self {
        let meta = record.meta();
        match (meta.deleted_at.is_some(), meta.remote_id.is_some()) {
            (true, true) => PushAction::Delete,
            (true, false) => PushAction::Discard,
            (false, true) => PushAction::Update,
            (false, false) => PushAction::Create,
        }
    }
}

/// Sends one record to the server and stores the outcome locally.
///
/// `record` is the snapshot taken when the push phase started. If the
/// stored record was edited since, it keeps its dirty flag so the edit goes
/// out with a later run.
pub(crate) async fn push_record(
    remote: &dyn RemoteClient,
    store: &dyn RecordStore,
    record: &Record,
) -> SyncResult<()> {
    match PushAction::for_record(record) {
        PushAction::Delete => {
            remote.delete(record).await?;
            store.discard(record.local_id());
        }
        PushAction::Discard => {
            store.discard(record.local_id());
        }
        PushAction::Update => {
            remote.update(record).await?;
            mark_synced(store, record, None);
        }
        PushAction::Create => {
            let remote_id = remote.create(record).await?;
            mark_synced(store, record, Some(remote_id));
        }
    }
    Ok(())
}

fn mark_synced(store: &dyn RecordStore, snapshot: &Record, remote_id: Option<RemoteId>) {
    let Some(mut current) = store.get(snapshot.local_id()) else {
        tracing::warn!(
            record = %snapshot.label(),
            remote_id = ?remote_id,
            "record discarded locally while its push was in flight"
        );
        return;
    };
    let unchanged = current.meta().modified_at == snapshot.meta().modified_at;
    let meta = current.meta_mut();
    if let Some(remote_id) = remote_id {
        meta.remote_id = Some(remote_id);
    }
    if unchanged {
        meta.mark_synced();
    } else {
        meta.remote_rejected = false;
    }
    store.put(current);
}

/// Logs a failed push and flags server rejections on the stored record.
pub(crate) fn record_failure(
    store: &dyn RecordStore,
    record: &Record,
    error: &SyncError,
) -> FailureKind {
    let kind = error.failure_kind();
    let label = record.label();
    match kind {
        FailureKind::Validation => {
            tracing::info!(record = %label, error = %error, "server rejected record");
            // A newer edit has not been judged by the server yet.
            if let Some(mut current) = store.get(record.local_id()) {
                if current.meta().modified_at == record.meta().modified_at {
                    current.meta_mut().remote_rejected = true;
                    store.put(current);
                }
            }
        }
        FailureKind::Network => {
            tracing::info!(record = %label, error = %error, "failed to sync record");
        }
        FailureKind::Other => {
            tracing::warn!(record = %label, error = %error, "failed to sync record");
        }
    }
    kind
}
