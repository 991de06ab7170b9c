//! Remote client abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tally_core::{
    Client, LocalId, Project, Record, RemoteId, Syncable, Tag, Task, TimeEntry, User, Workspace,
};

/// Changes fetched from the server.
///
/// Records arrive already mapped to local identity: a record the device
/// knows carries its existing [`LocalId`], foreign keys refer to local IDs.
#[derive(Debug, Clone)]
pub struct RemoteChanges {
    /// Server time at which the change set was produced.
    pub timestamp: DateTime<Utc>,
    /// The authenticated user.
    pub user: User,
    /// Changed workspaces.
    pub workspaces: Vec<Workspace>,
    /// Changed tags.
    pub tags: Vec<Tag>,
    /// Changed clients.
    pub clients: Vec<Client>,
    /// Changed projects.
    pub projects: Vec<Project>,
    /// Changed tasks.
    pub tasks: Vec<Task>,
    /// Changed time entries.
    pub time_entries: Vec<TimeEntry>,
}

impl RemoteChanges {
    /// A change set containing only the user.
    pub fn empty(timestamp: DateTime<Utc>, user: User) -> Self {
        Self {
            timestamp,
            user,
            workspaces: Vec::new(),
            tags: Vec::new(),
            clients: Vec::new(),
            projects: Vec::new(),
            tasks: Vec::new(),
            time_entries: Vec::new(),
        }
    }

    /// Number of records in the change set, the user included.
    pub fn record_count(&self) -> usize {
        1 + self.workspaces.len()
            + self.tags.len()
            + self.clients.len()
            + self.projects.len()
            + self.tasks.len()
            + self.time_entries.len()
    }
}

/// Client for the server API.
///
/// Implementations raise [`SyncError::Validation`] when the server refuses
/// a payload and [`SyncError::Transport`] when it cannot be reached.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetches everything changed since `since`; `None` fetches everything.
    async fn fetch_changes(&self, since: Option<DateTime<Utc>>) -> SyncResult<RemoteChanges>;

    /// Creates the record remotely and returns its new remote ID.
    async fn create(&self, record: &Record) -> SyncResult<RemoteId>;

    /// Updates an existing remote record.
    async fn update(&self, record: &Record) -> SyncResult<()>;

    /// Deletes an existing remote record.
    async fn delete(&self, record: &Record) -> SyncResult<()>;
}

/// A call received by [`MockRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// `fetch_changes`.
    Fetch(Option<DateTime<Utc>>),
    /// `create`.
    Create(LocalId),
    /// `update`.
    Update(LocalId),
    /// `delete`.
    Delete(LocalId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Validation,
    Network,
    Server,
}

impl Failure {
    fn to_error(self, record: &Record) -> SyncError {
        match self {
            Failure::Validation => SyncError::validation(format!("{} is invalid", record.label())),
            Failure::Network => SyncError::network("connection reset"),
            Failure::Server => SyncError::ServerError("internal server error".into()),
        }
    }
}

/// A scriptable remote client for testing.
pub struct MockRemote {
    changes: Mutex<Option<RemoteChanges>>,
    fetch_failure: Mutex<Option<Failure>>,
    failures: Mutex<HashMap<LocalId, Failure>>,
    calls: Mutex<Vec<RemoteCall>>,
    latency: Mutex<Duration>,
    next_remote_id: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRemote {
    /// Creates a mock that accepts everything.
    pub fn new() -> Self {
        Self {
            changes: Mutex::new(None),
            fetch_failure: Mutex::new(None),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            next_remote_id: AtomicU64::new(1000),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Sets the change set returned by `fetch_changes`.
    pub fn set_changes(&self, changes: RemoteChanges) {
        *self.changes.lock() = Some(changes);
    }

    /// Makes `fetch_changes` fail with a network error.
    pub fn fail_fetch_network(&self) {
        *self.fetch_failure.lock() = Some(Failure::Network);
    }

    /// Makes `fetch_changes` fail with a server error.
    pub fn fail_fetch_server(&self) {
        *self.fetch_failure.lock() = Some(Failure::Server);
    }

    /// Makes every push of `id` fail with a validation rejection.
    pub fn reject(&self, id: LocalId) {
        self.failures.lock().insert(id, Failure::Validation);
    }

    /// Makes every push of `id` fail with a network error.
    pub fn fail_network(&self, id: LocalId) {
        self.failures.lock().insert(id, Failure::Network);
    }

    /// Makes every push of `id` fail with a server error.
    pub fn fail_server(&self, id: LocalId) {
        self.failures.lock().insert(id, Failure::Server);
    }

    /// Delays every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Returns all calls received so far, in arrival order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Returns the local IDs of all push calls, in arrival order.
    pub fn pushed_ids(&self) -> Vec<LocalId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Create(id) | RemoteCall::Update(id) | RemoteCall::Delete(id) => {
                    Some(*id)
                }
                RemoteCall::Fetch(_) => None,
            })
            .collect()
    }

    /// Returns the number of `fetch_changes` calls.
    pub fn fetch_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, RemoteCall::Fetch(_)))
            .count()
    }

    /// Highest number of push calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn push_call(&self, call: RemoteCall, record: &Record) -> SyncResult<()> {
        self.calls.lock().push(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure = self.failures.lock().get(&record.local_id()).copied();
        match failure {
            Some(failure) => Err(failure.to_error(record)),
            None => Ok(()),
        }
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn fetch_changes(&self, since: Option<DateTime<Utc>>) -> SyncResult<RemoteChanges> {
        self.calls.lock().push(RemoteCall::Fetch(since));
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failure = *self.fetch_failure.lock();
        match failure {
            Some(Failure::Network) => Err(SyncError::network("server unreachable")),
            Some(_) => Err(SyncError::ServerError("internal server error".into())),
            None => {
                let changes = self.changes.lock().clone();
                changes.ok_or_else(|| SyncError::ServerError("no mock change set".into()))
            }
        }
    }

    async fn create(&self, record: &Record) -> SyncResult<RemoteId> {
        self.push_call(RemoteCall::Create(record.local_id()), record)
            .await?;
        Ok(RemoteId::new(
            self.next_remote_id.fetch_add(1, Ordering::SeqCst),
        ))
    }

    async fn update(&self, record: &Record) -> SyncResult<()> {
        self.push_call(RemoteCall::Update(record.local_id()), record)
            .await
    }

    async fn delete(&self, record: &Record) -> SyncResult<()> {
        self.push_call(RemoteCall::Delete(record.local_id()), record)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::SyncMeta;

    fn workspace() -> Record {
        Record::from(Workspace {
            meta: SyncMeta::new(),
            name: "Acme".into(),
        })
    }

    fn user() -> User {
        User {
            meta: SyncMeta::remote(RemoteId::new(1)),
            name: "Ada".into(),
            email: "ada@example.com".into(),
        }
    }

    #[tokio::test]
    async fn mock_remote_allocates_ids() {
        let remote = MockRemote::new();
        let a = remote.create(&workspace()).await.unwrap();
        let b = remote.create(&workspace()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(remote.pushed_ids().len(), 2);
    }

    #[tokio::test]
    async fn mock_remote_scripted_failures() {
        let remote = MockRemote::new();
        let rejected = workspace();
        let offline = workspace();
        remote.reject(rejected.local_id());
        remote.fail_network(offline.local_id());

        let err = remote.update(&rejected).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let err = remote.delete(&offline).await.unwrap_err();
        assert!(err.is_network_failure());
        assert_eq!(remote.pushed_ids(), vec![rejected.local_id(), offline.local_id()]);
    }

    #[tokio::test]
    async fn mock_remote_fetch() {
        let remote = MockRemote::new();
        assert!(remote.fetch_changes(None).await.is_err());

        let changes = RemoteChanges::empty(Utc::now(), user());
        remote.set_changes(changes.clone());
        let fetched = remote.fetch_changes(None).await.unwrap();
        assert_eq!(fetched.timestamp, changes.timestamp);
        assert_eq!(fetched.record_count(), 1);

        remote.fail_fetch_network();
        let err = remote.fetch_changes(None).await.unwrap_err();
        assert!(err.is_network_failure());
        assert_eq!(remote.fetch_count(), 3);
    }
}
