//! Record builders and a wired-up sync manager.
//!
//! Builders create records the way the application does on this device:
//! dirty, without a remote ID. Use [`synced`] to turn one into a record
//! the server already knows.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tally_core::{
    Client, LocalId, MemorySettings, MemoryStore, Project, ProjectUser, Record, RecordStore,
    RemoteId, SyncMeta, Syncable, Tag, Task, TimeEntry, TimeEntryState, User, Workspace,
    WorkspaceUser,
};
use tally_sync_engine::{
    MockNetwork, MockRemote, RemoteChanges, StaticAuth, SyncConfig, SyncManager, SyncServices,
};

/// A remote user, as returned by the server.
pub fn user(name: &str) -> User {
    User {
        meta: SyncMeta::remote(RemoteId::new(1)),
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
    }
}

/// A new workspace.
pub fn workspace(name: &str) -> Record {
    Record::from(Workspace {
        meta: SyncMeta::new(),
        name: name.to_string(),
    })
}

/// A new workspace membership.
pub fn workspace_user(workspace_id: LocalId, user_id: LocalId) -> Record {
    Record::from(WorkspaceUser {
        meta: SyncMeta::new(),
        workspace_id,
        user_id,
        admin: false,
    })
}

/// A new tag.
pub fn tag(workspace_id: LocalId, name: &str) -> Record {
    Record::from(Tag {
        meta: SyncMeta::new(),
        workspace_id,
        name: name.to_string(),
    })
}

/// A new client.
pub fn client(workspace_id: LocalId, name: &str) -> Record {
    Record::from(Client {
        meta: SyncMeta::new(),
        workspace_id,
        name: name.to_string(),
    })
}

/// A new project without a client.
pub fn project(workspace_id: LocalId, name: &str) -> Record {
    Record::from(Project {
        meta: SyncMeta::new(),
        workspace_id,
        client_id: None,
        name: name.to_string(),
        active: true,
    })
}

/// A new project membership.
pub fn project_user(project_id: LocalId, user_id: LocalId) -> Record {
    Record::from(ProjectUser {
        meta: SyncMeta::new(),
        project_id,
        user_id,
        manager: false,
    })
}

/// A new task.
pub fn task(workspace_id: LocalId, project_id: LocalId, name: &str) -> Record {
    Record::from(Task {
        meta: SyncMeta::new(),
        workspace_id,
        project_id,
        name: name.to_string(),
    })
}

/// A new finished time entry.
pub fn time_entry(user_id: LocalId, workspace_id: LocalId, start_time: DateTime<Utc>) -> Record {
    Record::from(TimeEntry {
        meta: SyncMeta::new(),
        user_id,
        workspace_id,
        project_id: None,
        task_id: None,
        state: TimeEntryState::Finished,
        description: String::new(),
        start_time,
        stop_time: Some(start_time + Duration::minutes(30)),
        billable: false,
        tags: Vec::new(),
    })
}

/// Marks a record as accepted by the server and unchanged since.
pub fn synced(mut record: Record, remote_id: u64) -> Record {
    let meta = record.meta_mut();
    meta.remote_id = Some(RemoteId::new(remote_id));
    meta.dirty = false;
    record
}

/// A sync manager wired to in-memory collaborators.
pub struct TestHarness {
    /// The signed-in user.
    pub user: User,
    /// Local store.
    pub store: Arc<MemoryStore>,
    /// Scriptable server.
    pub remote: Arc<MockRemote>,
    /// Connectivity switch.
    pub network: Arc<MockNetwork>,
    /// Sign-in state.
    pub auth: Arc<StaticAuth>,
    /// Watermark storage.
    pub settings: Arc<MemorySettings>,
    /// The manager under test.
    pub manager: Arc<SyncManager>,
}

impl TestHarness {
    /// Creates a harness with default configuration, online and signed in.
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    /// Creates a harness with the given configuration.
    pub fn with_config(config: SyncConfig) -> Self {
        let user = user("Ada");
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        remote.set_changes(RemoteChanges::empty(Utc::now(), user.clone()));
        let network = Arc::new(MockNetwork::online());
        let auth = Arc::new(StaticAuth::signed_in(user.meta.local_id));
        let settings = Arc::new(MemorySettings::new());

        let manager = SyncManager::new(
            config,
            SyncServices {
                store: store.clone(),
                remote: remote.clone(),
                network: network.clone(),
                auth: auth.clone(),
                settings: settings.clone(),
            },
        );

        Self {
            user,
            store,
            remote,
            network,
            auth,
            settings,
            manager,
        }
    }

    /// The signed-in user's local ID.
    pub fn user_id(&self) -> LocalId {
        self.user.meta.local_id
    }

    /// Stores and commits records.
    pub fn seed(&self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.store.put(record);
        }
        self.store.try_commit();
    }

    /// Replaces the server's change set with an empty one at `timestamp`.
    pub fn server_time(&self, timestamp: DateTime<Utc>) -> RemoteChanges {
        let changes = RemoteChanges::empty(timestamp, self.user.clone());
        self.remote.set_changes(changes.clone());
        changes
    }

    /// The committed version of a record.
    pub fn committed(&self, record: &Record) -> Option<Record> {
        self.store.committed(record.local_id())
    }

    /// Waits until no run is active, polling every few milliseconds.
    ///
    /// Returns false if a run is still active after `timeout`.
    pub async fn wait_idle(&self, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.manager.is_running() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        true
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
