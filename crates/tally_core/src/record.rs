//! Syncable record model.
//!
//! Every record type carries a [`SyncMeta`] describing its synchronization
//! state and derives its dependencies from its foreign-key fields. The
//! [`Syncable`] trait is the capability the sync engine relies on; [`Record`]
//! is the heterogeneous container the store and the engine pass around.

use crate::id::{LocalId, RemoteId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Synchronization state shared by every record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Process-local identity.
    pub local_id: LocalId,
    /// Server identity, `None` until the server accepted a create.
    pub remote_id: Option<RemoteId>,
    /// Mutated locally since the last successful sync.
    pub dirty: bool,
    /// Local tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Server-side tombstone observed during a pull.
    pub remote_deleted_at: Option<DateTime<Utc>>,
    /// The server refused this record's payload.
    pub remote_rejected: bool,
    /// Last local modification.
    pub modified_at: DateTime<Utc>,
}

impl SyncMeta {
    /// Metadata for a record created on this device.
    #[must_use]
    pub fn new() -> Self {
        Self {
            local_id: LocalId::new(),
            remote_id: None,
            dirty: true,
            deleted_at: None,
            remote_deleted_at: None,
            remote_rejected: false,
            modified_at: Utc::now(),
        }
    }

    /// Metadata for a record received from the server.
    #[must_use]
    pub fn remote(remote_id: RemoteId) -> Self {
        Self {
            remote_id: Some(remote_id),
            dirty: false,
            ..Self::new()
        }
    }

    /// Records a local edit.
    ///
    /// A locally edited record gets another chance at the server, so the
    /// rejection flag is cleared.
    pub fn touch(&mut self) {
        self.dirty = true;
        self.remote_rejected = false;
        self.modified_at = Utc::now();
    }

    /// Tombstones the record locally.
    pub fn tombstone(&mut self) {
        self.deleted_at = Some(Utc::now());
        self.touch();
    }

    /// Returns true if the record has to be sent to the server.
    pub fn is_push_eligible(&self) -> bool {
        self.dirty || self.remote_id.is_none() || self.deleted_at.is_some()
    }

    /// Marks the record as in sync with the server.
    pub fn mark_synced(&mut self) {
        self.dirty = false;
        self.remote_rejected = false;
    }
}

impl Default for SyncMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// The type of a syncable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// Account owner.
    User,
    /// Workspace.
    Workspace,
    /// Workspace membership.
    WorkspaceUser,
    /// Tag.
    Tag,
    /// Client.
    Client,
    /// Project.
    Project,
    /// Project membership.
    ProjectUser,
    /// Task within a project.
    Task,
    /// Tracked time entry.
    TimeEntry,
}

impl RecordKind {
    /// Returns the display name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            RecordKind::User => "User",
            RecordKind::Workspace => "Workspace",
            RecordKind::WorkspaceUser => "WorkspaceUser",
            RecordKind::Tag => "Tag",
            RecordKind::Client => "Client",
            RecordKind::Project => "Project",
            RecordKind::ProjectUser => "ProjectUser",
            RecordKind::Task => "Task",
            RecordKind::TimeEntry => "TimeEntry",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capability implemented by every record eligible for synchronization.
pub trait Syncable {
    /// The record type.
    fn kind(&self) -> RecordKind;

    /// Synchronization state.
    fn meta(&self) -> &SyncMeta;

    /// Mutable synchronization state.
    fn meta_mut(&mut self) -> &mut SyncMeta;

    /// Local IDs of the records this one refers to.
    ///
    /// A dependency must exist on the server before this record can be pushed.
    fn dependencies(&self) -> Vec<LocalId>;

    /// Shorthand for the local ID.
    fn local_id(&self) -> LocalId {
        self.meta().local_id
    }

    /// Shorthand for the remote ID.
    fn remote_id(&self) -> Option<RemoteId> {
        self.meta().remote_id
    }
}

/// Account owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Sync state.
    pub meta: SyncMeta,
    /// Display name.
    pub name: String,
    /// Login e-mail.
    pub email: String,
}

/// Workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    /// Sync state.
    pub meta: SyncMeta,
    /// Workspace name.
    pub name: String,
}

/// Membership of a user in a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceUser {
    /// Sync state.
    pub meta: SyncMeta,
    /// Workspace side of the link.
    pub workspace_id: LocalId,
    /// User side of the link.
    pub user_id: LocalId,
    /// Whether the user administers the workspace.
    pub admin: bool,
}

/// Tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// Sync state.
    pub meta: SyncMeta,
    /// Owning workspace.
    pub workspace_id: LocalId,
    /// Tag label.
    pub name: String,
}

/// Client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    /// Sync state.
    pub meta: SyncMeta,
    /// Owning workspace.
    pub workspace_id: LocalId,
    /// Client name.
    pub name: String,
}

/// Project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Sync state.
    pub meta: SyncMeta,
    /// Owning workspace.
    pub workspace_id: LocalId,
    /// Optional client the project is billed to.
    pub client_id: Option<LocalId>,
    /// Project name.
    pub name: String,
    /// Whether the project is still active.
    pub active: bool,
}

/// Membership of a user in a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectUser {
    /// Sync state.
    pub meta: SyncMeta,
    /// Project side of the link.
    pub project_id: LocalId,
    /// User side of the link.
    pub user_id: LocalId,
    /// Whether the user manages the project.
    pub manager: bool,
}

/// Task within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Sync state.
    pub meta: SyncMeta,
    /// Owning workspace.
    pub workspace_id: LocalId,
    /// Owning project.
    pub project_id: LocalId,
    /// Task name.
    pub name: String,
}

/// Lifecycle of a time entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeEntryState {
    /// Drafted but not started; never pushed.
    New,
    /// Currently tracking.
    Running,
    /// Stopped.
    Finished,
}

/// Tracked time entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    /// Sync state.
    pub meta: SyncMeta,
    /// Owner.
    pub user_id: LocalId,
    /// Owning workspace.
    pub workspace_id: LocalId,
    /// Optional project.
    pub project_id: Option<LocalId>,
    /// Optional task.
    pub task_id: Option<LocalId>,
    /// Lifecycle state.
    pub state: TimeEntryState,
    /// Free-form description.
    pub description: String,
    /// Start of the tracked interval.
    pub start_time: DateTime<Utc>,
    /// End of the tracked interval, unset while running.
    pub stop_time: Option<DateTime<Utc>>,
    /// Billable flag.
    pub billable: bool,
    /// Tag labels.
    pub tags: Vec<String>,
}

/// A record of any syncable type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Record {
    /// See [`User`].
    User(User),
    /// See [`Workspace`].
    Workspace(Workspace),
    /// See [`WorkspaceUser`].
    WorkspaceUser(WorkspaceUser),
    /// See [`Tag`].
    Tag(Tag),
    /// See [`Client`].
    Client(Client),
    /// See [`Project`].
    Project(Project),
    /// See [`ProjectUser`].
    ProjectUser(ProjectUser),
    /// See [`Task`].
    Task(Task),
    /// See [`TimeEntry`].
    TimeEntry(TimeEntry),
}

macro_rules! impl_syncable {
    ($ty:ident, |$rec:ident| $deps:expr) => {
        impl Syncable for $ty {
            fn kind(&self) -> RecordKind {
                RecordKind::$ty
            }

            fn meta(&self) -> &SyncMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut SyncMeta {
                &mut self.meta
            }

            fn dependencies(&self) -> Vec<LocalId> {
                let $rec = self;
                $deps
            }
        }

        impl From<$ty> for Record {
            fn from(record: $ty) -> Self {
                Record::$ty(record)
            }
        }
    };
}

impl_syncable!(User, |_r| Vec::new());
impl_syncable!(Workspace, |_r| Vec::new());
impl_syncable!(WorkspaceUser, |r| vec![r.workspace_id, r.user_id]);
impl_syncable!(Tag, |r| vec![r.workspace_id]);
impl_syncable!(Client, |r| vec![r.workspace_id]);
impl_syncable!(Project, |r| {
    let mut deps = vec![r.workspace_id];
    deps.extend(r.client_id);
    deps
});
impl_syncable!(ProjectUser, |r| vec![r.project_id, r.user_id]);
impl_syncable!(Task, |r| vec![r.workspace_id, r.project_id]);
impl_syncable!(TimeEntry, |r| {
    let mut deps = vec![r.user_id, r.workspace_id];
    deps.extend(r.project_id);
    deps.extend(r.task_id);
    deps
});

macro_rules! dispatch {
    ($record:expr, |$inner:ident| $body:expr) => {
        match $record {
            Record::User($inner) => $body,
            Record::Workspace($inner) => $body,
            Record::WorkspaceUser($inner) => $body,
            Record::Tag($inner) => $body,
            Record::Client($inner) => $body,
            Record::Project($inner) => $body,
            Record::ProjectUser($inner) => $body,
            Record::Task($inner) => $body,
            Record::TimeEntry($inner) => $body,
        }
    };
}

impl Syncable for Record {
    fn kind(&self) -> RecordKind {
        dispatch!(self, |r| r.kind())
    }

    fn meta(&self) -> &SyncMeta {
        dispatch!(self, |r| &r.meta)
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        dispatch!(self, |r| &mut r.meta)
    }

    fn dependencies(&self) -> Vec<LocalId> {
        dispatch!(self, |r| r.dependencies())
    }
}

impl Record {
    /// Returns the time entry inside, if this is one.
    pub fn as_time_entry(&self) -> Option<&TimeEntry> {
        match self {
            Record::TimeEntry(entry) => Some(entry),
            _ => None,
        }
    }

    /// Human-readable `Kind#id` label, preferring the remote ID.
    pub fn label(&self) -> String {
        match self.remote_id() {
            Some(remote_id) => format!("{}#{}", self.kind(), remote_id),
            None => format!("{}#{}", self.kind(), self.local_id()),
        }
    }
}
