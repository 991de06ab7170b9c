//! # Tally Core
//!
//! Local data model for the Tally time-tracking client.
//!
//! This crate provides:
//! - Syncable record types and the [`Syncable`] capability
//! - Local and remote record identifiers
//! - The [`RecordStore`] contract and an in-memory store
//! - Persisted settings (the sync watermark)
//! - A publish/subscribe [`EventFeed`]
//!
//! ## Key Invariants
//!
//! - A record with a remote ID has been accepted by the server at least once
//! - A record is eligible for push iff it is dirty, has no remote ID, or is tombstoned
//! - Store mutations are visible immediately and durable only after a commit
//! - Commit events are emitted only after a successful commit

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod feed;
mod id;
mod record;
mod settings;
mod store;

pub use error::{CoreError, CoreResult};
pub use feed::{EventFeed, Subscription, SubscriptionId};
pub use id::{LocalId, RemoteId};
pub use record::{
    Client, Project, ProjectUser, Record, RecordKind, SyncMeta, Syncable, Tag, Task, TimeEntry,
    TimeEntryState, User, Workspace, WorkspaceUser,
};
pub use settings::{JsonFileSettings, MemorySettings, SettingsStore};
pub use store::{CommitEvent, MemoryStore, RecordStore};
