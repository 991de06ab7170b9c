//! # Tally Sync Engine
//!
//! Keeps the local record store and the server in agreement.
//!
//! This crate provides:
//! - Sync mode resolution (pull, push, full, auto)
//! - A dependency graph that orders pushes parents-first
//! - The [`SyncManager`] orchestrating purge, pull and push
//! - Per-record push with failure classification
//! - Collaborator traits for the remote API, connectivity and sign-in state
//!
//! ## Architecture
//!
//! A run pulls first and pushes second:
//! 1. Fetch everything changed since the last successful pull
//! 2. Commit it locally, then advance the watermark
//! 3. Push dirty records in waves, each wave concurrent, waves in dependency order
//!
//! ## Key Invariants
//!
//! - At most one run is active per manager
//! - The watermark advances only after pulled data is committed
//! - A record is never pushed before the records it depends on
//! - A record whose creation failed takes its dependents out of the run
//! - Every `Started` event is followed by exactly one `Finished`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod error;
mod events;
mod graph;
mod manager;
mod mode;
mod network;
mod push;
mod transport;

pub use auth::{AuthProvider, StaticAuth};
pub use config::SyncConfig;
pub use error::{FailureKind, SyncError, SyncResult};
pub use events::SyncEvent;
pub use graph::{DependencyGraph, GraphNode};
pub use manager::{SyncManager, SyncReport, SyncServices, SyncState, SyncStats, PUSH_KINDS};
pub use mode::SyncMode;
pub use network::{MockNetwork, NetworkPresence};
pub use push::PushAction;
pub use transport::{MockRemote, RemoteCall, RemoteChanges, RemoteClient};
