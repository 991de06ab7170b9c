//! Sync manager state machine.
//!
//! ```text
//!            run(mode)                                  guard dropped
//!   Idle ──────────────► Running ─► resolve ─► purge ─► pull ─► push ──────────────► Idle
//!     │  not signed in,                                                 (flag reset,
//!     │  already running,                                                trigger reattached,
//!     └─ or offline: no-op                                               Finished published)
//! ```
//!
//! At most one run is active per manager. While a run is active the manager
//! does not listen to the store's commit feed, so its own commits never
//! schedule another run.

use crate::auth::AuthProvider;
use crate::config::SyncConfig;
use crate::error::{FailureKind, SyncError, SyncResult};
use crate::events::{FinishNotice, SyncEvent};
use crate::graph::DependencyGraph;
use crate::mode::SyncMode;
use crate::network::NetworkPresence;
use crate::push::{push_record, record_failure};
use crate::transport::RemoteClient;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tally_core::{
    EventFeed, LocalId, ProjectUser, Record, RecordKind, RecordStore, SettingsStore,
    SubscriptionId, SyncMeta, Syncable, TimeEntryState, WorkspaceUser,
};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Record kinds sent to the server, in query order.
pub const PUSH_KINDS: [RecordKind; 8] = [
    RecordKind::Workspace,
    RecordKind::WorkspaceUser,
    RecordKind::Tag,
    RecordKind::Client,
    RecordKind::Project,
    RecordKind::ProjectUser,
    RecordKind::Task,
    RecordKind::TimeEntry,
];

/// The current state of the sync manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No run active.
    Idle,
    /// A run is active.
    Running,
}

/// Cumulative statistics across runs.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs that finished without errors.
    pub runs_succeeded: u64,
    /// Runs that finished with errors.
    pub runs_failed: u64,
    /// Records received by pulls.
    pub records_pulled: u64,
    /// Records successfully pushed.
    pub records_pushed: u64,
    /// Records dropped from a push phase without being attempted.
    pub records_pruned: u64,
    /// When the last run finished.
    pub last_finished: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of a single run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Resolved mode.
    pub mode: SyncMode,
    /// Time entries purged from local history.
    pub purged: usize,
    /// Records received from the server.
    pub pulled: usize,
    /// Records pushed successfully.
    pub pushed: usize,
    /// Push attempts that failed.
    pub failed: usize,
    /// Records skipped because they, or a record they depend on, failed.
    pub pruned: usize,
    /// Whether anything failed.
    pub has_errors: bool,
    /// The error that ended the run early, if any.
    pub error: Option<Arc<SyncError>>,
}

impl SyncReport {
    fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            purged: 0,
            pulled: 0,
            pushed: 0,
            failed: 0,
            pruned: 0,
            has_errors: false,
            error: None,
        }
    }
}

/// Collaborators the manager works against.
#[derive(Clone)]
pub struct SyncServices {
    /// Local records.
    pub store: Arc<dyn RecordStore>,
    /// Server API.
    pub remote: Arc<dyn RemoteClient>,
    /// Connectivity.
    pub network: Arc<dyn NetworkPresence>,
    /// Signed-in user.
    pub auth: Arc<dyn AuthProvider>,
    /// Durable settings holding the pull watermark.
    pub settings: Arc<dyn SettingsStore>,
}

#[derive(Debug, Default)]
struct Trigger {
    /// The application asked for commit-triggered runs.
    enabled: bool,
    /// Live subscription on the store's commit feed.
    subscription: Option<SubscriptionId>,
}

/// Coordinates pull and push runs against the server.
pub struct SyncManager {
    config: SyncConfig,
    services: SyncServices,
    events: EventFeed<SyncEvent>,
    running: AtomicBool,
    trigger: Mutex<Trigger>,
    stats: RwLock<SyncStats>,
    this: Weak<SyncManager>,
}

/// Holds the run lock; releases it and reattaches the commit trigger on drop.
struct RunGuard {
    manager: Arc<SyncManager>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.manager.running.store(false, Ordering::SeqCst);
        self.manager.resume_trigger();
    }
}

impl SyncManager {
    /// Creates a new sync manager.
    pub fn new(config: SyncConfig, services: SyncServices) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            services,
            events: EventFeed::new(),
            running: AtomicBool::new(false),
            trigger: Mutex::new(Trigger::default()),
            stats: RwLock::new(SyncStats::default()),
            this: this.clone(),
        })
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        if self.is_running() {
            SyncState::Running
        } else {
            SyncState::Idle
        }
    }

    /// Returns true while a run is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Server timestamp of the last successful pull.
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.services.settings.sync_last_run()
    }

    /// Feed of [`SyncEvent`]s.
    pub fn events(&self) -> &EventFeed<SyncEvent> {
        &self.events
    }

    /// Reacts to a sign-in state change.
    ///
    /// Signing out forgets the pull watermark so the next user starts with
    /// a full fetch.
    pub fn handle_auth_changed(&self, authenticated: bool) {
        if !authenticated {
            tracing::info!("signed out, resetting sync watermark");
            self.services.settings.set_sync_last_run(None);
        }
    }

    /// Starts a run in the background.
    ///
    /// Returns `None` without doing anything if nobody is signed in, a run
    /// is already active, or the network is absent (in which case a run is
    /// requested for when it returns). Must be called within a tokio
    /// runtime.
    pub fn run(&self, mode: SyncMode) -> Option<JoinHandle<SyncReport>> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "sync requested outside of a runtime");
                return None;
            }
        };
        let guard = self.try_start()?;
        Some(handle.spawn(async move {
            let manager = Arc::clone(&guard.manager);
            let report = manager.run_in_background(mode).await;
            drop(guard);
            report
        }))
    }

    /// Runs on the current task and waits for the outcome.
    ///
    /// Same preconditions as [`run`](Self::run).
    pub async fn sync(&self, mode: SyncMode) -> Option<SyncReport> {
        let guard = self.try_start()?;
        let report = self.run_in_background(mode).await;
        drop(guard);
        Some(report)
    }

    /// Starts listening to the store's commits; each one requests an
    /// automatic run. Must be called within a tokio runtime.
    pub fn attach_trigger(&self) {
        let mut trigger = self.trigger.lock();
        trigger.enabled = true;
        if trigger.subscription.is_none() && !self.is_running() {
            self.subscribe_trigger(&mut trigger);
        }
    }

    /// Stops listening to the store's commits.
    pub fn detach_trigger(&self) {
        let mut trigger = self.trigger.lock();
        trigger.enabled = false;
        if let Some(id) = trigger.subscription.take() {
            self.services.store.commits().unsubscribe(id);
        }
    }

    fn subscribe_trigger(&self, trigger: &mut Trigger) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen to commits outside of a runtime");
                return;
            }
        };
        let mut subscription = self.services.store.commits().subscribe();
        trigger.subscription = Some(subscription.id());

        let this = self.this.clone();
        handle.spawn(async move {
            while subscription.recv().await.is_some() {
                let Some(manager) = this.upgrade() else {
                    break;
                };
                manager.run(SyncMode::Auto);
            }
        });
    }

    fn suspend_trigger(&self) {
        let mut trigger = self.trigger.lock();
        if let Some(id) = trigger.subscription.take() {
            self.services.store.commits().unsubscribe(id);
        }
    }

    /// Re-subscribes unless another run took the lock in the meantime; that
    /// run resumes the trigger when it ends.
    fn resume_trigger(&self) {
        let mut trigger = self.trigger.lock();
        if trigger.enabled && trigger.subscription.is_none() && !self.is_running() {
            self.subscribe_trigger(&mut trigger);
        }
    }

    /// Checks preconditions and takes the run lock.
    fn try_start(&self) -> Option<RunGuard> {
        if !self.services.auth.is_authenticated() {
            tracing::debug!("not signed in, skipping sync");
            return None;
        }
        if self.is_running() {
            tracing::debug!("sync already running");
            return None;
        }

        let network = &self.services.network;
        if !network.is_network_present() {
            tracing::info!("network absent, deferring sync");
            network.register_sync_when_network_present();
            return None;
        }
        network.unregister_sync_when_network_present();

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("sync already running");
            return None;
        }
        let Some(manager) = self.this.upgrade() else {
            self.running.store(false, Ordering::SeqCst);
            return None;
        };

        self.suspend_trigger();
        Some(RunGuard { manager })
    }

    async fn run_in_background(&self, mode: SyncMode) -> SyncReport {
        let last_run = self.services.settings.sync_last_run();
        let mode = mode.resolve(last_run, Utc::now(), self.config.auto_push_window);

        tracing::info!(%mode, "sync started");
        self.events.emit(SyncEvent::Started { mode });
        let notice = FinishNotice::new(&self.events, mode);

        let mut report = SyncReport::new(mode);
        if let Err(e) = self.run_phases(mode, last_run, &mut report).await {
            match e.failure_kind() {
                FailureKind::Network => {
                    tracing::info!(%mode, error = %e, "sync failed, retrying when online");
                    self.services.network.register_sync_when_network_present();
                }
                _ => tracing::warn!(%mode, error = %e, "sync failed"),
            }
            report.has_errors = true;
            report.error = Some(Arc::new(e));
        }

        tracing::info!(
            %mode,
            pulled = report.pulled,
            pushed = report.pushed,
            failed = report.failed,
            pruned = report.pruned,
            has_errors = report.has_errors,
            "sync finished"
        );
        self.record_stats(&report);
        notice.complete(report.has_errors, report.error.clone());
        report
    }

    async fn run_phases(
        &self,
        mode: SyncMode,
        last_run: Option<DateTime<Utc>>,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        if mode == SyncMode::Full {
            report.purged = self.purge_history();
        }
        if mode.includes_pull() {
            report.pulled = self.pull(last_run).await?;
        }
        if mode.includes_push() {
            self.push(report).await;
        }
        Ok(())
    }

    /// Drops old synced time entries from local history.
    ///
    /// The newest `purge_keep` entries are kept; at most `purge_batch`
    /// older ones go per run. Staged only: the pull commit persists it.
    fn purge_history(&self) -> usize {
        let mut candidates: Vec<(DateTime<Utc>, LocalId)> = self
            .services
            .store
            .query(&|r| {
                let meta = r.meta();
                r.kind() == RecordKind::TimeEntry
                    && ((!meta.dirty && meta.remote_id.is_some())
                        || (meta.remote_id.is_none() && meta.deleted_at.is_some()))
            })
            .iter()
            .filter_map(|r| r.as_time_entry())
            .map(|entry| (entry.start_time, entry.meta.local_id))
            .collect();
        candidates.sort_by(|a, b| b.cmp(a));

        let mut purged = 0;
        for (_, id) in candidates
            .into_iter()
            .skip(self.config.purge_keep)
            .take(self.config.purge_batch)
        {
            self.services.store.discard(id);
            purged += 1;
        }
        if purged > 0 {
            tracing::debug!(purged, "purged time entry history");
        }
        purged
    }

    /// Fetches remote changes and advances the watermark once they are
    /// committed.
    async fn pull(&self, last_run: Option<DateTime<Utc>>) -> SyncResult<usize> {
        let changes = self.services.remote.fetch_changes(last_run).await?;
        let count = changes.record_count();
        let user_id = changes.user.meta.local_id;

        self.apply_fetched(changes.user.into());
        for workspace in changes.workspaces {
            let workspace_id = workspace.meta.local_id;
            if self.apply_fetched(workspace.into()) {
                self.ensure_workspace_member(workspace_id, user_id);
            }
        }
        for tag in changes.tags {
            self.apply_fetched(tag.into());
        }
        for client in changes.clients {
            self.apply_fetched(client.into());
        }
        for project in changes.projects {
            let project_id = project.meta.local_id;
            if self.apply_fetched(project.into()) {
                self.ensure_project_member(project_id, user_id);
            }
        }
        for task in changes.tasks {
            self.apply_fetched(task.into());
        }
        for entry in changes.time_entries {
            self.apply_fetched(entry.into());
        }

        if !self.services.store.try_commit() {
            return Err(SyncError::CommitFailed { phase: "pull" });
        }
        self.services
            .settings
            .set_sync_last_run(Some(changes.timestamp));
        tracing::debug!(count, watermark = %changes.timestamp, "pull committed");
        Ok(count)
    }

    /// Stores a fetched record, or drops it if the server deleted it.
    ///
    /// Returns true if the record is live.
    fn apply_fetched(&self, record: Record) -> bool {
        if record.meta().remote_deleted_at.is_some() {
            self.services.store.discard(record.local_id());
            return false;
        }
        self.services.store.put(record);
        true
    }

    fn ensure_workspace_member(&self, workspace_id: LocalId, user_id: LocalId) {
        let existing = self.services.store.query(&|r| match r {
            Record::WorkspaceUser(m) => m.workspace_id == workspace_id && m.user_id == user_id,
            _ => false,
        });
        if existing.is_empty() {
            self.services.store.put(Record::from(WorkspaceUser {
                meta: placeholder_meta(),
                workspace_id,
                user_id,
                admin: false,
            }));
        }
    }

    fn ensure_project_member(&self, project_id: LocalId, user_id: LocalId) {
        let existing = self.services.store.query(&|r| match r {
            Record::ProjectUser(m) => m.project_id == project_id && m.user_id == user_id,
            _ => false,
        });
        if existing.is_empty() {
            self.services.store.put(Record::from(ProjectUser {
                meta: placeholder_meta(),
                project_id,
                user_id,
                manager: false,
            }));
        }
    }

    /// Collects every record the server has to hear about.
    fn pending_records(&self) -> Vec<Record> {
        let user_id = self.services.auth.user_id();
        let store = &self.services.store;
        PUSH_KINDS
            .iter()
            .flat_map(|kind| {
                store.query(&|r| {
                    r.kind() == *kind && r.meta().is_push_eligible() && accepts_push(r, user_id)
                })
            })
            .collect()
    }

    /// Pushes dirty records wave by wave in dependency order.
    async fn push(&self, report: &mut SyncReport) {
        let mut graph = DependencyGraph::from_nodes(self.pending_records());
        tracing::debug!(records = graph.len(), "push phase started");

        let remote = self.services.remote.as_ref();
        let store = self.services.store.as_ref();
        loop {
            let ready = graph.ready_keys();
            if ready.is_empty() {
                if !graph.is_empty() {
                    let e = SyncError::Stalled {
                        remaining: graph.len(),
                    };
                    tracing::warn!(error = %e, "dependency cycle in push queue");
                    report.has_errors = true;
                }
                break;
            }
            let before = graph.len();

            let mut wave = Vec::with_capacity(ready.len());
            for key in &ready {
                let Some(record) = graph.get(key) else {
                    continue;
                };
                if record.meta().remote_rejected {
                    // Rejected earlier in this session and not edited since.
                    report.pruned += if record.remote_id().is_none() {
                        graph.remove_branch(key).len()
                    } else {
                        usize::from(graph.remove(key).is_some())
                    };
                } else {
                    wave.push(record.clone());
                }
            }

            if !wave.is_empty() {
                tracing::debug!(size = wave.len(), remaining = graph.len(), "pushing wave");
                let results = join_all(wave.iter().map(|r| push_record(remote, store, r))).await;

                for (record, result) in wave.iter().zip(results) {
                    let key = record.local_id();
                    match result {
                        Ok(()) => {
                            graph.remove(&key);
                            report.pushed += 1;
                        }
                        Err(e) => {
                            record_failure(store, record, &e);
                            report.failed += 1;
                            report.has_errors = true;
                            if record.remote_id().is_none() {
                                // Nothing depending on a record the server never created can succeed.
                                let branch = graph.remove_branch(&key);
                                report.pruned += branch.len().saturating_sub(1);
                            } else {
                                graph.remove(&key);
                            }
                        }
                    }
                }
            }

            if graph.len() >= before {
                let e = SyncError::Stalled {
                    remaining: graph.len(),
                };
                tracing::warn!(error = %e, "push wave made no progress");
                report.has_errors = true;
                break;
            }
        }

        if !store.try_commit() {
            let e = SyncError::CommitFailed { phase: "push" };
            tracing::warn!(error = %e, "push results not persisted");
            report.has_errors = true;
        }
    }

    fn record_stats(&self, report: &SyncReport) {
        let mut stats = self.stats.write();
        if report.has_errors {
            stats.runs_failed += 1;
        } else {
            stats.runs_succeeded += 1;
        }
        stats.records_pulled += report.pulled as u64;
        stats.records_pushed += report.pushed as u64;
        stats.records_pruned += report.pruned as u64;
        stats.last_finished = Some(Utc::now());
        stats.last_error = report.error.as_ref().map(|e| e.to_string());
    }
}

/// Metadata for a membership row assumed locally after a pull.
fn placeholder_meta() -> SyncMeta {
    SyncMeta {
        dirty: false,
        ..SyncMeta::new()
    }
}

/// Per-kind push filter.
///
/// Membership rows for the signed-in user that the server never confirmed
/// are local assumptions and are not sent. Time entries are sent only for
/// the signed-in user and only once started.
fn accepts_push(record: &Record, user_id: Option<LocalId>) -> bool {
    match record {
        Record::User(_) => false,
        Record::WorkspaceUser(m) => m.meta.remote_id.is_some() || Some(m.user_id) != user_id,
        Record::ProjectUser(m) => m.meta.remote_id.is_some() || Some(m.user_id) != user_id,
        Record::TimeEntry(entry) => {
            Some(entry.user_id) == user_id && entry.state != TimeEntryState::New
        }
        _ => true,
    }
}
