//! Integration tests for the sync manager against in-memory collaborators.

use chrono::{Duration, Utc};
use std::time::Duration as StdDuration;
use tally_testkit::prelude::*;

fn position(pushed: &[LocalId], record: &Record) -> usize {
    pushed
        .iter()
        .position(|id| *id == record.local_id())
        .unwrap_or_else(|| panic!("{} was not pushed", record.label()))
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    condition()
}

// ============================================================================
// Run preconditions
// ============================================================================

#[tokio::test]
async fn offline_run_registers_for_network() {
    init_tracing();
    let harness = TestHarness::new();
    harness.network.set_present(false);

    assert!(harness.manager.run(SyncMode::Full).is_none());
    assert!(harness.manager.sync(SyncMode::Full).await.is_none());

    assert!(!harness.manager.is_running());
    assert!(harness.network.is_registered());
    assert_eq!(harness.network.register_calls(), 2);
    assert!(harness.remote.calls().is_empty());
}

#[tokio::test]
async fn network_return_clears_registration() {
    let harness = TestHarness::new();
    harness.network.set_present(false);
    harness.manager.sync(SyncMode::Full).await;
    assert_eq!(harness.network.register_calls(), 1);

    harness.network.set_present(true);
    harness.manager.sync(SyncMode::Full).await.unwrap();
    assert!(!harness.network.is_registered());
    assert_eq!(harness.network.unregister_calls(), 1);
}

#[tokio::test]
async fn back_to_back_runs_execute_once() {
    let harness = TestHarness::new();

    let first = harness.manager.run(SyncMode::Full).expect("first run starts");
    assert!(harness.manager.is_running());
    assert_eq!(harness.manager.state(), SyncState::Running);
    assert!(harness.manager.run(SyncMode::Full).is_none());
    assert!(harness.manager.sync(SyncMode::Pull).await.is_none());

    let report = first.await.unwrap();
    assert!(!report.has_errors);
    assert_eq!(harness.remote.fetch_count(), 1);
    assert!(!harness.manager.is_running());

    // The lock is released afterwards.
    assert!(harness.manager.sync(SyncMode::Pull).await.is_some());
}

#[tokio::test]
async fn signed_out_runs_are_noops() {
    let harness = TestHarness::new();
    harness.auth.sign_out();

    assert!(harness.manager.sync(SyncMode::Full).await.is_none());
    assert!(harness.remote.calls().is_empty());
    assert_eq!(harness.network.unregister_calls(), 0);
}

#[tokio::test]
async fn logout_resets_watermark() {
    let harness = TestHarness::new();
    harness.manager.sync(SyncMode::Full).await.unwrap();
    assert!(harness.manager.last_run().is_some());

    harness.auth.sign_out();
    harness.manager.handle_auth_changed(false);
    assert!(harness.manager.last_run().is_none());

    harness.auth.sign_in(harness.user_id());
    harness.manager.handle_auth_changed(true);
    harness.manager.sync(SyncMode::Pull).await.unwrap();
    assert_eq!(harness.remote.calls().last(), Some(&RemoteCall::Fetch(None)));
}

// ============================================================================
// Mode resolution
// ============================================================================

#[tokio::test]
async fn auto_with_recent_pull_only_pushes() {
    let harness = TestHarness::new();
    harness
        .settings
        .set_sync_last_run(Some(Utc::now() - Duration::minutes(1)));

    let report = harness.manager.sync(SyncMode::Auto).await.unwrap();
    assert_eq!(report.mode, SyncMode::Push);
    assert_eq!(harness.remote.fetch_count(), 0);
}

#[tokio::test]
async fn auto_with_stale_pull_runs_full() {
    let harness = TestHarness::new();
    let last_run = Utc::now() - Duration::minutes(10);
    harness.settings.set_sync_last_run(Some(last_run));

    let report = harness.manager.sync(SyncMode::Auto).await.unwrap();
    assert_eq!(report.mode, SyncMode::Full);
    assert_eq!(harness.remote.calls()[0], RemoteCall::Fetch(Some(last_run)));
}

#[tokio::test]
async fn auto_without_watermark_runs_full() {
    let harness = TestHarness::new();
    let report = harness.manager.sync(SyncMode::Auto).await.unwrap();
    assert_eq!(report.mode, SyncMode::Full);
    assert_eq!(harness.remote.calls()[0], RemoteCall::Fetch(None));
}

// ============================================================================
// Pull
// ============================================================================

#[tokio::test]
async fn empty_pull_advances_watermark_to_server_time() {
    let harness = TestHarness::new();
    let server_time = Utc::now() - Duration::seconds(42);
    harness.server_time(server_time);

    let report = harness.manager.sync(SyncMode::Pull).await.unwrap();
    assert!(!report.has_errors);
    assert_eq!(harness.manager.last_run(), Some(server_time));
}

#[tokio::test]
async fn failed_pull_commit_keeps_watermark_and_skips_push() {
    let harness = TestHarness::new();
    let before = Utc::now() - Duration::days(2);
    harness.settings.set_sync_last_run(Some(before));
    harness.seed(vec![workspace("Acme")]);
    harness.store.set_fail_commits(true);

    let report = harness.manager.sync(SyncMode::Full).await.unwrap();
    assert!(report.has_errors);
    assert_eq!(harness.manager.last_run(), Some(before));
    assert!(harness.remote.pushed_ids().is_empty());
    assert!(!harness.manager.is_running());
}

#[tokio::test]
async fn pulled_records_are_committed_clean() {
    let harness = TestHarness::new();
    let ws = Workspace {
        meta: SyncMeta::remote(RemoteId::new(10)),
        name: "Remote".into(),
    };
    let project = Project {
        meta: SyncMeta::remote(RemoteId::new(11)),
        workspace_id: ws.meta.local_id,
        client_id: None,
        name: "Site".into(),
        active: true,
    };
    let mut changes = harness.server_time(Utc::now());
    changes.workspaces.push(ws.clone());
    changes.projects.push(project.clone());
    harness.remote.set_changes(changes);

    let report = harness.manager.sync(SyncMode::Full).await.unwrap();
    assert_eq!(report.pulled, 3);
    assert_eq!(report.pushed, 0);

    let stored = harness.store.committed(project.meta.local_id).unwrap();
    assert!(!stored.meta().dirty);
    // Local memberships for the pulled workspace and project.
    let memberships = harness.store.query(&|r| {
        matches!(r.kind(), RecordKind::WorkspaceUser | RecordKind::ProjectUser)
    });
    assert_eq!(memberships.len(), 2);
}

#[tokio::test]
async fn network_failure_during_fetch_registers_once() {
    let harness = TestHarness::new();
    harness.remote.fail_fetch_network();

    let report = harness.manager.sync(SyncMode::Full).await.unwrap();
    assert!(report.has_errors);
    assert!(report.error.as_deref().is_some_and(SyncError::is_network_failure));
    assert_eq!(harness.network.register_calls(), 1);
    assert!(harness.manager.last_run().is_none());
}

#[tokio::test]
async fn server_failure_during_fetch_does_not_register() {
    let harness = TestHarness::new();
    harness.remote.fail_fetch_server();

    let report = harness.manager.sync(SyncMode::Full).await.unwrap();
    assert!(report.has_errors);
    assert_eq!(harness.network.register_calls(), 0);
}

// ============================================================================
// Push
// ============================================================================

#[tokio::test]
async fn parents_are_pushed_before_children() {
    let harness = TestHarness::new();
    let ws = workspace("Acme");
    let project = project(ws.local_id(), "Site");
    let task = task(ws.local_id(), project.local_id(), "Design");
    let mut entry = time_entry(harness.user_id(), ws.local_id(), Utc::now());
    if let Record::TimeEntry(e) = &mut entry {
        e.project_id = Some(project.local_id());
        e.task_id = Some(task.local_id());
    }
    harness.seed(vec![entry.clone(), task.clone(), project.clone(), ws.clone()]);

    let report = harness.manager.sync(SyncMode::Push).await.unwrap();
    assert!(!report.has_errors);
    assert_eq!(report.pushed, 4);

    let pushed = harness.remote.pushed_ids();
    assert!(position(&pushed, &ws) < position(&pushed, &project));
    assert!(position(&pushed, &project) < position(&pushed, &task));
    assert!(position(&pushed, &task) < position(&pushed, &entry));

    for record in [&ws, &project, &task, &entry] {
        let stored = harness.committed(record).unwrap();
        assert!(stored.remote_id().is_some());
        assert!(!stored.meta().dirty);
    }
}

#[tokio::test]
async fn rejected_creation_prunes_dependents() {
    let harness = TestHarness::new();
    let ws = workspace("Acme");
    let project = project(ws.local_id(), "Site");
    let task = task(ws.local_id(), project.local_id(), "Design");
    let tag = tag(ws.local_id(), "billable");
    harness.seed(vec![ws.clone(), project.clone(), task.clone(), tag.clone()]);
    harness.remote.reject(project.local_id());

    let report = harness.manager.sync(SyncMode::Push).await.unwrap();
    assert!(report.has_errors);
    assert_eq!(report.failed, 1);
    assert_eq!(report.pruned, 1);

    let pushed = harness.remote.pushed_ids();
    assert!(pushed.contains(&tag.local_id()));
    assert!(!pushed.contains(&task.local_id()));

    let stored = harness.committed(&project).unwrap();
    assert!(stored.meta().remote_rejected);
    assert!(stored.meta().dirty);
    assert!(harness.committed(&task).unwrap().meta().dirty);
}

#[tokio::test]
async fn network_failure_on_creation_prunes_dependents() {
    let harness = TestHarness::new();
    let ws = workspace("Acme");
    let project = project(ws.local_id(), "Site");
    let task = task(ws.local_id(), project.local_id(), "Design");
    harness.seed(vec![ws.clone(), project.clone(), task.clone()]);
    harness.remote.fail_network(project.local_id());

    let report = harness.manager.sync(SyncMode::Push).await.unwrap();
    assert!(report.has_errors);
    assert_eq!(report.failed, 1);
    assert_eq!(report.pruned, 1);
    assert!(!harness.remote.pushed_ids().contains(&task.local_id()));

    let stored = harness.committed(&project).unwrap();
    assert!(stored.meta().dirty);
    assert!(!stored.meta().remote_rejected);
    assert!(harness.committed(&task).unwrap().meta().dirty);
    assert_eq!(harness.network.register_calls(), 0);
}

#[tokio::test]
async fn failed_update_does_not_prune_dependents() {
    let harness = TestHarness::new();
    let ws = synced(workspace("Acme"), 5);
    let mut project = synced(project(ws.local_id(), "Site"), 6);
    project.meta_mut().touch();
    let task = task(ws.local_id(), project.local_id(), "Design");
    harness.seed(vec![ws, project.clone(), task.clone()]);
    harness.remote.fail_server(project.local_id());

    let report = harness.manager.sync(SyncMode::Push).await.unwrap();
    assert!(report.has_errors);
    assert_eq!(report.pushed, 1);
    assert_eq!(
        harness.remote.calls(),
        vec![
            RemoteCall::Update(project.local_id()),
            RemoteCall::Create(task.local_id()),
        ]
    );
    // Server errors are not rejections.
    assert!(!harness.committed(&project).unwrap().meta().remote_rejected);
}

#[tokio::test]
async fn previously_rejected_records_are_skipped() {
    let harness = TestHarness::new();
    let ws = synced(workspace("Acme"), 5);
    let mut project = project(ws.local_id(), "Site");
    project.meta_mut().remote_rejected = true;
    let task = task(ws.local_id(), project.local_id(), "Design");
    let mut client = synced(client(ws.local_id(), "Initech"), 7);
    client.meta_mut().dirty = true;
    client.meta_mut().remote_rejected = true;
    let tag = tag(ws.local_id(), "urgent");
    harness.seed(vec![ws, project, task, client, tag.clone()]);

    let report = harness.manager.sync(SyncMode::Push).await.unwrap();
    assert_eq!(report.pruned, 3);
    assert_eq!(harness.remote.pushed_ids(), vec![tag.local_id()]);
}

#[tokio::test]
async fn edited_rejection_is_retried() {
    let harness = TestHarness::new();
    let ws = workspace("Acme");
    harness.seed(vec![ws.clone()]);
    harness.remote.reject(ws.local_id());
    harness.manager.sync(SyncMode::Push).await.unwrap();
    assert!(harness.committed(&ws).unwrap().meta().remote_rejected);

    // Rejected records are not retried until edited.
    harness.manager.sync(SyncMode::Push).await.unwrap();
    assert_eq!(harness.remote.pushed_ids().len(), 1);

    let mut edited = harness.store.get(ws.local_id()).unwrap();
    edited.meta_mut().touch();
    harness.seed(vec![edited]);
    harness.manager.sync(SyncMode::Push).await.unwrap();
    assert_eq!(harness.remote.pushed_ids().len(), 2);
}

#[tokio::test]
async fn placeholder_memberships_are_not_pushed() {
    let harness = TestHarness::new();
    let ws = synced(workspace("Acme"), 5);
    let mut mine = workspace_user(ws.local_id(), harness.user_id());
    mine.meta_mut().dirty = false;
    let theirs = workspace_user(ws.local_id(), LocalId::new());
    let confirmed = synced(workspace_user(ws.local_id(), harness.user_id()), 8);
    let mut confirmed_edit = confirmed.clone();
    confirmed_edit.meta_mut().touch();
    harness.seed(vec![ws, mine.clone(), theirs.clone(), confirmed_edit.clone()]);

    harness.manager.sync(SyncMode::Push).await.unwrap();
    let pushed = harness.remote.pushed_ids();
    assert!(!pushed.contains(&mine.local_id()));
    assert!(pushed.contains(&theirs.local_id()));
    assert!(pushed.contains(&confirmed_edit.local_id()));
}

#[tokio::test]
async fn only_started_entries_of_current_user_are_pushed() {
    let harness = TestHarness::new();
    let ws = synced(workspace("Acme"), 5);
    let mine = time_entry(harness.user_id(), ws.local_id(), Utc::now());
    let mut draft = time_entry(harness.user_id(), ws.local_id(), Utc::now());
    if let Record::TimeEntry(e) = &mut draft {
        e.state = TimeEntryState::New;
    }
    let foreign = time_entry(LocalId::new(), ws.local_id(), Utc::now());
    harness.seed(vec![ws, mine.clone(), draft, foreign]);

    harness.manager.sync(SyncMode::Push).await.unwrap();
    assert_eq!(harness.remote.pushed_ids(), vec![mine.local_id()]);
}

#[tokio::test]
async fn tombstones_are_deleted_or_discarded() {
    let harness = TestHarness::new();
    let mut remote_ws = synced(workspace("Old"), 5);
    remote_ws.meta_mut().tombstone();
    let mut local_ws = workspace("Draft");
    local_ws.meta_mut().tombstone();
    harness.seed(vec![remote_ws.clone(), local_ws.clone()]);

    let report = harness.manager.sync(SyncMode::Push).await.unwrap();
    assert_eq!(report.pushed, 2);
    assert_eq!(
        harness.remote.calls(),
        vec![RemoteCall::Delete(remote_ws.local_id())]
    );
    assert!(harness.committed(&remote_ws).is_none());
    assert!(harness.committed(&local_ws).is_none());
}

#[tokio::test]
async fn wave_pushes_run_concurrently() {
    let harness = TestHarness::new();
    harness.seed((0..5).map(|i| workspace(&format!("ws{}", i))));
    harness.remote.set_latency(StdDuration::from_millis(20));

    let report = harness.manager.sync(SyncMode::Push).await.unwrap();
    assert_eq!(report.pushed, 5);
    assert_eq!(harness.remote.max_in_flight(), 5);
}

#[tokio::test]
async fn edit_during_push_stays_dirty() {
    let harness = TestHarness::new();
    let ws = workspace("Acme");
    harness.seed(vec![ws.clone()]);
    harness.remote.set_latency(StdDuration::from_millis(200));

    let run = harness.manager.run(SyncMode::Push).unwrap();
    tokio::time::sleep(StdDuration::from_millis(40)).await;
    let mut edited = harness.store.get(ws.local_id()).unwrap();
    if let Record::Workspace(w) = &mut edited {
        w.name = "Acme Corp".into();
    }
    edited.meta_mut().touch();
    harness.store.put(edited);

    run.await.unwrap();
    let stored = harness.committed(&ws).unwrap();
    assert!(stored.remote_id().is_some());
    assert!(stored.meta().dirty);
}

#[tokio::test]
async fn rejection_during_edit_keeps_edit_pushable() {
    let harness = TestHarness::new();
    let ws = workspace("Acme");
    harness.seed(vec![ws.clone()]);
    harness.remote.reject(ws.local_id());
    harness.remote.set_latency(StdDuration::from_millis(200));

    let run = harness.manager.run(SyncMode::Push).unwrap();
    tokio::time::sleep(StdDuration::from_millis(40)).await;
    let mut edited = harness.store.get(ws.local_id()).unwrap();
    if let Record::Workspace(w) = &mut edited {
        w.name = "Acme Corp".into();
    }
    edited.meta_mut().touch();
    harness.store.put(edited);

    run.await.unwrap();
    let stored = harness.committed(&ws).unwrap();
    assert!(stored.meta().dirty);
    assert!(!stored.meta().remote_rejected);

    harness.remote.set_latency(StdDuration::ZERO);
    harness.manager.sync(SyncMode::Push).await.unwrap();
    assert_eq!(harness.remote.pushed_ids().len(), 2);
}

#[tokio::test]
async fn dependency_cycle_stops_push() {
    let harness = TestHarness::new();
    let ws = synced(workspace("Acme"), 5);
    let client_id = LocalId::new();
    let mut project = project(ws.local_id(), "Site");
    if let Record::Project(p) = &mut project {
        p.client_id = Some(client_id);
    }
    let mut client = client(project.local_id(), "Loop");
    client.meta_mut().local_id = client_id;
    let tag = tag(ws.local_id(), "fine");
    harness.seed(vec![ws, project.clone(), client, tag.clone()]);

    let report = harness.manager.sync(SyncMode::Push).await.unwrap();
    assert!(report.has_errors);
    assert_eq!(harness.remote.pushed_ids(), vec![tag.local_id()]);
    assert!(harness.committed(&project).unwrap().meta().dirty);
    assert!(!harness.manager.is_running());
}

#[tokio::test]
async fn failed_push_commit_is_reported() {
    let harness = TestHarness::new();
    harness.seed(vec![workspace("Acme")]);
    harness.store.set_fail_commits(true);

    let report = harness.manager.sync(SyncMode::Push).await.unwrap();
    assert_eq!(report.pushed, 1);
    assert!(report.has_errors);
    assert!(report.error.is_none());
}

// ============================================================================
// Events and triggers
// ============================================================================

#[tokio::test]
async fn every_start_has_one_finish() {
    let harness = TestHarness::new();
    let ws = workspace("Acme");
    harness.seed(vec![ws.clone()]);
    harness.remote.reject(ws.local_id());
    let mut events = harness.manager.events().subscribe();

    harness.manager.sync(SyncMode::Full).await.unwrap();

    assert!(matches!(
        events.try_recv(),
        Some(SyncEvent::Started {
            mode: SyncMode::Full
        })
    ));
    match events.try_recv() {
        Some(SyncEvent::Finished {
            mode,
            has_errors,
            error,
        }) => {
            assert_eq!(mode, SyncMode::Full);
            assert!(has_errors);
            assert!(error.is_none());
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn skipped_runs_publish_nothing() {
    let harness = TestHarness::new();
    harness.network.set_present(false);
    let mut events = harness.manager.events().subscribe();

    harness.manager.sync(SyncMode::Full).await;
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn trigger_is_detached_while_running() {
    let harness = TestHarness::new();
    harness.manager.attach_trigger();
    assert_eq!(harness.store.commits().subscriber_count(), 1);

    let run = harness.manager.run(SyncMode::Full).unwrap();
    assert_eq!(harness.store.commits().subscriber_count(), 0);
    run.await.unwrap();
    assert_eq!(harness.store.commits().subscriber_count(), 1);

    harness.manager.detach_trigger();
    assert_eq!(harness.store.commits().subscriber_count(), 0);
}

#[tokio::test]
async fn commit_triggers_automatic_run() {
    let harness = TestHarness::new();
    harness.manager.attach_trigger();

    let ws = workspace("Acme");
    harness.seed(vec![ws.clone()]);

    let remote = harness.remote.clone();
    assert!(wait_for(|| remote.pushed_ids().contains(&ws.local_id())).await);
    assert!(harness.wait_idle(StdDuration::from_secs(2)).await);

    // The run's own commits do not schedule another run.
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert_eq!(harness.remote.fetch_count(), 1);
    assert_eq!(harness.manager.stats().runs_succeeded, 1);
}

#[tokio::test]
async fn stats_accumulate() {
    let harness = TestHarness::new();
    harness.seed(vec![workspace("A"), workspace("B")]);
    harness.manager.sync(SyncMode::Full).await.unwrap();

    let bad = workspace("C");
    harness.seed(vec![bad.clone()]);
    harness.remote.reject(bad.local_id());
    harness.manager.sync(SyncMode::Push).await.unwrap();

    let stats = harness.manager.stats();
    assert_eq!(stats.runs_succeeded, 1);
    assert_eq!(stats.runs_failed, 1);
    assert_eq!(stats.records_pushed, 2);
    assert!(stats.last_finished.is_some());
}
