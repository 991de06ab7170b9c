//! Property-based test generators using proptest.
//!
//! Graph strategies only produce acyclic dependency sets: a node may depend
//! on lower-numbered nodes only.

use crate::fixtures;
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use proptest::sample::Index;
use std::collections::BTreeSet;
use tally_core::{LocalId, Record, Syncable};
use tally_sync_engine::GraphNode;

/// A bare graph node for exercising [`tally_sync_engine::DependencyGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestNode {
    /// Node identity.
    pub id: u32,
    /// Nodes this one depends on.
    pub deps: Vec<u32>,
}

impl GraphNode for TestNode {
    type Key = u32;

    fn key(&self) -> u32 {
        self.id
    }

    fn dependencies(&self) -> Vec<u32> {
        self.deps.clone()
    }
}

/// Strategy for generating an acyclic set of up to `max_nodes` nodes.
///
/// Nodes may also point at IDs outside the set, which the graph treats as
/// satisfied.
pub fn acyclic_nodes_strategy(max_nodes: usize) -> impl Strategy<Value = Vec<TestNode>> {
    prop::collection::vec(
        (
            prop::collection::vec(any::<Index>(), 0..4),
            prop::option::of(1000u32..1010),
        ),
        0..=max_nodes,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (picks, external))| {
                let id = i as u32;
                let mut deps: Vec<u32> = if i == 0 {
                    Vec::new()
                } else {
                    picks.iter().map(|pick| pick.index(i) as u32).collect()
                };
                deps.extend(external);
                deps.sort_unstable();
                deps.dedup();
                TestNode { id, deps }
            })
            .collect()
    })
}

/// Strategy for generating a tree of new records owned by `user_id`.
///
/// Produces workspaces, projects, tasks and finished time entries linked
/// to one another, in arbitrary order, all waiting to be pushed.
pub fn record_tree_strategy(user_id: LocalId) -> impl Strategy<Value = Vec<Record>> {
    (
        1usize..3,
        prop::collection::vec(any::<Index>(), 0..4),
        prop::collection::vec(any::<Index>(), 0..4),
        prop::collection::vec((any::<Index>(), prop::option::of(any::<Index>())), 0..6),
        any::<u64>(),
    )
        .prop_map(move |(workspaces, projects, tasks, entries, seed)| {
            let workspaces: Vec<Record> = (0..workspaces)
                .map(|i| fixtures::workspace(&format!("ws{}", i)))
                .collect();
            // (workspace, project) pairs, for linking children.
            let project_links: Vec<(LocalId, LocalId)> = projects
                .iter()
                .map(|pick| (pick.get(&workspaces).local_id(), LocalId::new()))
                .collect();
            let projects: Vec<Record> = project_links
                .iter()
                .enumerate()
                .map(|(i, (ws, id))| {
                    let mut record = fixtures::project(*ws, &format!("p{}", i));
                    record.meta_mut().local_id = *id;
                    record
                })
                .collect();
            let tasks: Vec<Record> = if project_links.is_empty() {
                Vec::new()
            } else {
                tasks
                    .iter()
                    .enumerate()
                    .map(|(i, pick)| {
                        let (ws, project) = pick.get(&project_links);
                        fixtures::task(*ws, *project, &format!("t{}", i))
                    })
                    .collect()
            };
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
            let entries: Vec<Record> = entries
                .into_iter()
                .enumerate()
                .map(|(i, (ws_pick, project_pick))| {
                    let start_time = start + Duration::hours(i as i64);
                    let link = project_pick
                        .filter(|_| !project_links.is_empty())
                        .map(|pick| *pick.get(&project_links));
                    let ws = match link {
                        Some((ws, _)) => ws,
                        None => ws_pick.get(&workspaces).local_id(),
                    };
                    let mut record = fixtures::time_entry(user_id, ws, start_time);
                    if let (Record::TimeEntry(entry), Some((_, project))) = (&mut record, link) {
                        entry.project_id = Some(project);
                    }
                    record
                })
                .collect();

            let mut all: Vec<Record> = workspaces
                .into_iter()
                .chain(projects)
                .chain(tasks)
                .chain(entries)
                .collect();
            // Deterministic shuffle so insertion order never matches dependency order.
            let len = all.len();
            let mut state = seed;
            for i in (1..len).rev() {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                all.swap(i, (state >> 33) as usize % (i + 1));
            }
            all
        })
}

/// Every key that transitively depends on `root` in `nodes`, `root` included.
pub fn dependents_closure(nodes: &[TestNode], root: u32) -> BTreeSet<u32> {
    let mut closure = BTreeSet::from([root]);
    loop {
        let before = closure.len();
        for node in nodes {
            if node.deps.iter().any(|dep| closure.contains(dep)) {
                closure.insert(node.id);
            }
        }
        if closure.len() == before {
            return closure;
        }
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
