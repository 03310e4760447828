// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Repository and per-repository scaling state.

use crate::ids::RepoId;
use crate::worker::Worker;
use std::time::Instant;

/// A configured source repository, loaded from config at startup and
/// immutable thereafter.
#[derive(Debug, Clone)]
pub struct Repository {
    pub id: RepoId,
    pub owner: String,
    pub name: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        let owner = owner.into();
        let name = name.into();
        let id = RepoId::new(format!("{owner}/{name}"));
        Self { id, owner, name }
    }

    /// Deterministic worker-name slug, e.g. `acme-widgets`.
    pub fn slug(&self) -> String {
        format!("{}-{}", self.owner, self.name).to_lowercase().replace(['_', '.'], "-")
    }
}

/// Owns one repository's fleet: exactly one `Worker` with `RepoState::dedicated`,
/// plus a bounded, creation-ordered list of `Worker`s in `RepoState::dynamic`.
///
/// Mutated only by the `PerRepoController` that owns this repository.
#[derive(Debug, Clone)]
pub struct RepoState {
    pub repo_id: RepoId,
    pub dedicated: Option<Worker>,
    pub dynamic: Vec<Worker>,
    pub last_scale_at: Option<Instant>,
    pub consecutive_spawn_failures: u32,
}

impl RepoState {
    pub fn new(repo_id: RepoId) -> Self {
        Self {
            repo_id,
            dedicated: None,
            dynamic: Vec::new(),
            last_scale_at: None,
            consecutive_spawn_failures: 0,
        }
    }

    /// Insert a newly-spawned dynamic worker, preserving the
    /// `created_at`-ascending invariant.
    pub fn push_dynamic(&mut self, worker: Worker) {
        debug_assert_eq!(worker.repo_id, self.repo_id);
        let pos = self.dynamic.partition_point(|w| w.created_at <= worker.created_at);
        self.dynamic.insert(pos, worker);
    }

    /// Remove a worker (dedicated or dynamic) by name. Returns it if found.
    pub fn remove_worker(&mut self, name: &str) -> Option<Worker> {
        if self.dedicated.as_ref().map(|w| w.name.as_str()) == Some(name) {
            return self.dedicated.take();
        }
        let idx = self.dynamic.iter().position(|w| w.name.as_str() == name)?;
        Some(self.dynamic.remove(idx))
    }

    /// All workers, dedicated first, for iteration convenience.
    pub fn all_workers(&self) -> impl Iterator<Item = &Worker> {
        self.dedicated.iter().chain(self.dynamic.iter())
    }

    pub fn all_workers_mut(&mut self) -> impl Iterator<Item = &mut Worker> {
        self.dedicated.iter_mut().chain(self.dynamic.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ContainerId, WorkerName};
    use crate::worker::WorkerKind;
    use std::time::{Duration, Instant};

    fn worker(name: &str, created_at: Instant) -> Worker {
        Worker::new(
            WorkerName::new(name),
            WorkerKind::Dynamic,
            RepoId::new("acme/widgets"),
            ContainerId::new("c1"),
            created_at,
        )
    }

    #[test]
    fn push_dynamic_keeps_created_at_ascending() {
        let mut state = RepoState::new(RepoId::new("acme/widgets"));
        let t0 = Instant::now();
        state.push_dynamic(worker("w2", t0 + Duration::from_secs(2)));
        state.push_dynamic(worker("w1", t0 + Duration::from_secs(1)));
        state.push_dynamic(worker("w3", t0 + Duration::from_secs(3)));

        let names: Vec<_> = state.dynamic.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["w1", "w2", "w3"]);
    }

    #[test]
    fn remove_worker_finds_dedicated_and_dynamic() {
        let mut state = RepoState::new(RepoId::new("acme/widgets"));
        let t0 = Instant::now();
        state.dedicated = Some(worker("dedicated", t0));
        state.push_dynamic(worker("dyn-1", t0));

        assert!(state.remove_worker("dedicated").is_some());
        assert!(state.dedicated.is_none());
        assert!(state.remove_worker("dyn-1").is_some());
        assert!(state.dynamic.is_empty());
        assert!(state.remove_worker("missing").is_none());
    }
}
