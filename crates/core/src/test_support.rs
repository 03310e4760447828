// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test builders shared across workspace crates (gated behind `test-support`).

use crate::ids::{ContainerId, RepoId, WorkerName};
use crate::worker::{Health, Worker, WorkerKind};
use std::time::Instant;

/// Builds a [`Worker`] with sensible test defaults; override fields with the
/// `with_*` setters before `.build()`.
pub struct WorkerBuilder {
    name: String,
    kind: WorkerKind,
    repo_id: RepoId,
    created_at: Instant,
    health: Health,
    busy: bool,
}

impl WorkerBuilder {
    pub fn new(repo_id: RepoId) -> Self {
        Self {
            name: "test-worker".to_string(),
            kind: WorkerKind::Dynamic,
            repo_id,
            created_at: Instant::now(),
            health: Health::Healthy,
            busy: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn kind(mut self, kind: WorkerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn created_at(mut self, created_at: Instant) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn health(mut self, health: Health) -> Self {
        self.health = health;
        self
    }

    pub fn busy(mut self, busy: bool) -> Self {
        self.busy = busy;
        self
    }

    pub fn build(self) -> Worker {
        let mut worker = Worker::new(
            WorkerName::new(self.name),
            self.kind,
            self.repo_id,
            ContainerId::new("fake-container"),
            self.created_at,
        );
        worker.health = self.health;
        worker.busy = self.busy;
        worker.last_activity_at = self.created_at;
        worker
    }
}
