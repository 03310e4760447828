// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory `Provider` for tests.

use super::{JobSummary, Provider, ProviderWorker};
use crate::error::ProviderError;
use async_trait::async_trait;
use fleet_core::{ProviderWorkerId, RepoId, Token};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct RepoFixture {
    workers: Vec<ProviderWorker>,
    fail_next_list_workers: Option<ProviderError>,
    fail_next_create_token: Option<ProviderError>,
}

/// Deterministic, injectable-failure fake used by unit and property tests.
#[derive(Clone, Default)]
pub struct FakeProvider {
    repos: Arc<Mutex<HashMap<String, RepoFixture>>>,
    create_token_calls: Arc<AtomicUsize>,
    deregister_calls: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_workers(&self, repo_id: &RepoId, workers: Vec<ProviderWorker>) {
        self.repos.lock().entry(repo_id.to_string()).or_default().workers = workers;
    }

    pub fn fail_next_list_workers(&self, repo_id: &RepoId, err: ProviderError) {
        self.repos.lock().entry(repo_id.to_string()).or_default().fail_next_list_workers = Some(err);
    }

    pub fn fail_next_create_token(&self, repo_id: &RepoId, err: ProviderError) {
        self.repos.lock().entry(repo_id.to_string()).or_default().fail_next_create_token = Some(err);
    }

    pub fn create_token_call_count(&self) -> usize {
        self.create_token_calls.load(Ordering::SeqCst)
    }

    pub fn deregister_call_count(&self) -> usize {
        self.deregister_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn create_registration_token(&self, repo_id: &RepoId) -> Result<Token, ProviderError> {
        self.create_token_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) =
            self.repos.lock().entry(repo_id.to_string()).or_default().fail_next_create_token.take()
        {
            return Err(err);
        }
        let now = chrono::Utc::now();
        Ok(Token {
            repo_id: repo_id.clone(),
            value: fleet_core::token::SecretValue::new(uuid_like_value()),
            issued_at: now,
            expires_at: now + chrono::Duration::minutes(60),
        })
    }

    async fn list_workers(&self, repo_id: &RepoId) -> Result<Vec<ProviderWorker>, ProviderError> {
        let mut repos = self.repos.lock();
        let fixture = repos.entry(repo_id.to_string()).or_default();
        if let Some(err) = fixture.fail_next_list_workers.take() {
            return Err(err);
        }
        Ok(fixture.workers.clone())
    }

    async fn deregister_worker(
        &self,
        repo_id: &RepoId,
        worker_id: &ProviderWorkerId,
    ) -> Result<(), ProviderError> {
        self.deregister_calls.fetch_add(1, Ordering::SeqCst);
        let mut repos = self.repos.lock();
        let fixture = repos.entry(repo_id.to_string()).or_default();
        let before = fixture.workers.len();
        fixture.workers.retain(|w| &w.id != worker_id);
        if fixture.workers.len() == before {
            return Err(ProviderError::NotFound(worker_id.to_string()));
        }
        Ok(())
    }

    async fn list_active_jobs(&self, _repo_id: &RepoId) -> Result<Vec<JobSummary>, ProviderError> {
        Ok(Vec::new())
    }
}

fn uuid_like_value() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("fake-token-{nanos}")
}
