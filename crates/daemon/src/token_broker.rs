// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TokenBroker: caches and proactively refreshes per-repository
//! registration tokens, coalescing concurrent callers onto one in-flight
//! refresh per repo.

use crate::events::EventBus;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use fleet_adapters::Provider;
use fleet_core::{Clock, CircuitState, ComponentHealth, Event, FleetError, RepoId, Token};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const REFRESH_MAX_ATTEMPTS: u32 = 3;
const REFRESH_INITIAL_DELAY: Duration = Duration::from_secs(5);
const CIRCUIT_OPEN_FOR: chrono::Duration = chrono::Duration::seconds(60);

/// Per-repo single-flight guard: only one task actually calls the Provider;
/// the rest wait on its result via the same `tokio::sync::Mutex` permit.
/// `health` circuit-breaks repeated Provider calls once refreshes start
/// failing, instead of hammering an already-unreachable Provider on every
/// proactive refresh tick.
struct RepoSlot {
    cached: Mutex<Option<Token>>,
    refresh_lock: AsyncMutex<()>,
    health: Mutex<ComponentHealth>,
}

pub struct TokenBroker<P: Provider, C: Clock> {
    provider: Arc<P>,
    clock: C,
    events: EventBus,
    skew: chrono::Duration,
    max_attempts: u32,
    slots: Mutex<HashMap<String, Arc<RepoSlot>>>,
    refreshers: Mutex<HashMap<String, CancellationToken>>,
}

impl<P: Provider, C: Clock> TokenBroker<P, C> {
    pub fn new(provider: Arc<P>, clock: C, events: EventBus, skew: chrono::Duration) -> Self {
        Self {
            provider,
            clock,
            events,
            skew,
            max_attempts: REFRESH_MAX_ATTEMPTS,
            slots: Mutex::new(HashMap::new()),
            refreshers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    fn slot(&self, repo_id: &RepoId) -> Arc<RepoSlot> {
        let now = self.clock.wall_now();
        self.slots
            .lock()
            .entry(repo_id.to_string())
            .or_insert_with(|| {
                Arc::new(RepoSlot {
                    cached: Mutex::new(None),
                    refresh_lock: AsyncMutex::new(()),
                    health: Mutex::new(ComponentHealth::new(repo_id.to_string(), now)),
                })
            })
            .clone()
    }

    /// Returns a token with `expires_at - now > skew`, refreshing
    /// synchronously (and coalescing concurrent callers) when required.
    pub async fn get_valid(&self, repo_id: &RepoId) -> Result<Token, FleetError> {
        let slot = self.slot(repo_id);
        if let Some(token) = slot.cached.lock().clone() {
            if token.is_valid(self.clock.wall_now(), self.skew) {
                return Ok(token);
            }
        }

        // Only one caller per repo actually refreshes; the rest block here
        // and then observe the refreshed cache.
        let _permit = slot.refresh_lock.lock().await;
        if let Some(token) = slot.cached.lock().clone() {
            if token.is_valid(self.clock.wall_now(), self.skew) {
                return Ok(token);
            }
        }
        self.refresh_locked(repo_id, &slot).await
    }

    async fn refresh_locked(&self, repo_id: &RepoId, slot: &RepoSlot) -> Result<Token, FleetError> {
        let now = self.clock.wall_now();
        {
            let mut health = slot.health.lock();
            health.refresh_circuit(now);
            if health.circuit_state == CircuitState::Open {
                warn!(repo = %repo_id, "token refresh circuit open, skipping Provider call");
                return slot.cached.lock().clone().ok_or_else(|| {
                    FleetError::Transient(format!("{repo_id}: token refresh circuit open, no cached token"))
                });
            }
        }

        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(REFRESH_INITIAL_DELAY)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.provider.create_registration_token(repo_id).await {
                Ok(token) => {
                    *slot.cached.lock() = Some(token.clone());
                    slot.health.lock().record_success(self.clock.wall_now());
                    self.events.emit(Event::TokenRefreshed {
                        repo_id: repo_id.clone(),
                        expires_at: token.expires_at,
                    });
                    return Ok(token);
                }
                Err(err) if attempt < self.max_attempts => {
                    warn!(repo = %repo_id, attempt, %err, "token refresh attempt failed, retrying");
                    if let Some(delay) = backoff.next_backoff() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    warn!(repo = %repo_id, %err, "token refresh exhausted retries");
                    slot.health.lock().record_failure(self.clock.wall_now(), CIRCUIT_OPEN_FOR);
                    self.events.emit(Event::TokenRefreshFailed { repo_id: repo_id.clone() });
                    // Keep the stale cached token (still possibly valid); do not cache the failure.
                    return slot
                        .cached
                        .lock()
                        .clone()
                        .ok_or_else(|| FleetError::from(err));
                }
            }
        }
    }

    /// Forces a refresh regardless of cache validity, bypassing the
    /// cache-freshness check `get_valid` does. Used when a caller has
    /// independently observed the cached token being rejected upstream
    /// (e.g. an `AuthExpired` on a Provider call using it).
    pub async fn force_refresh(&self, repo_id: &RepoId) -> Result<Token, FleetError> {
        let slot = self.slot(repo_id);
        let _permit = slot.refresh_lock.lock().await;
        self.refresh_locked(repo_id, &slot).await
    }

    /// Installs a timer that proactively refreshes every `interval`.
    pub fn start_refresher(self: &Arc<Self>, repo_id: RepoId, interval: Duration)
    where
        P: 'static,
        C: 'static,
    {
        let token = CancellationToken::new();
        self.refreshers.lock().insert(repo_id.to_string(), token.clone());
        let broker = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = broker.get_valid(&repo_id).await {
                            warn!(repo = %repo_id, %err, "proactive token refresh failed");
                        } else {
                            info!(repo = %repo_id, "proactive token refresh completed");
                        }
                    }
                }
            }
        });
    }

    pub fn stop_refresher(&self, repo_id: &RepoId) {
        if let Some(token) = self.refreshers.lock().remove(repo_id.as_str()) {
            token.cancel();
        }
    }

    pub fn stop_all_refreshers(&self) {
        for (_, token) in self.refreshers.lock().drain() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_adapters::FakeProvider;
    use fleet_adapters::ProviderError;
    use fleet_core::FakeClock;

    fn broker(provider: Arc<FakeProvider>, clock: FakeClock) -> TokenBroker<FakeProvider, FakeClock> {
        TokenBroker::new(provider, clock, EventBus::new(), chrono::Duration::minutes(5))
    }

    #[tokio::test]
    async fn get_valid_refreshes_when_cache_is_empty() {
        let provider = Arc::new(FakeProvider::new());
        let broker = broker(provider.clone(), FakeClock::new());
        let repo = RepoId::new("acme/widgets");

        let token = broker.get_valid(&repo).await.unwrap();
        assert_eq!(provider.create_token_call_count(), 1);
        assert_eq!(token.repo_id, repo);
    }

    #[tokio::test]
    async fn get_valid_returns_cached_token_when_still_valid() {
        let provider = Arc::new(FakeProvider::new());
        let broker = broker(provider.clone(), FakeClock::new());
        let repo = RepoId::new("acme/widgets");

        broker.get_valid(&repo).await.unwrap();
        broker.get_valid(&repo).await.unwrap();
        assert_eq!(provider.create_token_call_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_get_valid_calls_coalesce_into_one_refresh() {
        let provider = Arc::new(FakeProvider::new());
        let broker = Arc::new(broker(provider.clone(), FakeClock::new()));
        let repo = RepoId::new("acme/widgets");

        let mut handles = Vec::new();
        for _ in 0..10 {
            let broker = broker.clone();
            let repo = repo.clone();
            handles.push(tokio::spawn(async move { broker.get_valid(&repo).await.unwrap() }));
        }
        let mut tokens = Vec::new();
        for h in handles {
            tokens.push(h.await.unwrap());
        }

        assert_eq!(provider.create_token_call_count(), 1);
        assert!(tokens.windows(2).all(|w| w[0].value.expose() == w[1].value.expose()));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stale_token_and_emits_failure_event() {
        let provider = Arc::new(FakeProvider::new());
        let clock = FakeClock::new();
        let broker = broker(provider.clone(), clock.clone()).with_max_attempts(1);
        let repo = RepoId::new("acme/widgets");

        let first = broker.get_valid(&repo).await.unwrap();
        clock.advance(Duration::from_secs(3600));
        provider.fail_next_create_token(&repo, ProviderError::Transient("down".into()));
        let second = broker.get_valid(&repo).await.unwrap();
        assert_eq!(first.value.expose(), second.value.expose());
    }

    #[test]
    fn start_and_stop_refresher_is_idempotent_on_missing_entries() {
        let provider = Arc::new(FakeProvider::new());
        let broker = Arc::new(broker(provider, FakeClock::new()));
        broker.stop_refresher(&RepoId::new("never-started"));
        assert_eq!(broker.refreshers.lock().len(), 0);
    }
}
