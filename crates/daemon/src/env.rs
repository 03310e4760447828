// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process configuration, loaded via layered [`figment`] providers:
//! programmatic defaults, then `FLEET_*`-prefixed environment variables.

use fleet_core::FleetError;
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Comma-separated `owner/name` repository identifiers to manage.
    pub repositories: String,
    pub max_dynamic_per_repo: u32,
    pub monitor_interval_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub token_refresh_interval_seconds: u64,
    pub token_skew_seconds: u64,
    pub token_refresh_max_attempts: u32,
    pub lease_ttl_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub election_timeout_seconds: u64,
    pub shutdown_timeout_seconds: u64,
    pub worker_image: String,
    pub kubernetes_namespace: String,
    pub provider_base_url: String,
    /// Bearer token for the Provider REST API. Excluded from `Debug`.
    pub provider_api_token: String,
    pub holder_id: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("repositories", &self.repositories)
            .field("max_dynamic_per_repo", &self.max_dynamic_per_repo)
            .field("monitor_interval_seconds", &self.monitor_interval_seconds)
            .field("cleanup_interval_seconds", &self.cleanup_interval_seconds)
            .field("idle_timeout_seconds", &self.idle_timeout_seconds)
            .field("token_refresh_interval_seconds", &self.token_refresh_interval_seconds)
            .field("token_skew_seconds", &self.token_skew_seconds)
            .field("token_refresh_max_attempts", &self.token_refresh_max_attempts)
            .field("lease_ttl_seconds", &self.lease_ttl_seconds)
            .field("heartbeat_interval_seconds", &self.heartbeat_interval_seconds)
            .field("election_timeout_seconds", &self.election_timeout_seconds)
            .field("shutdown_timeout_seconds", &self.shutdown_timeout_seconds)
            .field("worker_image", &self.worker_image)
            .field("kubernetes_namespace", &self.kubernetes_namespace)
            .field("provider_base_url", &self.provider_base_url)
            .field("provider_api_token", &"<redacted>")
            .field("holder_id", &self.holder_id)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repositories: String::new(),
            max_dynamic_per_repo: 3,
            monitor_interval_seconds: 30,
            cleanup_interval_seconds: 60,
            idle_timeout_seconds: 300,
            token_refresh_interval_seconds: 2700,
            token_skew_seconds: 300,
            token_refresh_max_attempts: 3,
            lease_ttl_seconds: 10,
            heartbeat_interval_seconds: 2,
            election_timeout_seconds: 5,
            shutdown_timeout_seconds: 30,
            worker_image: "ghcr.io/example/runner:latest".to_string(),
            kubernetes_namespace: "default".to_string(),
            provider_base_url: String::new(),
            provider_api_token: String::new(),
            holder_id: String::new(),
        }
    }
}

impl Config {
    /// Merge `FLEET_*` environment variables over the built-in defaults,
    /// then validate. Mirrors the layered-provider loader pattern used
    /// elsewhere in the pack (defaults → file → env, env highest priority).
    pub fn load() -> Result<Self, FleetError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Env::prefixed("FLEET_"))
            .extract()
            .map_err(|e| FleetError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn repo_ids(&self) -> Vec<String> {
        self.repositories
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn validate(&self) -> Result<(), FleetError> {
        if self.repo_ids().is_empty() {
            return Err(FleetError::ConfigInvalid(
                "REPOSITORIES must declare at least one owner/name repository".to_string(),
            ));
        }
        for repo in self.repo_ids() {
            if !repo.contains('/') {
                return Err(FleetError::ConfigInvalid(format!(
                    "repository '{repo}' must be in owner/name form"
                )));
            }
        }
        if self.max_dynamic_per_repo == 0 {
            return Err(FleetError::ConfigInvalid(
                "MAX_DYNAMIC_PER_REPO must be at least 1".to_string(),
            ));
        }
        if self.provider_base_url.is_empty() {
            return Err(FleetError::ConfigInvalid("PROVIDER_BASE_URL must be set".to_string()));
        }
        if self.provider_api_token.is_empty() {
            return Err(FleetError::ConfigInvalid("PROVIDER_API_TOKEN must be set".to_string()));
        }
        if self.holder_id.is_empty() {
            return Err(FleetError::ConfigInvalid(
                "HOLDER_ID must be set to a value unique to this process (e.g. pod name)".to_string(),
            ));
        }
        if self.token_refresh_interval_seconds >= 3600 {
            return Err(FleetError::ConfigInvalid(
                "TOKEN_REFRESH_INTERVAL_SECONDS must be strictly less than the Provider token TTL (3600s)"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn token_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.token_refresh_interval_seconds)
    }

    pub fn token_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_skew_seconds as i64)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn election_timeout(&self) -> Duration {
        Duration::from_secs(self.election_timeout_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_repositories() {
        let config = Config { repositories: String::new(), ..Config::default() };
        assert!(matches!(config.validate(), Err(FleetError::ConfigInvalid(_))));
    }

    #[test]
    fn validate_rejects_malformed_repo_id() {
        let config = Config { repositories: "not-a-repo".to_string(), ..Config::default() };
        assert!(matches!(config.validate(), Err(FleetError::ConfigInvalid(_))));
    }

    #[test]
    fn validate_rejects_token_refresh_at_or_above_provider_ttl() {
        let config =
            Config { token_refresh_interval_seconds: 3600, ..valid_config() };
        assert!(matches!(config.validate(), Err(FleetError::ConfigInvalid(_))));
    }

    #[test]
    fn validate_rejects_missing_provider_credentials() {
        let config = Config { provider_base_url: String::new(), ..valid_config() };
        assert!(matches!(config.validate(), Err(FleetError::ConfigInvalid(_))));

        let config = Config { provider_api_token: String::new(), ..valid_config() };
        assert!(matches!(config.validate(), Err(FleetError::ConfigInvalid(_))));
    }

    #[test]
    fn validate_rejects_missing_holder_id() {
        let config = Config { holder_id: String::new(), ..valid_config() };
        assert!(matches!(config.validate(), Err(FleetError::ConfigInvalid(_))));
    }

    #[test]
    fn validate_accepts_sane_defaults_with_repositories() {
        let config = Config { repositories: "acme/widgets,acme/other".to_string(), ..valid_config() };
        assert!(config.validate().is_ok());
        assert_eq!(config.repo_ids(), vec!["acme/widgets", "acme/other"]);
    }

    fn valid_config() -> Config {
        Config {
            repositories: "acme/widgets".to_string(),
            provider_base_url: "https://ci.example.com".to_string(),
            provider_api_token: "test-token".to_string(),
            holder_id: "test-instance".to_string(),
            ..Config::default()
        }
    }
}
