// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic REST `Provider`: talks to an upstream CI system's registration
//! API over HTTP. Endpoint shape is intentionally generic (one base URL,
//! bearer auth, `owner/name` path segments) rather than bound to any one
//! vendor's API, mirroring the direct-HTTP substrate style used elsewhere
//! in the pack for external API integrations.

use super::{JobSummary, Provider, ProviderWorker, ProviderWorkerStatus};
use crate::error::ProviderError;
use async_trait::async_trait;
use fleet_core::{ProviderWorkerId, RepoId, Token};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Configuration for an [`HttpProvider`].
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub base_url: String,
    pub api_token: String,
    pub timeout: Duration,
}

/// REST-backed `Provider` implementation.
pub struct HttpProvider {
    client: Client,
    base_url: String,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", config.api_token))
            .map_err(|e| ProviderError::Transient(format!("invalid api token: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::Transient(format!("building http client: {e}")))?;

        Ok(Self { client, base_url: config.base_url })
    }

    fn repo_path(&self, repo_id: &RepoId) -> String {
        format!("{}/repos/{}", self.base_url, repo_id.as_str())
    }
}

fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::AuthExpired(format!("{status}: {body}"))
        }
        StatusCode::NOT_FOUND => ProviderError::NotFound(body.to_string()),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::QuotaExceeded(body.to_string()),
        _ => ProviderError::Transient(format!("{status}: {body}")),
    }
}

async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

#[derive(Deserialize)]
struct TokenResponse {
    value: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
struct WorkerResponse {
    id: String,
    name: String,
    online: bool,
    busy: bool,
}

#[derive(Deserialize)]
struct JobResponse {
    id: String,
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create_registration_token(&self, repo_id: &RepoId) -> Result<Token, ProviderError> {
        let resp = self
            .client
            .post(format!("{}/registration-token", self.repo_path(repo_id)))
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        let resp = check_response(resp).await?;
        let parsed: TokenResponse =
            resp.json().await.map_err(|e| ProviderError::Transient(format!("decoding token: {e}")))?;

        Ok(Token {
            repo_id: repo_id.clone(),
            value: fleet_core::token::SecretValue::new(parsed.value),
            issued_at: chrono::Utc::now(),
            expires_at: parsed.expires_at,
        })
    }

    async fn list_workers(&self, repo_id: &RepoId) -> Result<Vec<ProviderWorker>, ProviderError> {
        let resp = self
            .client
            .get(format!("{}/workers", self.repo_path(repo_id)))
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        let resp = check_response(resp).await?;
        let parsed: Vec<WorkerResponse> =
            resp.json().await.map_err(|e| ProviderError::Transient(format!("decoding workers: {e}")))?;

        Ok(parsed
            .into_iter()
            .map(|w| ProviderWorker {
                id: ProviderWorkerId::new(w.id),
                name: w.name,
                status: if w.online { ProviderWorkerStatus::Online } else { ProviderWorkerStatus::Offline },
                busy: w.busy,
            })
            .collect())
    }

    async fn deregister_worker(
        &self,
        repo_id: &RepoId,
        worker_id: &ProviderWorkerId,
    ) -> Result<(), ProviderError> {
        let resp = self
            .client
            .delete(format!("{}/workers/{}", self.repo_path(repo_id), worker_id.as_str()))
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(()),
            _ => {
                check_response(resp).await?;
                Ok(())
            }
        }
    }

    async fn list_active_jobs(&self, repo_id: &RepoId) -> Result<Vec<JobSummary>, ProviderError> {
        let resp = self
            .client
            .get(format!("{}/jobs?status=active", self.repo_path(repo_id)))
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        let resp = check_response(resp).await?;
        let parsed: Vec<JobResponse> =
            resp.json().await.map_err(|e| ProviderError::Transient(format!("decoding jobs: {e}")))?;
        Ok(parsed.into_iter().map(|j| JobSummary { id: j.id }).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_status_maps_auth_and_not_found() {
        assert!(matches!(classify_status(StatusCode::UNAUTHORIZED, "x"), ProviderError::AuthExpired(_)));
        assert!(matches!(classify_status(StatusCode::FORBIDDEN, "x"), ProviderError::AuthExpired(_)));
        assert!(matches!(classify_status(StatusCode::NOT_FOUND, "x"), ProviderError::NotFound(_)));
        assert!(matches!(classify_status(StatusCode::TOO_MANY_REQUESTS, "x"), ProviderError::QuotaExceeded(_)));
        assert!(matches!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, "x"), ProviderError::Transient(_)));
    }

    #[test]
    fn new_rejects_token_with_invalid_header_bytes() {
        let config = HttpProviderConfig {
            base_url: "https://ci.example.com".to_string(),
            api_token: "tok\nwith-newline".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert!(HttpProvider::new(config).is_err());
    }
}
