// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter-local error types. Each converts into [`fleet_core::FleetError`]
//! at the component boundary.

use fleet_core::FleetError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ContainerEngineError {
    #[error("transient engine error: {0}")]
    Transient(String),
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("container name conflict: {0}")]
    Conflict(String),
    #[error("engine rejected request: quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl From<ContainerEngineError> for FleetError {
    fn from(err: ContainerEngineError) -> Self {
        match err {
            ContainerEngineError::Transient(m) => FleetError::Transient(m),
            ContainerEngineError::NotFound(m) => FleetError::NotFound(m),
            ContainerEngineError::Conflict(m) => FleetError::Conflict(m),
            ContainerEngineError::QuotaExceeded(m) => FleetError::QuotaExceeded(m),
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("provider auth expired: {0}")]
    AuthExpired(String),
    #[error("provider resource not found: {0}")]
    NotFound(String),
    #[error("provider quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl From<ProviderError> for FleetError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transient(m) => FleetError::Transient(m),
            ProviderError::AuthExpired(m) => FleetError::AuthExpired(m),
            ProviderError::NotFound(m) => FleetError::NotFound(m),
            ProviderError::QuotaExceeded(m) => FleetError::QuotaExceeded(m),
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum CoordinationError {
    #[error("coordination store unavailable: {0}")]
    Transient(String),
}

impl From<CoordinationError> for FleetError {
    fn from(err: CoordinationError) -> Self {
        match err {
            CoordinationError::Transient(m) => FleetError::Transient(m),
        }
    }
}
